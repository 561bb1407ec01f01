//! Duplex-channel message type constants for the agent job protocol.
//!
//! Frames on the persistent connection are JSON text of the shape
//! `{"type": "<kind>", "data": {...}}`. The legacy names are still emitted
//! by older agent servers and are accepted as aliases on the way in.

/// Outbound: associate the connection with a client identity.
pub const MSG_TYPE_REGISTER: &str = "register";

/// Inbound: display-only progress update for the running job.
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Inbound: the running job failed on the server.
pub const MSG_TYPE_ERROR: &str = "error";

/// Inbound: the running job finished and produced a result.
pub const MSG_TYPE_COMPLETED: &str = "completed";

/// Legacy name of [`MSG_TYPE_PROGRESS`].
pub const LEGACY_MSG_TYPE_PROGRESS: &str = "agent_response";

/// Legacy name of [`MSG_TYPE_ERROR`].
pub const LEGACY_MSG_TYPE_ERROR: &str = "agent_error";

/// Legacy name of [`MSG_TYPE_COMPLETED`].
pub const LEGACY_MSG_TYPE_COMPLETED: &str = "pr_submitted";

/// Query parameter carrying the connection id during the WebSocket handshake.
pub const CONNECTION_ID_QUERY_PARAM: &str = "clientId";
