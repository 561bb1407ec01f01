//! Session-level events and the UI-facing job view.
//!
//! [`SessionEvent`]s are broadcast as things happen; [`JobView`] is the
//! latest snapshot a UI renders from.

use agentdesk_core::job::{CorrelationState, JobResult};
use agentdesk_core::types::{ConnectionId, JobId, Timestamp};
use serde::Serialize;

/// Something the UI may want to react to.
#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    /// The duplex connection is open.
    Connected { connection_id: ConnectionId },

    /// The duplex connection dropped; reconnection is in progress.
    Disconnected { connection_id: ConnectionId },

    /// A submission was accepted and is now pending.
    JobStarted {
        job_id: JobId,
        connection_id: ConnectionId,
    },

    /// The pending job reported progress.
    JobProgress { job_id: JobId, message: String },

    /// The pending job completed with a result.
    JobSucceeded { job_id: JobId, result: JobResult },

    /// The server reported the job as failed.
    JobFailed { job_id: JobId, detail: String },

    /// No terminal event arrived in time. The server-side job keeps running.
    JobTimedOut { job_id: JobId, advisory: String },

    /// The submission call itself failed; no job was created.
    SubmissionFailed { detail: String },

    /// The submission was refused locally before any call was made.
    SubmissionRejected { reason: String },

    /// The authoritative records were re-fetched.
    RecordsRefreshed { count: usize },
}

/// Snapshot of the current job as the UI should render it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobView {
    pub status: CorrelationState,
    pub job_id: Option<JobId>,
    pub started_at: Option<Timestamp>,
    /// Latest progress message while pending.
    pub progress: Option<String>,
    pub result: Option<JobResult>,
    /// Surfaced error: a submission failure or the server's job failure.
    pub error: Option<String>,
    /// Soft notice shown after a timeout.
    pub advisory: Option<String>,
}

impl JobView {
    /// Whether the UI should allow a new submission.
    pub fn can_submit(&self) -> bool {
        self.status != CorrelationState::Pending
    }
}
