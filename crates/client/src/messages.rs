//! Agent duplex-channel message types and parser.
//!
//! The agent server sends JSON text frames with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them into
//! a strongly-typed [`AgentMessage`] and serializes the client's outbound
//! [`OutboundMessage`] in the same envelope.

use agentdesk_core::job::{InboundEvent, JobResult};
use agentdesk_core::job_events::MSG_TYPE_REGISTER;
use agentdesk_core::types::Identity;
use serde::{Deserialize, Serialize};

/// All known inbound agent messages.
///
/// Older servers use the `agent_response` / `agent_error` / `pr_submitted`
/// names; they are accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AgentMessage {
    #[serde(rename = "progress", alias = "agent_response")]
    Progress(ProgressData),

    #[serde(rename = "error", alias = "agent_error")]
    Error(ErrorData),

    #[serde(rename = "completed", alias = "pr_submitted")]
    Completed(CompletedData),
}

/// Payload for `progress` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub message: String,
}

/// Payload for `error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    /// Human-readable failure description. Legacy servers put it in `pr_url`.
    #[serde(alias = "pr_url")]
    pub detail: String,
}

/// Payload for `completed` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedData {
    #[serde(alias = "chat")]
    pub result: JobResult,
}

impl From<AgentMessage> for InboundEvent {
    fn from(msg: AgentMessage) -> Self {
        match msg {
            AgentMessage::Progress(data) => InboundEvent::Progress {
                message: data.message,
            },
            AgentMessage::Error(data) => InboundEvent::Error {
                detail: data.detail,
            },
            AgentMessage::Completed(data) => InboundEvent::Completed {
                result: data.result,
            },
        }
    }
}

/// Parse an agent text frame into a typed message.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log and continue.
pub fn parse_message(text: &str) -> Result<AgentMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Messages the client sends over the duplex channel.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Register { identity: Identity },
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    r#type: &'static str,
    data: T,
}

#[derive(Serialize)]
struct RegisterData<'a> {
    identity: &'a str,
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Register { .. } => MSG_TYPE_REGISTER,
        }
    }

    /// Serialize into a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundMessage::Register { identity } => serde_json::to_string(&Envelope {
                r#type: self.kind(),
                data: RegisterData {
                    identity: identity.as_str(),
                },
            }),
        }
    }
}
