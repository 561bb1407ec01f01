//! Client-side job record and inbound event model.
//!
//! A [`Job`] is created when a submission is accepted and starts out
//! `Pending`. It can leave `Pending` exactly once; every later attempt to
//! conclude it is a [`CoreError::Conflict`].

use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;
use crate::job_events::{MSG_TYPE_COMPLETED, MSG_TYPE_ERROR, MSG_TYPE_PROGRESS};
use crate::project::Chat;
use crate::types::{ConnectionId, JobId, Timestamp};

/// How long the client waits for a terminal event before giving up locally.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(8 * 60);

/// Advisory shown when the local wait expires. The server-side job keeps
/// running; the user may check back or submit again.
pub const TIMEOUT_ADVISORY: &str = "Please check back in a minute or retry again.";

/// Result payload of a completed job.
pub type JobResult = Chat;

/// Lifecycle status of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

/// Status as observed by the UI: either no job at all, or the status of the
/// current (or most recently concluded) job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationState {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl From<JobStatus> for CorrelationState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => CorrelationState::Pending,
            JobStatus::Succeeded => CorrelationState::Succeeded,
            JobStatus::Failed => CorrelationState::Failed,
            JobStatus::TimedOut => CorrelationState::TimedOut,
        }
    }
}

/// An asynchronous notification pushed over the duplex connection.
///
/// Carries no job id: the client correlates it with whichever job is
/// currently pending.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Progress { message: String },
    Error { detail: String },
    Completed { result: JobResult },
}

impl InboundEvent {
    /// Wire name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Progress { .. } => MSG_TYPE_PROGRESS,
            InboundEvent::Error { .. } => MSG_TYPE_ERROR,
            InboundEvent::Completed { .. } => MSG_TYPE_COMPLETED,
        }
    }

    /// Whether applying this event concludes a pending job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InboundEvent::Progress { .. })
    }
}

/// One submitted unit of agent work, tracked for correlation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    /// Connection the server was told to push results to.
    pub submitted_connection_id: ConnectionId,
    pub started_at: Timestamp,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    /// Server-reported failure detail, surfaced verbatim.
    pub failure: Option<String>,
}

impl Job {
    pub fn new(id: JobId, submitted_connection_id: ConnectionId, started_at: Timestamp) -> Self {
        Self {
            id,
            submitted_connection_id,
            started_at,
            status: JobStatus::Pending,
            result: None,
            failure: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    pub fn succeed(&mut self, result: JobResult) -> Result<(), CoreError> {
        self.conclude(JobStatus::Succeeded)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, detail: String) -> Result<(), CoreError> {
        self.conclude(JobStatus::Failed)?;
        self.failure = Some(detail);
        Ok(())
    }

    pub fn time_out(&mut self) -> Result<(), CoreError> {
        self.conclude(JobStatus::TimedOut)
    }

    fn conclude(&mut self, to: JobStatus) -> Result<(), CoreError> {
        if !self.is_pending() {
            return Err(CoreError::Conflict(format!(
                "Job {} already concluded as {}, cannot become {}",
                self.id,
                self.status.as_str(),
                to.as_str()
            )));
        }
        self.status = to;
        Ok(())
    }
}
