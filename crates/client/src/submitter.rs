//! Job submission over the request/response channel.
//!
//! [`JobSubmitter::submit`] checks every precondition before touching the
//! network, so a rejected submission never has side effects. A
//! [`SubmitError`] always means no job was created on the server.

use std::fmt;
use std::sync::Arc;

use agentdesk_core::models::resolve_target;
use agentdesk_core::project::Project;
use agentdesk_core::types::{ConnectionId, Identity, Timestamp};
use tokio::time::Instant;

use crate::api::{JobApi, JobSubmission};
use crate::connection::ConnectionRegistry;

/// What the caller asks to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub project_id: String,
    /// Free-text instruction for the agent.
    pub payload: String,
    /// Requested model name; ignored when the project pins one.
    pub model: Option<String>,
}

/// An accepted submission, ready to be tracked by the correlator.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub connection_id: ConnectionId,
    /// When the call was sent. Events received earlier belong to an older job.
    pub dispatched_at: Instant,
    /// When the server acknowledged the call.
    pub accepted_at: Timestamp,
}

/// Why a submission was refused locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidState {
    NotConnected,
    JobPending,
    EmptyPayload,
    NoTarget(String),
    QuotaExhausted,
}

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidState::NotConnected => f.write_str("Failed to connect to the agent"),
            InvalidState::JobPending => f.write_str("A request is already being processed"),
            InvalidState::EmptyPayload => f.write_str("Request text is empty"),
            InvalidState::NoTarget(reason) => write!(f, "No target selected: {reason}"),
            InvalidState::QuotaExhausted => f.write_str("This project has no requests left"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// A precondition failed; nothing was sent.
    #[error("{0}")]
    InvalidState(InvalidState),

    /// The submission call itself failed; no job exists.
    #[error("{0}")]
    TransportFailure(String),
}

/// Session state the submitter needs but does not own.
#[derive(Debug, Clone, Copy)]
pub struct SubmitContext<'a> {
    pub job_pending: bool,
    pub identity: Option<&'a Identity>,
    /// Latest known record for the target project, if fetched.
    pub project: Option<&'a Project>,
}

pub struct JobSubmitter {
    registry: Arc<dyn ConnectionRegistry>,
    api: Arc<dyn JobApi>,
}

impl JobSubmitter {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, api: Arc<dyn JobApi>) -> Self {
        Self { registry, api }
    }

    /// Validate, then perform the submission call with the current
    /// connection id attached.
    pub async fn submit(
        &self,
        request: &SubmitRequest,
        ctx: SubmitContext<'_>,
    ) -> Result<Submission, SubmitError> {
        let submission = self.prepare(request, ctx)?;

        let dispatched_at = Instant::now();
        tracing::info!(
            project_id = %submission.project_id,
            connection_id = %submission.connection_id,
            model = %submission.target_model_name,
            "Submitting agent job",
        );

        if let Err(e) = self.api.submit_job(&submission).await {
            tracing::error!(
                project_id = %submission.project_id,
                error = %e,
                "Agent job submission failed",
            );
            return Err(SubmitError::TransportFailure(e.user_message()));
        }

        Ok(Submission {
            connection_id: submission.connection_id,
            dispatched_at,
            accepted_at: chrono::Utc::now(),
        })
    }

    /// Check preconditions and build the request body.
    fn prepare(
        &self,
        request: &SubmitRequest,
        ctx: SubmitContext<'_>,
    ) -> Result<JobSubmission, SubmitError> {
        let invalid = |reason| Err(SubmitError::InvalidState(reason));

        if ctx.job_pending {
            return invalid(InvalidState::JobPending);
        }

        let payload = request.payload.trim();
        if payload.is_empty() {
            return invalid(InvalidState::EmptyPayload);
        }

        let project_id = request.project_id.trim();
        if project_id.is_empty() {
            return invalid(InvalidState::NoTarget("no project selected".to_string()));
        }

        let pinned = ctx.project.and_then(|p| p.selected_model.as_ref());
        let target = match resolve_target(pinned, request.model.as_deref()) {
            Ok(target) => target,
            Err(e) => return invalid(InvalidState::NoTarget(e.to_string())),
        };

        if ctx.project.is_some_and(|p| !p.has_requests_left()) {
            return invalid(InvalidState::QuotaExhausted);
        }

        let Some(connection_id) = self.registry.current_id() else {
            return invalid(InvalidState::NotConnected);
        };

        Ok(JobSubmission {
            project_id: project_id.to_string(),
            job_payload: payload.to_string(),
            identity: ctx.identity.map(|i| i.as_str().to_string()),
            connection_id,
            target_model_type: target.model_type,
            target_model_name: target.name,
        })
    }
}
