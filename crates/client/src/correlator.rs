//! Outcome correlation for the single in-flight agent job.
//!
//! [`OutcomeCorrelator`] is a state machine:
//!
//! ```text
//! Idle --begin--> Pending --Completed--> Succeeded
//!                    |----Error------> Failed
//!                    `----deadline---> TimedOut
//! Succeeded | Failed | TimedOut --begin--> Pending
//! Succeeded | Failed | TimedOut --dismiss--> Idle
//! ```
//!
//! The deadline timer is stored inside the `Pending` state, so every
//! transition out of `Pending` drops it and a timer can never fire against
//! a later job. Inbound events are only applied while a job is pending;
//! anything else is a [`StaleEvent`] and is dropped.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use agentdesk_core::error::CoreError;
use agentdesk_core::job::{CorrelationState, InboundEvent, Job, JobResult, JobStatus, TIMEOUT_ADVISORY};
use agentdesk_core::types::JobId;
use tokio::time::{Instant, Sleep};

use crate::submitter::Submission;

/// Result of feeding a signal into the correlator.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Display-only progress was recorded for the pending job.
    Progress { job_id: JobId },
    /// The pending job reached a terminal status.
    Concluded { job_id: JobId, status: JobStatus },
    /// The signal did not belong to a pending job and was ignored.
    Discarded(StaleEvent),
}

/// An inbound signal that arrived when it could no longer apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleEvent {
    pub kind: &'static str,
    pub reason: StaleReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No job is pending (never submitted, or already concluded).
    NoPendingJob,
    /// Received before the current job's submission was dispatched.
    PredatesSubmission,
}

enum Correlation {
    Idle,
    Pending {
        job: Job,
        dispatched_at: Instant,
        deadline: Pin<Box<Sleep>>,
    },
    Concluded {
        job: Job,
    },
}

pub struct OutcomeCorrelator {
    timeout: Duration,
    next_job_id: JobId,
    state: Correlation,
    progress: Option<String>,
    advisory: Option<String>,
}

impl OutcomeCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_job_id: 1,
            state: Correlation::Idle,
            progress: None,
            advisory: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> CorrelationState {
        match &self.state {
            Correlation::Idle => CorrelationState::Idle,
            Correlation::Pending { job, .. } | Correlation::Concluded { job } => job.status.into(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, Correlation::Pending { .. })
    }

    /// Current or most recently concluded job.
    pub fn job(&self) -> Option<&Job> {
        match &self.state {
            Correlation::Idle => None,
            Correlation::Pending { job, .. } | Correlation::Concluded { job } => Some(job),
        }
    }

    /// Latest progress message of the current job.
    pub fn progress(&self) -> Option<&str> {
        self.progress.as_deref()
    }

    /// Set when the current job timed out.
    pub fn advisory(&self) -> Option<&str> {
        self.advisory.as_deref()
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.job().and_then(|j| j.result.as_ref())
    }

    pub fn failure(&self) -> Option<&str> {
        self.job().and_then(|j| j.failure.as_deref())
    }

    /// Start tracking an accepted submission and arm the deadline.
    ///
    /// The deadline counts from dispatch, so time spent waiting for the
    /// submission call is part of the job's budget.
    ///
    /// Clears the previous job's result, failure, progress, and advisory.
    pub fn begin(&mut self, submission: &Submission) -> Result<JobId, CoreError> {
        if let Some(job) = self.job().filter(|j| j.is_pending()) {
            return Err(CoreError::Conflict(format!(
                "Job {} is still pending",
                job.id
            )));
        }

        let id = self.next_job_id;
        self.next_job_id += 1;

        let job = Job::new(
            id,
            submission.connection_id.clone(),
            submission.accepted_at,
        );
        self.progress = None;
        self.advisory = None;
        self.state = Correlation::Pending {
            job,
            dispatched_at: submission.dispatched_at,
            deadline: Box::pin(tokio::time::sleep_until(
                submission.dispatched_at + self.timeout,
            )),
        };

        tracing::info!(
            job_id = id,
            connection_id = %submission.connection_id,
            timeout_secs = self.timeout.as_secs(),
            "Job pending",
        );
        Ok(id)
    }

    /// Resolves when the pending job's deadline passes.
    ///
    /// Never resolves while no job is pending. Cancel-safe, so it can be
    /// raced against inbound events in `tokio::select!`.
    pub async fn expired(&mut self) {
        match &mut self.state {
            Correlation::Pending { deadline, .. } => deadline.as_mut().await,
            _ => pending::<()>().await,
        }
    }

    /// Apply an inbound event received at `received_at`.
    pub fn apply(&mut self, event: InboundEvent, received_at: Instant) -> Applied {
        let kind = event.kind();
        let Correlation::Pending { job, dispatched_at, .. } = &self.state else {
            return Applied::Discarded(StaleEvent {
                kind,
                reason: StaleReason::NoPendingJob,
            });
        };
        if received_at < *dispatched_at {
            return Applied::Discarded(StaleEvent {
                kind,
                reason: StaleReason::PredatesSubmission,
            });
        }
        let job_id = job.id;

        match event {
            InboundEvent::Progress { message } => {
                self.progress = Some(message);
                Applied::Progress { job_id }
            }
            InboundEvent::Error { detail } => self.conclude(kind, |job| job.fail(detail)),
            InboundEvent::Completed { result } => self.conclude(kind, |job| job.succeed(result)),
        }
    }

    /// Conclude the pending job as timed out.
    ///
    /// Call after [`expired`](Self::expired) resolves. The server-side job
    /// is not cancelled; only the local wait ends.
    pub fn on_timeout(&mut self) -> Applied {
        let applied = self.conclude("timeout", Job::time_out);
        if matches!(applied, Applied::Concluded { .. }) {
            self.advisory = Some(TIMEOUT_ADVISORY.to_string());
        }
        applied
    }

    /// Return a concluded job to `Idle` once the UI has consumed it.
    ///
    /// Returns `false` (and does nothing) while a job is pending.
    pub fn dismiss(&mut self) -> bool {
        if self.is_pending() {
            return false;
        }
        self.state = Correlation::Idle;
        self.progress = None;
        self.advisory = None;
        true
    }

    fn conclude(
        &mut self,
        kind: &'static str,
        transition: impl FnOnce(&mut Job) -> Result<(), CoreError>,
    ) -> Applied {
        // Taking the state drops the deadline together with `Pending`.
        let mut job = match std::mem::replace(&mut self.state, Correlation::Idle) {
            Correlation::Pending { job, .. } => job,
            other => {
                self.state = other;
                return Applied::Discarded(StaleEvent {
                    kind,
                    reason: StaleReason::NoPendingJob,
                });
            }
        };

        let outcome = transition(&mut job);
        let job_id = job.id;
        let status = job.status;
        self.state = Correlation::Concluded { job };

        match outcome {
            Ok(()) => {
                tracing::info!(job_id, status = status.as_str(), trigger = kind, "Job concluded");
                Applied::Concluded { job_id, status }
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Ignored conflicting job transition");
                Applied::Discarded(StaleEvent {
                    kind,
                    reason: StaleReason::NoPendingJob,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdesk_core::project::Chat;
    use agentdesk_core::types::ConnectionId;
    use assert_matches::assert_matches;

    const TIMEOUT: Duration = Duration::from_secs(480);

    fn submission() -> Submission {
        Submission {
            connection_id: ConnectionId::new("c1"),
            dispatched_at: Instant::now(),
            accepted_at: chrono::Utc::now(),
        }
    }

    fn chat(message: &str) -> Chat {
        Chat {
            id: "chat-1".into(),
            project_id: "p1".into(),
            user_email: "dev@example.com".into(),
            message: message.into(),
            pull_request_url: "https://github.com/acme/app/pull/1".into(),
            created_at: "2025-09-01T10:00:00Z".into(),
            chat_url: String::new(),
            seen: false,
        }
    }

    fn progress(message: &str) -> InboundEvent {
        InboundEvent::Progress {
            message: message.into(),
        }
    }

    fn completed(message: &str) -> InboundEvent {
        InboundEvent::Completed {
            result: chat(message),
        }
    }

    fn error(detail: &str) -> InboundEvent {
        InboundEvent::Error {
            detail: detail.into(),
        }
    }

    /// True if the deadline future resolves within `within`.
    async fn fires_within(correlator: &mut OutcomeCorrelator, within: Duration) -> bool {
        tokio::time::timeout(within, correlator.expired()).await.is_ok()
    }

    #[tokio::test(start_paused = true)]
    async fn starts_idle_and_ignores_events() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        assert_eq!(correlator.state(), CorrelationState::Idle);

        let applied = correlator.apply(completed("ghost"), Instant::now());
        assert_eq!(
            applied,
            Applied::Discarded(StaleEvent {
                kind: "completed",
                reason: StaleReason::NoPendingJob
            })
        );
        assert!(correlator.job().is_none());
        assert!(!fires_within(&mut correlator, TIMEOUT * 2).await);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_then_completion_succeeds() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        let job_id = correlator.begin(&submission()).unwrap();
        assert_eq!(correlator.state(), CorrelationState::Pending);

        assert_eq!(
            correlator.apply(progress("step 1"), Instant::now()),
            Applied::Progress { job_id }
        );
        assert_eq!(correlator.progress(), Some("step 1"));
        assert_eq!(correlator.state(), CorrelationState::Pending);

        assert_eq!(
            correlator.apply(completed("R"), Instant::now()),
            Applied::Concluded {
                job_id,
                status: JobStatus::Succeeded
            }
        );
        assert_eq!(correlator.result().unwrap().message, "R");
        assert_eq!(
            correlator.job().unwrap().submitted_connection_id,
            ConnectionId::new("c1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn error_event_fails_job() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        let job_id = correlator.begin(&submission()).unwrap();

        assert_eq!(
            correlator.apply(error("rate limited"), Instant::now()),
            Applied::Concluded {
                job_id,
                status: JobStatus::Failed
            }
        );
        assert_eq!(correlator.failure(), Some("rate limited"));
        assert!(correlator.result().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_terminal_transition() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        correlator.begin(&submission()).unwrap();

        correlator.apply(completed("first"), Instant::now());
        let late = [error("late"), completed("second"), progress("late step")];
        for event in late {
            assert_matches!(correlator.apply(event, Instant::now()), Applied::Discarded(_));
        }
        assert_matches!(correlator.on_timeout(), Applied::Discarded(_));

        assert_eq!(correlator.state(), CorrelationState::Succeeded);
        assert_eq!(correlator.result().unwrap().message, "first");
        assert!(correlator.failure().is_none());
        assert!(correlator.progress().is_none());
        assert!(correlator.advisory().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_once_and_is_not_rearmed() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        let job_id = correlator.begin(&submission()).unwrap();

        assert!(!fires_within(&mut correlator, TIMEOUT - Duration::from_secs(1)).await);
        assert!(fires_within(&mut correlator, Duration::from_secs(2)).await);
        assert_eq!(
            correlator.on_timeout(),
            Applied::Concluded {
                job_id,
                status: JobStatus::TimedOut
            }
        );
        assert_eq!(correlator.advisory(), Some(TIMEOUT_ADVISORY));

        assert!(!fires_within(&mut correlator, TIMEOUT * 3).await);
        assert_eq!(correlator.state(), CorrelationState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_after_timeout_is_discarded() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        correlator.begin(&submission()).unwrap();
        correlator.expired().await;
        correlator.on_timeout();

        tokio::time::advance(Duration::from_secs(1)).await;
        let applied = correlator.apply(completed("R2"), Instant::now());

        assert_matches!(
            applied,
            Applied::Discarded(StaleEvent {
                reason: StaleReason::NoPendingJob,
                ..
            })
        );
        assert_eq!(correlator.state(), CorrelationState::TimedOut);
        assert!(correlator.result().is_none());
        assert!(correlator.failure().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concluded_job_releases_its_deadline() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        correlator.begin(&submission()).unwrap();
        correlator.apply(error("boom"), Instant::now());

        assert!(!fires_within(&mut correlator, TIMEOUT * 2).await);
        assert_eq!(correlator.state(), CorrelationState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn begin_while_pending_is_a_conflict() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        let first = correlator.begin(&submission()).unwrap();
        correlator.apply(progress("working"), Instant::now());

        assert_matches!(correlator.begin(&submission()), Err(CoreError::Conflict(_)));
        assert_eq!(correlator.job().unwrap().id, first);
        assert_eq!(correlator.progress(), Some("working"));
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_rearms_and_clears_previous_outcome() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        correlator.begin(&submission()).unwrap();
        correlator.expired().await;
        correlator.on_timeout();

        let second = correlator.begin(&submission()).unwrap();
        assert_eq!(second, 2);
        assert_eq!(correlator.state(), CorrelationState::Pending);
        assert!(correlator.advisory().is_none());

        assert!(fires_within(&mut correlator, TIMEOUT + Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn event_received_before_dispatch_is_stale() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        let received_earlier = Instant::now();
        tokio::time::advance(Duration::from_secs(5)).await;

        correlator.begin(&submission()).unwrap();
        let applied = correlator.apply(completed("old job"), received_earlier);

        assert_eq!(
            applied,
            Applied::Discarded(StaleEvent {
                kind: "completed",
                reason: StaleReason::PredatesSubmission
            })
        );
        assert_eq!(correlator.state(), CorrelationState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_returns_to_idle_but_not_while_pending() {
        let mut correlator = OutcomeCorrelator::new(TIMEOUT);
        correlator.begin(&submission()).unwrap();
        assert!(!correlator.dismiss());
        assert_eq!(correlator.state(), CorrelationState::Pending);

        correlator.apply(completed("R"), Instant::now());
        assert!(correlator.dismiss());
        assert_eq!(correlator.state(), CorrelationState::Idle);
        assert!(correlator.result().is_none());
    }
}
