//! The agent session: one task that owns all correlation state.
//!
//! [`AgentSession::spawn`] starts a task that multiplexes connection
//! events, the pending job's deadline, and caller commands in a single
//! `tokio::select!` loop. Because every state change happens on that task,
//! a terminal event and a timeout can never both conclude the same job.
//!
//! Callers interact through a cloneable [`SessionHandle`].

use std::sync::Arc;

use agentdesk_core::job::{JobStatus, TIMEOUT_ADVISORY};
use agentdesk_core::types::{ConnectionId, JobId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::JobApi;
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionRegistry};
use crate::correlator::{Applied, OutcomeCorrelator};
use crate::events::{JobView, SessionEvent};
use crate::identity::IdentityBinder;
use crate::reconciler::{ConsistencyReconciler, RecordSet};
use crate::submitter::{InvalidState, JobSubmitter, SubmitContext, SubmitError, SubmitRequest};

/// Capacity of the session event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the command queue.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("Agent session has stopped")]
    Closed,
}

enum SessionCommand {
    Submit {
        request: SubmitRequest,
        reply: oneshot::Sender<Result<JobId, SubmitError>>,
    },
    BindIdentity(String),
    Dismiss,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view_rx: watch::Receiver<JobView>,
    records_rx: watch::Receiver<RecordSet>,
    events_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Submit a job. Resolves once the server accepted (or refused) the
    /// submission; the outcome arrives later through the view and events.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobId, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Submit { request, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(reply_rx.await.map_err(|_| SessionError::Closed)??)
    }

    /// Bind the client identity. Blank input is ignored.
    pub async fn bind_identity(&self, identity: impl Into<String>) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::BindIdentity(identity.into()))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Return a concluded job to idle and clear surfaced errors.
    pub async fn dismiss(&self) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Dismiss)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Current job snapshot.
    pub fn view(&self) -> JobView {
        self.view_rx.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<JobView> {
        self.view_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Latest authoritative records.
    pub fn records(&self) -> watch::Receiver<RecordSet> {
        self.records_rx.clone()
    }

    /// Stop the session task. Pending jobs are abandoned locally.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub struct AgentSession;

impl AgentSession {
    /// Spawn the session task.
    ///
    /// Subscribes to `registry` before returning, so no connection event
    /// published after this call is missed. The task exits when `cancel`
    /// fires, [`SessionHandle::shutdown`] is called, or every handle is
    /// dropped.
    pub fn spawn(
        registry: Arc<dyn ConnectionRegistry>,
        api: Arc<dyn JobApi>,
        config: &ClientConfig,
        cancel: &CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (view_tx, view_rx) = watch::channel(JobView::default());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = cancel.child_token();

        let reconciler = ConsistencyReconciler::new(Arc::clone(&api));
        let records_rx = reconciler.subscribe();

        let task = SessionTask {
            connection_rx: registry.subscribe(),
            commands: commands_rx,
            binder: IdentityBinder::new(Arc::clone(&registry)),
            submitter: JobSubmitter::new(registry, api),
            correlator: OutcomeCorrelator::new(config.job_timeout),
            reconciler,
            view_tx,
            events_tx: events_tx.clone(),
            transport_error: None,
            cancel: cancel.clone(),
        };
        let initial_identity = config.identity.clone();

        let join = tokio::spawn(async move {
            tracing::info!(timeout_secs = task.correlator.timeout().as_secs(), "Agent session started");
            task.run(initial_identity.as_ref().map(|i| i.as_str())).await;
            tracing::info!("Agent session stopped");
        });

        let handle = SessionHandle {
            commands: commands_tx,
            view_rx,
            records_rx,
            events_tx,
            cancel,
        };
        (handle, join)
    }
}

struct SessionTask {
    connection_rx: broadcast::Receiver<ConnectionEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    binder: IdentityBinder,
    submitter: JobSubmitter,
    correlator: OutcomeCorrelator,
    reconciler: ConsistencyReconciler,
    view_tx: watch::Sender<JobView>,
    events_tx: broadcast::Sender<SessionEvent>,
    /// Last submission call failure, cleared by the next accepted
    /// submission or a dismiss.
    transport_error: Option<String>,
    cancel: CancellationToken,
}

impl SessionTask {
    async fn run(mut self, initial_identity: Option<&str>) {
        if let Some(identity) = initial_identity {
            self.binder.bind(identity);
        }
        self.refresh_records("startup").await;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                event = self.connection_rx.recv() => match event {
                    Ok(event) => self.handle_connection_event(event).await,
                    Err(RecvError::Lagged(skipped)) => self.handle_lagged(skipped),
                    Err(RecvError::Closed) => {
                        tracing::warn!("Connection registry went away");
                        break;
                    }
                },

                _ = self.correlator.expired() => self.handle_timeout(),

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Ready { connection_id } => {
                self.binder.handle_ready(&connection_id);
                self.emit(SessionEvent::Connected { connection_id });
            }
            ConnectionEvent::Closed { connection_id } => {
                self.binder.handle_closed(&connection_id);
                self.warn_if_pending_on(&connection_id);
                self.emit(SessionEvent::Disconnected { connection_id });
            }
            ConnectionEvent::Inbound {
                connection_id,
                event,
                received_at,
            } => {
                tracing::debug!(connection_id = %connection_id, kind = event.kind(), "Inbound agent event");
                let applied = self.correlator.apply(event, received_at);
                self.handle_applied(applied).await;
            }
        }
    }

    fn handle_lagged(&self, skipped: u64) {
        match self.correlator.job().filter(|j| j.is_pending()) {
            Some(job) => tracing::error!(
                job_id = job.id,
                skipped,
                "Dropped connection events while a job is pending; its outcome may be lost",
            ),
            None => tracing::warn!(skipped, "Session lagged behind connection events"),
        }
    }

    fn warn_if_pending_on(&self, connection_id: &ConnectionId) {
        let Some(job) = self.correlator.job().filter(|j| j.is_pending()) else {
            return;
        };
        if &job.submitted_connection_id == connection_id {
            tracing::warn!(
                job_id = job.id,
                connection_id = %connection_id,
                "Connection of pending job closed; waiting for identity-routed outcome or timeout",
            );
        }
    }

    async fn handle_applied(&mut self, applied: Applied) {
        match applied {
            Applied::Progress { job_id } => {
                let message = self.correlator.progress().unwrap_or_default().to_string();
                self.emit(SessionEvent::JobProgress { job_id, message });
                self.publish_view();
            }
            Applied::Concluded {
                job_id,
                status: JobStatus::Succeeded,
            } => {
                if let Some(result) = self.correlator.result().cloned() {
                    self.emit(SessionEvent::JobSucceeded { job_id, result });
                }
                self.publish_view();
                if let Some(count) = self.reconciler.reconcile().await {
                    self.emit(SessionEvent::RecordsRefreshed { count });
                }
            }
            Applied::Concluded {
                job_id,
                status: JobStatus::Failed,
            } => {
                let detail = self.correlator.failure().unwrap_or_default().to_string();
                self.emit(SessionEvent::JobFailed { job_id, detail });
                self.publish_view();
            }
            Applied::Concluded { job_id, status } => {
                tracing::warn!(job_id, status = status.as_str(), "Unexpected conclusion from inbound event");
                self.publish_view();
            }
            Applied::Discarded(stale) => {
                tracing::debug!(kind = stale.kind, reason = ?stale.reason, "Discarded stale agent event");
            }
        }
    }

    fn handle_timeout(&mut self) {
        if let Applied::Concluded { job_id, .. } = self.correlator.on_timeout() {
            let advisory = self.correlator.advisory().unwrap_or_default().to_string();
            tracing::warn!(job_id, "Agent job timed out waiting for an outcome");
            self.emit(SessionEvent::JobTimedOut { job_id, advisory });
            self.publish_view();
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Submit { request, reply } => {
                let outcome = self.submit(request).await;
                // The caller may have stopped waiting.
                let _ = reply.send(outcome);
            }
            SessionCommand::BindIdentity(raw) => {
                if self.binder.bind(&raw) {
                    self.refresh_records("identity_changed").await;
                }
            }
            SessionCommand::Dismiss => {
                if self.correlator.dismiss() {
                    self.transport_error = None;
                    self.publish_view();
                } else {
                    tracing::debug!("Dismiss ignored while a job is pending");
                }
            }
        }
    }

    async fn submit(&mut self, request: SubmitRequest) -> Result<JobId, SubmitError> {
        let project = self.reconciler.project(&request.project_id);
        let ctx = SubmitContext {
            job_pending: self.correlator.is_pending(),
            identity: self.binder.identity(),
            project: project.as_ref(),
        };

        // The call is bounded by the job timeout and abandoned on shutdown.
        let attempt = tokio::time::timeout(
            self.correlator.timeout(),
            self.submitter.submit(&request, ctx),
        );
        let outcome = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                tracing::info!(project_id = %request.project_id, "Submission abandoned on shutdown");
                return Err(SubmitError::TransportFailure("Agent session stopped".to_string()));
            }

            outcome = attempt => outcome.unwrap_or_else(|_| {
                tracing::error!(
                    project_id = %request.project_id,
                    timeout_secs = self.correlator.timeout().as_secs(),
                    "Submission call did not complete in time",
                );
                Err(SubmitError::TransportFailure(TIMEOUT_ADVISORY.to_string()))
            }),
        };

        match outcome {
            Ok(submission) => {
                let job_id = self
                    .correlator
                    .begin(&submission)
                    .map_err(|_| SubmitError::InvalidState(InvalidState::JobPending))?;
                self.transport_error = None;
                self.emit(SessionEvent::JobStarted {
                    job_id,
                    connection_id: submission.connection_id,
                });
                self.publish_view();
                Ok(job_id)
            }
            Err(SubmitError::TransportFailure(detail)) => {
                // The previous outcome no longer describes what the user is looking at.
                self.correlator.dismiss();
                self.transport_error = Some(detail.clone());
                self.emit(SessionEvent::SubmissionFailed {
                    detail: detail.clone(),
                });
                self.publish_view();
                Err(SubmitError::TransportFailure(detail))
            }
            Err(SubmitError::InvalidState(reason)) => {
                tracing::info!(reason = %reason, "Submission rejected");
                self.emit(SessionEvent::SubmissionRejected {
                    reason: reason.to_string(),
                });
                Err(SubmitError::InvalidState(reason))
            }
        }
    }

    async fn refresh_records(&mut self, reason: &'static str) {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            outcome = self.reconciler.refresh(reason) => outcome,
        };
        match outcome {
            Ok(count) => self.emit(SessionEvent::RecordsRefreshed { count }),
            Err(e) => tracing::warn!(reason, error = %e, "Failed to fetch records"),
        }
    }

    fn publish_view(&self) {
        let job = self.correlator.job();
        let view = JobView {
            status: self.correlator.state(),
            job_id: job.map(|j| j.id),
            started_at: job.map(|j| j.started_at),
            progress: self.correlator.progress().map(str::to_string),
            result: self.correlator.result().cloned(),
            error: self
                .transport_error
                .clone()
                .or_else(|| self.correlator.failure().map(str::to_string)),
            advisory: self.correlator.advisory().map(str::to_string),
        };
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}
