#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use agentdesk_client::api::{ApiError, JobApi, JobSubmission};
use agentdesk_client::config::ClientConfig;
use agentdesk_client::connection::{ConnectionEvent, ConnectionRegistry};
use agentdesk_client::events::JobView;
use agentdesk_client::messages::OutboundMessage;
use agentdesk_client::session::{AgentSession, SessionHandle};
use agentdesk_client::submitter::SubmitRequest;
use agentdesk_client::transport::ConnectionError;
use agentdesk_core::job::InboundEvent;
use agentdesk_core::project::{Chat, Project};
use agentdesk_core::types::{ConnectionId, Identity};

pub const TIMEOUT: Duration = Duration::from_secs(480);
pub const PROJECT_ID: &str = "p1";
pub const IDENTITY: &str = "dev@example.com";

// ---------------------------------------------------------------------------
// Fake connection registry
// ---------------------------------------------------------------------------

/// In-memory registry driven by the test.
pub struct FakeRegistry {
    current: Mutex<Option<ConnectionId>>,
    events: broadcast::Sender<ConnectionEvent>,
    sent: Mutex<Vec<(ConnectionId, OutboundMessage)>>,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(None),
            events: broadcast::channel(64).0,
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Open a connection and announce it.
    pub fn connect(&self, id: &str) -> ConnectionId {
        let connection_id = ConnectionId::new(id);
        *self.current.lock().unwrap() = Some(connection_id.clone());
        let _ = self.events.send(ConnectionEvent::Ready {
            connection_id: connection_id.clone(),
        });
        connection_id
    }

    /// Drop the current connection and announce it.
    pub fn disconnect(&self) {
        if let Some(connection_id) = self.current.lock().unwrap().take() {
            let _ = self.events.send(ConnectionEvent::Closed { connection_id });
        }
    }

    /// Deliver an agent event on the current connection, received now.
    pub fn push(&self, event: InboundEvent) {
        self.push_received_at(event, Instant::now());
    }

    pub fn push_received_at(&self, event: InboundEvent, received_at: Instant) {
        let connection_id = self
            .current_id()
            .unwrap_or_else(|| ConnectionId::new("detached"));
        let _ = self.events.send(ConnectionEvent::Inbound {
            connection_id,
            event,
            received_at,
        });
    }

    pub fn sent(&self) -> Vec<(ConnectionId, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

impl ConnectionRegistry for FakeRegistry {
    fn current_id(&self) -> Option<ConnectionId> {
        self.current.lock().unwrap().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn send(&self, message: OutboundMessage) -> Result<(), ConnectionError> {
        let current = self.current_id().ok_or(ConnectionError::NotConnected)?;
        self.sent.lock().unwrap().push((current, message));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake agent API
// ---------------------------------------------------------------------------

/// In-memory backend holding a single project. Each accepted submission
/// consumes one request of quota.
pub struct FakeApi {
    submissions: Mutex<Vec<JobSubmission>>,
    submit_failure: Mutex<Option<(u16, String)>>,
    fetches: AtomicUsize,
    requests_available: AtomicI64,
}

impl FakeApi {
    pub fn new(requests_available: i64) -> Arc<Self> {
        Arc::new(Self {
            submissions: Mutex::new(Vec::new()),
            submit_failure: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            requests_available: AtomicI64::new(requests_available),
        })
    }

    /// Make the next submission call fail with the given status.
    pub fn fail_next_submit(&self, status: u16, message: &str) {
        *self.submit_failure.lock().unwrap() = Some((status, message.to_string()));
    }

    pub fn submissions(&self) -> Vec<JobSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for FakeApi {
    async fn submit_job(&self, submission: &JobSubmission) -> Result<(), ApiError> {
        if let Some((status, message)) = self.submit_failure.lock().unwrap().take() {
            return Err(ApiError::Status { status, message });
        }
        self.submissions.lock().unwrap().push(submission.clone());
        self.requests_available.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_projects(&self) -> Result<Vec<Project>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Project {
            id: PROJECT_ID.into(),
            email: IDENTITY.into(),
            repo: None,
            users: vec![],
            chats: vec![],
            requests_available: self.requests_available.load(Ordering::SeqCst),
            selected_model: None,
        }])
    }
}

/// Backend whose submission call never completes.
pub struct HangingApi;

#[async_trait]
impl JobApi for HangingApi {
    async fn submit_job(&self, _submission: &JobSubmission) -> Result<(), ApiError> {
        std::future::pending().await
    }

    async fn fetch_projects(&self) -> Result<Vec<Project>, ApiError> {
        Ok(vec![])
    }
}

// ---------------------------------------------------------------------------
// Session helpers
// ---------------------------------------------------------------------------

pub struct TestSession {
    pub handle: SessionHandle,
    pub registry: Arc<FakeRegistry>,
    pub api: Arc<FakeApi>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<()>,
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        identity: Identity::parse(IDENTITY),
        job_timeout: TIMEOUT,
        ..ClientConfig::default()
    }
}

/// Spawn a session against fresh fakes and wait for its startup fetch.
pub async fn start_session(requests_available: i64) -> TestSession {
    start_session_with(test_config(), FakeApi::new(requests_available)).await
}

pub async fn start_session_with(config: ClientConfig, api: Arc<FakeApi>) -> TestSession {
    let cancel = CancellationToken::new();
    let (handle, join, registry) = spawn_session(config, api.clone(), &cancel).await;

    TestSession {
        handle,
        registry,
        api,
        cancel,
        join,
    }
}

/// Spawn a session against any API and wait for its startup fetch.
pub async fn spawn_session(
    config: ClientConfig,
    api: Arc<dyn JobApi>,
    cancel: &CancellationToken,
) -> (SessionHandle, JoinHandle<()>, Arc<FakeRegistry>) {
    let registry = FakeRegistry::new();
    let (handle, join) = AgentSession::spawn(registry.clone(), api, &config, cancel);

    let mut records = handle.records();
    tokio::time::timeout(
        Duration::from_secs(1),
        records.wait_for(|r| r.fetched_at.is_some()),
    )
    .await
    .expect("startup fetch did not complete")
    .expect("session stopped");

    (handle, join, registry)
}

/// Wait until the job view satisfies `pred`.
pub async fn wait_for_view(handle: &SessionHandle, pred: impl Fn(&JobView) -> bool) -> JobView {
    let mut rx = handle.watch_view();
    let view = tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|v| pred(v)))
        .await
        .expect("timed out waiting for job view")
        .expect("session stopped");
    (*view).clone()
}

/// Let the session task drain everything it can without advancing time.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn request(payload: &str) -> SubmitRequest {
    SubmitRequest {
        project_id: PROJECT_ID.into(),
        payload: payload.into(),
        model: None,
    }
}

pub fn chat(message: &str) -> Chat {
    Chat {
        id: "chat-1".into(),
        project_id: PROJECT_ID.into(),
        user_email: IDENTITY.into(),
        message: message.into(),
        pull_request_url: "https://github.com/acme/app/pull/7".into(),
        created_at: "2025-09-01T10:00:00Z".into(),
        chat_url: String::new(),
        seen: false,
    }
}

pub fn progress(message: &str) -> InboundEvent {
    InboundEvent::Progress {
        message: message.into(),
    }
}

pub fn completed(message: &str) -> InboundEvent {
    InboundEvent::Completed {
        result: chat(message),
    }
}

pub fn failed(detail: &str) -> InboundEvent {
    InboundEvent::Error {
        detail: detail.into(),
    }
}
