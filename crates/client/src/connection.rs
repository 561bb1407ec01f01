//! Connection registry: one persistent agent connection per client process.
//!
//! [`ConnectionRegistry`] is the seam the session depends on. Connection
//! lifecycle and inbound agent events are delivered as
//! [`ConnectionEvent`]s over a [`tokio::sync::broadcast`] channel; call
//! [`ConnectionRegistry::subscribe`] to receive them.
//!
//! [`WsConnectionRegistry`] is the production implementation. It spawns a
//! single task that connects, processes frames until the socket drops, and
//! reconnects with capped exponential backoff for as long as the registry
//! lives.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use agentdesk_core::job::InboundEvent;
use agentdesk_core::types::ConnectionId;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::messages::{parse_message, OutboundMessage};
use crate::reconnect::{reconnect_loop, Backoff, ReconnectConfig};
use crate::transport::{ConnectionError, WsConnector, WsStream};

/// Broadcast channel capacity for connection events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle and inbound traffic of the agent connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection was (re-)established. Fires once per connection.
    Ready { connection_id: ConnectionId },

    /// The connection with this id was closed and will never be reused.
    Closed { connection_id: ConnectionId },

    /// An agent event arrived on the given connection.
    Inbound {
        connection_id: ConnectionId,
        event: InboundEvent,
        /// Monotonic arrival time, used to detect events that predate a
        /// submission.
        received_at: Instant,
    },
}

/// Owner of the client's duplex connection.
pub trait ConnectionRegistry: Send + Sync {
    /// Id of the currently open connection, if any.
    fn current_id(&self) -> Option<ConnectionId>;

    /// Subscribe to connection lifecycle and inbound events.
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Queue a message on the current connection.
    ///
    /// Fails with [`ConnectionError::NotConnected`] while disconnected;
    /// nothing is buffered across reconnects.
    fn send(&self, message: OutboundMessage) -> Result<(), ConnectionError>;
}

/// WebSocket-backed [`ConnectionRegistry`].
pub struct WsConnectionRegistry {
    current: Arc<RwLock<Option<ConnectionId>>>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    cancel: CancellationToken,
    task_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WsConnectionRegistry {
    /// Spawn the connection task and return a shared handle.
    ///
    /// The task runs until `cancel` (or a child of it) is triggered, or
    /// [`shutdown`](Self::shutdown) is called.
    pub fn start(
        connector: WsConnector,
        reconnect: ReconnectConfig,
        cancel: &CancellationToken,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let current = Arc::new(RwLock::new(None));
        let cancel = cancel.child_token();

        let task = ConnectionTask {
            connector,
            backoff: Backoff::new(reconnect),
            current: Arc::clone(&current),
            event_tx: event_tx.clone(),
            outbound_rx,
            cancel: cancel.clone(),
        };

        let task_handle = tokio::spawn(async move {
            tracing::info!(ws_url = %task.connector.ws_url(), "Starting agent connection task");
            task.run().await;
            tracing::info!("Agent connection task exited");
        });

        Arc::new(Self {
            current,
            event_tx,
            outbound_tx,
            cancel,
            task_handle: Mutex::new(Some(task_handle)),
        })
    }

    /// Stop the connection task and wait up to 5 seconds for it to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down agent connection");
        self.cancel.cancel();

        let handle = self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        }
    }
}

impl ConnectionRegistry for WsConnectionRegistry {
    fn current_id(&self) -> Option<ConnectionId> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    fn send(&self, message: OutboundMessage) -> Result<(), ConnectionError> {
        if self.current_id().is_none() {
            return Err(ConnectionError::NotConnected);
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| ConnectionError::Protocol("Connection task has stopped".to_string()))
    }
}

/// State owned by the spawned connection task.
struct ConnectionTask {
    connector: WsConnector,
    backoff: Backoff,
    current: Arc<RwLock<Option<ConnectionId>>>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    /// Core connection loop: connect -> process frames -> reconnect.
    async fn run(mut self) {
        loop {
            let conn = match reconnect_loop(&self.connector, &mut self.backoff, &self.cancel).await
            {
                Some(conn) => conn,
                None => return,
            };
            let connection_id = conn.connection_id;

            // Anything queued for the previous connection is stale.
            while self.outbound_rx.try_recv().is_ok() {}

            self.set_current(Some(connection_id.clone()));
            let _ = self.event_tx.send(ConnectionEvent::Ready {
                connection_id: connection_id.clone(),
            });

            self.process(conn.ws_stream, &connection_id).await;

            self.set_current(None);
            let _ = self.event_tx.send(ConnectionEvent::Closed {
                connection_id: connection_id.clone(),
            });

            if self.cancel.is_cancelled() {
                return;
            }
            tracing::info!(connection_id = %connection_id, "Agent connection lost, reconnecting");
        }
    }

    fn set_current(&self, id: Option<ConnectionId>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Drive one connection until it closes, errors, or is cancelled.
    async fn process(&mut self, ws_stream: WsStream, connection_id: &ConnectionId) {
        let (mut sink, mut stream) = ws_stream.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                outbound = self.outbound_rx.recv() => {
                    let Some(message) = outbound else { break };
                    match message.to_json() {
                        Ok(json) => {
                            tracing::debug!(connection_id = %connection_id, kind = message.kind(), "Sending agent message");
                            if let Err(e) = sink.send(Message::Text(json)).await {
                                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket send error");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize outbound message");
                        }
                    }
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, connection_id);
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Handled automatically by tungstenite.
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(connection_id = %connection_id, ?frame, "Agent closed WebSocket");
                            break;
                        }
                        Some(Ok(_)) => {
                            tracing::trace!(connection_id = %connection_id, "Ignoring non-text frame");
                        }
                        Some(Err(e)) => {
                            tracing::error!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                            break;
                        }
                        None => {
                            tracing::info!(connection_id = %connection_id, "WebSocket stream exhausted");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str, connection_id: &ConnectionId) {
        match parse_message(text) {
            Ok(msg) => {
                let event = InboundEvent::from(msg);
                tracing::debug!(connection_id = %connection_id, kind = event.kind(), "Agent event received");
                let _ = self.event_tx.send(ConnectionEvent::Inbound {
                    connection_id: connection_id.clone(),
                    event,
                    received_at: Instant::now(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse agent message",
                );
            }
        }
    }
}
