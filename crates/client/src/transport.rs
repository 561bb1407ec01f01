//! WebSocket connector for the agent duplex channel.
//!
//! [`WsConnector`] holds the endpoint configuration. Each call to
//! [`WsConnector::connect`] generates a fresh [`ConnectionId`] and opens a
//! live [`WsConnection`] keyed by it.

use agentdesk_core::job_events::CONNECTION_ID_QUERY_PARAM;
use agentdesk_core::types::ConnectionId;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type used for the agent channel.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Endpoint configuration for the agent WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_url: String,
}

/// A live WebSocket connection to the agent server.
pub struct WsConnection {
    /// Id the server uses to address pushes to this connection.
    pub connection_id: ConnectionId,
    pub ws_stream: WsStream,
}

impl WsConnector {
    /// * `ws_url` - WebSocket endpoint, e.g. `ws://host:8000/ws`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Handshake URL for a given connection id.
    pub fn handshake_url(&self, connection_id: &ConnectionId) -> String {
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}{CONNECTION_ID_QUERY_PARAM}={connection_id}",
            self.ws_url
        )
    }

    /// Open a new connection under a freshly generated id.
    pub async fn connect(&self) -> Result<WsConnection, ConnectionError> {
        let connection_id = ConnectionId::generate();
        let url = self.handshake_url(&connection_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ConnectionError::Connection(format!(
                "Failed to connect to agent at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            connection_id = %connection_id,
            "Connected to agent at {}",
            self.ws_url,
        );

        Ok(WsConnection {
            connection_id,
            ws_stream,
        })
    }
}

/// Errors from the duplex channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No connection is currently open.
    #[error("Not connected to the agent")]
    NotConnected,
}
