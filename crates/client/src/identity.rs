//! Binding the duplex connection to a client identity.
//!
//! The server routes pushes by identity as well as by connection id, so
//! every new connection must announce who it belongs to. The binder keeps a
//! single binding (re-binding replaces it) and sends `register` at most once
//! per connection.

use std::sync::Arc;

use agentdesk_core::types::{ConnectionId, Identity};

use crate::connection::ConnectionRegistry;
use crate::messages::OutboundMessage;

pub struct IdentityBinder {
    registry: Arc<dyn ConnectionRegistry>,
    identity: Option<Identity>,
    /// Connection the current identity was last registered on.
    registered_on: Option<ConnectionId>,
}

impl IdentityBinder {
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            registry,
            identity: None,
            registered_on: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Bind `raw` as the client identity.
    ///
    /// Blank input is a no-op. If a connection is already open the
    /// registration is sent immediately; otherwise it goes out on the next
    /// ready notification. Returns `true` if the bound identity changed.
    pub fn bind(&mut self, raw: &str) -> bool {
        let Some(identity) = Identity::parse(raw) else {
            tracing::debug!("Ignoring bind with empty identity");
            return false;
        };

        let changed = self.identity.as_ref() != Some(&identity);
        if changed {
            tracing::info!(identity = %identity, "Binding client identity");
            self.identity = Some(identity);
            self.registered_on = None;
        }

        if let Some(connection_id) = self.registry.current_id() {
            self.register(&connection_id);
        }
        changed
    }

    /// Announce the bound identity on a freshly opened connection.
    pub fn handle_ready(&mut self, connection_id: &ConnectionId) {
        self.register(connection_id);
    }

    pub fn handle_closed(&mut self, connection_id: &ConnectionId) {
        if self.registered_on.as_ref() == Some(connection_id) {
            self.registered_on = None;
        }
    }

    fn register(&mut self, connection_id: &ConnectionId) {
        let Some(identity) = self.identity.clone() else {
            return;
        };
        if self.registered_on.as_ref() == Some(connection_id) {
            return;
        }
        // A queued ready notice may name a connection that is already gone;
        // `send` would deliver on the newer one.
        if self.registry.current_id().as_ref() != Some(connection_id) {
            tracing::debug!(connection_id = %connection_id, "Skipping registration for superseded connection");
            return;
        }

        match self.registry.send(OutboundMessage::Register {
            identity: identity.clone(),
        }) {
            Ok(()) => {
                tracing::info!(identity = %identity, connection_id = %connection_id, "Registered identity with agent");
                self.registered_on = Some(connection_id.clone());
            }
            Err(e) => {
                // Retried on the next ready notification.
                tracing::warn!(connection_id = %connection_id, error = %e, "Failed to register identity");
            }
        }
    }
}
