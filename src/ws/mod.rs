pub mod actor;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Connection registry: tracks the live WebSocket connection per user.
///
/// At most one transport handle per user id — a reconnect silently replaces
/// the prior handle (last connect wins, no multiplexing). Held in `AppState`
/// behind an `Arc`; a multi-instance deployment would swap this for a shared
/// store behind the same interface.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: DashMap<String, ConnectionSender>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Record (or overwrite) the transport handle for a user. Overwrite is
    /// not an error: the replaced connection simply stops receiving pushes.
    pub fn register(&self, user_id: &str, tx: ConnectionSender) {
        self.inner.insert(user_id.to_string(), tx);
        tracing::debug!(user_id = %user_id, "Connection registered");
    }

    /// The live transport handle for a user, if connected.
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionSender> {
        self.inner.get(user_id).map(|e| e.value().clone())
    }

    /// Remove the mapping on disconnect. Only removes the entry if it still
    /// belongs to the disconnecting connection — a reconnect may already
    /// have replaced it.
    pub fn unregister(&self, user_id: &str, tx: &ConnectionSender) {
        self.inner
            .remove_if(user_id, |_, current| current.same_channel(tx));
        tracing::debug!(user_id = %user_id, "Connection unregistered");
    }

    /// Serialize an event and push it to a user's connection, if present.
    /// Returns whether a live connection existed. Send failures mean the
    /// connection is tearing down; the actor cleans up on its own.
    pub fn send_json<T: Serialize>(&self, user_id: &str, event: &T) -> bool {
        let Some(tx) = self.lookup(user_id) else {
            return false;
        };
        match serde_json::to_string(event) {
            Ok(text) => {
                let _ = tx.send(axum::extract::ws::Message::Text(text.into()));
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize ws event");
                false
            }
        }
    }
}
