use std::sync::Arc;

use crate::chat::channels::ChannelResolver;
use crate::db::DbPool;
use crate::notify::email::EmailTransport;
use crate::notify::push::PushTransport;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Active WebSocket connection per user
    pub connections: Arc<ConnectionRegistry>,
    /// Conversation-to-channel mappings and memberships
    pub channels: Arc<ChannelResolver>,
    /// Web-push delivery transport
    pub push: Arc<dyn PushTransport>,
    /// Email fallback transport
    pub email: Arc<dyn EmailTransport>,
}

#[cfg(test)]
pub mod test_support {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;

    use super::AppState;
    use crate::chat::channels::ChannelResolver;
    use crate::db::migrations;
    use crate::notify::email::SandboxMailer;
    use crate::notify::push::SandboxPush;
    use crate::ws::ConnectionRegistry;

    /// In-memory state for unit tests: migrated SQLite database, empty
    /// registries, sandbox transports.
    pub fn test_state() -> AppState {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        migrations::migrations().to_latest(&mut conn).unwrap();

        AppState {
            db: Arc::new(Mutex::new(conn)),
            jwt_secret: vec![7u8; 32],
            connections: Arc::new(ConnectionRegistry::new()),
            channels: Arc::new(ChannelResolver::new()),
            push: Arc::new(SandboxPush),
            email: Arc::new(SandboxMailer),
        }
    }

    /// Insert a user row directly. Returns the id passed in.
    pub fn seed_user(state: &AppState, id: &str, display_name: &str) -> String {
        let conn = state.db.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, display_name, email, push_subscription, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            rusqlite::params![
                id,
                display_name,
                format!("{id}@example.test"),
                crate::db::now_rfc3339()
            ],
        )
        .unwrap();
        id.to_string()
    }
}
