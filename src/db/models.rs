//! Row structs and shared query helpers.

use rusqlite::Connection;
use serde::Serialize;

use crate::error::CoreError;

/// A row from the `users` table. The user directory collaborator:
/// the core reads display name, email, and push subscription from here.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub email: String,
    /// Opaque push subscription descriptor (JSON), if the user registered one.
    pub push_subscription: Option<String>,
    pub created_at: String,
}

/// A row from the `messages` table. Immutable except for the read flag.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub conversation_key: Option<String>,
    pub read: bool,
    pub created_at: String,
}

/// Look up a user by id.
pub fn get_user(conn: &Connection, user_id: &str) -> Result<User, CoreError> {
    conn.query_row(
        "SELECT id, display_name, email, push_subscription, created_at
         FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                display_name: row.get(1)?,
                email: row.get(2)?,
                push_subscription: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            CoreError::NotFound(format!("user {user_id}"))
        }
        other => CoreError::Db(other),
    })
}

pub(crate) fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        body: row.get(3)?,
        conversation_key: row.get(4)?,
        read: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}
