//! JSON wire protocol for the realtime transport.
//!
//! Frames are serde-tagged envelopes: `{"type": "send_message", ...}`.
//! Errors raised by a client frame are reported to that client only.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::chat;
use crate::error::CoreError;
use crate::notify::Notification;
use crate::state::AppState;
use crate::ws::ConnectionSender;

/// Client → server events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage {
        recipient_id: String,
        body: String,
        conversation_key: Option<String>,
    },
    JoinConversation {
        conversation_key: String,
        other_user_id: String,
    },
    LeaveConversation {
        channel_id: String,
    },
    MarkRead {
        other_user_id: String,
    },
}

/// Server → client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Joined {
        channel_id: String,
    },
    /// A chat message, enriched with the sender's display name. Delivered
    /// over the channel broadcast and, redundantly, straight to the
    /// recipient's connection — consumers de-duplicate by message id.
    NewMessage {
        message: MessageEvent,
    },
    Notification {
        notification: Notification,
    },
    ReadReceipt {
        reader_id: String,
        count: u64,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageEvent {
    pub id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub body: String,
    pub conversation_key: Option<String>,
    pub created_at: String,
}

/// Parse and dispatch one text frame from an authenticated connection.
pub async fn handle_text_frame(text: &str, tx: &ConnectionSender, state: &AppState, user_id: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(user_id = %user_id, error = %e, "Unparseable ws frame");
            send_error(tx, &format!("malformed frame: {e}"));
            return;
        }
    };

    let result = match event {
        ClientEvent::SendMessage {
            recipient_id,
            body,
            conversation_key,
        } => chat::messages::deliver_message(state, user_id, &recipient_id, &body, conversation_key)
            .await
            .map(|_| ()),
        ClientEvent::JoinConversation {
            conversation_key,
            other_user_id,
        } => chat::channels::join_conversation(state, user_id, &conversation_key, &other_user_id)
            .await
            .map(|channel_id| {
                send_event(tx, &ServerEvent::Joined { channel_id });
            }),
        ClientEvent::LeaveConversation { channel_id } => {
            // Safe to call when not joined — a no-op, not an error.
            state.channels.leave(user_id, &channel_id);
            Ok(())
        }
        ClientEvent::MarkRead { other_user_id } => {
            chat::messages::mark_messages_read(state, user_id, &other_user_id)
                .await
                .map(|_| ())
        }
    };

    if let Err(e) = result {
        // Surfaced to the offending caller only, never broadcast.
        match &e {
            CoreError::Db(_) | CoreError::Internal(_) => {
                tracing::error!(user_id = %user_id, error = %e, "ws frame failed");
                send_error(tx, "internal error");
            }
            other => send_error(tx, &other.to_string()),
        }
    }
}

/// Serialize a server event onto a specific connection.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text.into()));
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize ws event");
        }
    }
}

fn send_error(tx: &ConnectionSender, message: &str) {
    send_event(
        tx,
        &ServerEvent::Error {
            message: message.to_string(),
        },
    );
}
