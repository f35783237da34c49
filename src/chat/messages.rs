//! Message delivery pipeline and REST endpoints for chat.
//!
//! Delivery is deliberately at-least-once across two paths: the channel
//! broadcast and a direct emit to the recipient's connection. Clients
//! de-duplicate by message id.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::chat::channels::{self, ChannelResolver};
use crate::db::{models, now_rfc3339};
use crate::error::{join_err, CoreError};
use crate::notify::{self, NotificationKind, RelatedEntity};
use crate::state::AppState;
use crate::ws::protocol::{MessageEvent, ServerEvent};

/// Maximum message body length (chars).
const MAX_BODY_LENGTH: usize = 4000;
/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

/// Validate, persist, and fan out one chat message.
///
/// Contract: the persisted write is the primary effect and its errors
/// propagate. Broadcast, direct emit, and notification dispatch are
/// secondary — the notification runs in a detached task with its own error
/// boundary so a delivery failure never fails an already-persisted send.
pub async fn deliver_message(
    state: &AppState,
    sender_id: &str,
    recipient_id: &str,
    body: &str,
    conversation_key: Option<String>,
) -> Result<MessageEvent, CoreError> {
    let body = body.trim().to_string();
    if body.is_empty() {
        return Err(CoreError::Validation("message body is empty".into()));
    }
    if body.len() > MAX_BODY_LENGTH {
        return Err(CoreError::Validation("message body too long".into()));
    }
    if recipient_id.is_empty() {
        return Err(CoreError::Validation("recipient id is missing".into()));
    }

    let db = state.db.clone();
    let sender = sender_id.to_string();
    let recipient = recipient_id.to_string();
    let key = conversation_key.clone();
    let body_for_row = body.clone();

    // Persist first. Participant resolution happens in the same blocking
    // section since it needs the same connection.
    let (message, sender_name, participant_a, participant_b) =
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;

            let sender_row = models::get_user(&conn, &sender)?;
            models::get_user(&conn, &recipient)?;

            let (participant_a, participant_b) = match &key {
                Some(k) => {
                    let pair = channels::resolve_participants(&conn, k, &sender, &recipient)?;
                    if sender != pair.0 && sender != pair.1 {
                        return Err(CoreError::Forbidden(
                            "not a participant in this conversation".to_string(),
                        ));
                    }
                    // The recipient must be the other resolved participant;
                    // a keyed message cannot be rerouted to a bystander.
                    let counterpart = if sender == pair.0 { &pair.1 } else { &pair.0 };
                    if &recipient != counterpart {
                        return Err(CoreError::Validation(
                            "recipient is not a participant in this conversation".to_string(),
                        ));
                    }
                    pair
                }
                None => (sender.clone(), recipient.clone()),
            };

            let message = models::Message {
                id: Uuid::now_v7().to_string(),
                sender_id: sender.clone(),
                recipient_id: recipient.clone(),
                body: body_for_row,
                conversation_key: key.clone(),
                read: false,
                created_at: now_rfc3339(),
            };

            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, body, conversation_key, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![
                    message.id,
                    message.sender_id,
                    message.recipient_id,
                    message.body,
                    message.conversation_key,
                    message.created_at,
                ],
            )?;

            Ok((message, sender_row.display_name, participant_a, participant_b))
        })
        .await
        .map_err(join_err)??;

    let resolver_key = conversation_key
        .clone()
        .unwrap_or_else(|| ChannelResolver::adhoc_key(sender_id, recipient_id));
    let channel_id = state
        .channels
        .resolve(&resolver_key, &participant_a, &participant_b);

    let event = MessageEvent {
        id: message.id.clone(),
        channel_id: channel_id.clone(),
        sender_id: message.sender_id.clone(),
        sender_name: sender_name.clone(),
        recipient_id: message.recipient_id.clone(),
        body: message.body.clone(),
        conversation_key: message.conversation_key.clone(),
        created_at: message.created_at.clone(),
    };
    let server_event = ServerEvent::NewMessage {
        message: event.clone(),
    };

    // Broadcast to every transport joined to the channel.
    let members = state.channels.members_of(&channel_id);
    for member in &members {
        state.connections.send_json(member, &server_event);
    }

    // Direct emit when the recipient is connected but not in the channel.
    // Intentional at-least-once across the two paths.
    if !members.iter().any(|m| m == recipient_id) {
        state.connections.send_json(recipient_id, &server_event);
    }

    // Fire-and-forget notification; the send is already persisted and delivered.
    notify::dispatch_detached(
        state.clone(),
        message.recipient_id.clone(),
        NotificationKind::Message,
        format!("New message from {sender_name}"),
        Some(RelatedEntity::Message(message.id.clone())),
    );

    Ok(event)
}

/// Flip the read flag on every unread message from `other_user_id` to
/// `reader_id`. Idempotent: a second call flips zero additional rows.
pub async fn mark_messages_read(
    state: &AppState,
    reader_id: &str,
    other_user_id: &str,
) -> Result<u64, CoreError> {
    let db = state.db.clone();
    let reader = reader_id.to_string();
    let other = other_user_id.to_string();

    let count = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;
        let count = conn.execute(
            "UPDATE messages SET read = 1
             WHERE recipient_id = ?1 AND sender_id = ?2 AND read = 0",
            rusqlite::params![reader, other],
        )?;
        Ok::<_, CoreError>(count as u64)
    })
    .await
    .map_err(join_err)??;

    if count > 0 {
        state.connections.send_json(
            other_user_id,
            &ServerEvent::ReadReceipt {
                reader_id: reader_id.to_string(),
                count,
            },
        );
    }

    Ok(count)
}

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: String,
    pub body: String,
    pub conversation_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<models::Message>,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub count: u64,
}

// --- Handlers ---

/// POST /api/messages — Send a chat message. JWT auth required.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageEvent>), CoreError> {
    let event = deliver_message(
        &state,
        &claims.sub,
        &body.recipient_id,
        &body.body,
        body.conversation_key,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// Paginated two-way message history with one counterparty, newest first.
pub async fn message_history(
    state: &AppState,
    reader_id: &str,
    other_user_id: &str,
    page: u32,
    limit: u32,
) -> Result<HistoryResponse, CoreError> {
    let db = state.db.clone();
    let me = reader_id.to_string();
    let other = other_user_id.to_string();
    let limit = limit.clamp(1, MAX_LIMIT);
    // Offset in i64; page arrives unchecked from the query string.
    let offset = (i64::from(page.max(1)) - 1) * i64::from(limit);

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)",
            rusqlite::params![me, other],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, sender_id, recipient_id, body, conversation_key, read, created_at
             FROM messages
             WHERE (sender_id = ?1 AND recipient_id = ?2)
                OR (sender_id = ?2 AND recipient_id = ?1)
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let items: Vec<models::Message> = stmt
            .query_map(
                rusqlite::params![me, other, limit as i64, offset],
                models::message_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok::<_, CoreError>(HistoryResponse {
            items,
            total: total as u64,
        })
    })
    .await
    .map_err(join_err)?
}

/// GET /api/messages/{other_user_id}?page&limit
pub async fn get_history(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, CoreError> {
    let result = message_history(
        &state,
        &claims.sub,
        &other_user_id,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_LIMIT),
    )
    .await?;
    Ok(Json(result))
}

/// POST /api/messages/{other_user_id}/read
/// Mark all messages from the counterparty as read. Returns the flip count.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_user_id): Path<String>,
) -> Result<Json<MarkReadResponse>, CoreError> {
    let count = mark_messages_read(&state, &claims.sub, &other_user_id).await?;
    Ok(Json(MarkReadResponse { count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{seed_user, test_state};

    #[tokio::test]
    async fn delivered_message_is_persisted() {
        let state = test_state();
        seed_user(&state, "u1", "Alice");
        seed_user(&state, "u2", "Bob");

        let event = deliver_message(&state, "u1", "u2", "  hello  ", None)
            .await
            .unwrap();
        assert_eq!(event.body, "hello");
        assert_eq!(event.sender_name, "Alice");
        assert_eq!(event.channel_id, "u1:u2");

        let conn = state.db.lock().unwrap();
        let (body, read): (String, i64) = conn
            .query_row(
                "SELECT body, read FROM messages WHERE id = ?1",
                rusqlite::params![event.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(body, "hello");
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn send_validation_failures() {
        let state = test_state();
        seed_user(&state, "u1", "Alice");
        seed_user(&state, "u2", "Bob");

        let err = deliver_message(&state, "u1", "u2", "   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let err = deliver_message(&state, "u1", "", "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let err = deliver_message(&state, "u1", "ghost", "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let long = "x".repeat(MAX_BODY_LENGTH + 1);
        let err = deliver_message(&state, "u1", "u2", &long, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn outsider_cannot_post_into_a_request_conversation() {
        let state = test_state();
        seed_user(&state, "customer", "Cass");
        seed_user(&state, "provider", "Pat");
        seed_user(&state, "outsider", "Oz");
        {
            let conn = state.db.lock().unwrap();
            conn.execute(
                "INSERT INTO service_requests (id, customer_id, provider_id, created_at)
                 VALUES ('req1', 'customer', 'provider', ?1)",
                rusqlite::params![now_rfc3339()],
            )
            .unwrap();
        }

        let err = deliver_message(
            &state,
            "outsider",
            "provider",
            "hi",
            Some("req1".to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        // Participants are fine, whichever side sends.
        deliver_message(&state, "provider", "customer", "hi", Some("req1".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn keyed_message_cannot_target_a_bystander() {
        let state = test_state();
        seed_user(&state, "customer", "Cass");
        seed_user(&state, "provider", "Pat");
        seed_user(&state, "bystander", "Bix");
        {
            let conn = state.db.lock().unwrap();
            conn.execute(
                "INSERT INTO service_requests (id, customer_id, provider_id, created_at)
                 VALUES ('req1', 'customer', 'provider', ?1)",
                rusqlite::params![now_rfc3339()],
            )
            .unwrap();
        }

        // A participant sender cannot reroute a keyed message to someone
        // outside the conversation.
        let err = deliver_message(
            &state,
            "customer",
            "bystander",
            "hi",
            Some("req1".to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        // Nothing was persisted for the bystander.
        let conn = state.db.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = 'bystander'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn history_tolerates_extreme_page_numbers() {
        let state = test_state();
        seed_user(&state, "u1", "Alice");
        seed_user(&state, "u2", "Bob");
        deliver_message(&state, "u1", "u2", "hello", None).await.unwrap();

        let history = message_history(&state, "u2", "u1", u32::MAX, 2)
            .await
            .unwrap();
        assert_eq!(history.total, 1);
        assert!(history.items.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_conversation_key_is_an_error() {
        let state = test_state();
        seed_user(&state, "u1", "Alice");
        seed_user(&state, "u2", "Bob");

        let err = deliver_message(&state, "u1", "u2", "hi", Some("no-such-key".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let state = test_state();
        seed_user(&state, "u1", "Alice");
        seed_user(&state, "u2", "Bob");

        deliver_message(&state, "u1", "u2", "one", None).await.unwrap();
        deliver_message(&state, "u1", "u2", "two", None).await.unwrap();

        let first = mark_messages_read(&state, "u2", "u1").await.unwrap();
        assert_eq!(first, 2);
        let second = mark_messages_read(&state, "u2", "u1").await.unwrap();
        assert_eq!(second, 0);
    }
}
