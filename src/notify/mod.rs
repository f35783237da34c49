//! Durable notification dispatch.
//!
//! A notification row is persisted before any delivery attempt. Delivery
//! then runs best-effort through whichever channels the recipient has: a
//! live in-app push over the open connection, a web-push subscription, and
//! an email fallback when neither reached them. Delivery failures are
//! logged and swallowed — this path is always a side effect of a state
//! change that already completed.

pub mod email;
pub mod push;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::{models, now_rfc3339};
use crate::error::{join_err, CoreError};
use crate::state::AppState;
use crate::ws::protocol::ServerEvent;

/// Default page size for the notification list.
const DEFAULT_LIMIT: u32 = 20;
/// Maximum page size for the notification list.
const MAX_LIMIT: u32 = 100;

/// Notification categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    Request,
    Offer,
    System,
    PromotionExpiry,
    PromotionExpired,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Request => "request",
            Self::Offer => "offer",
            Self::System => "system",
            Self::PromotionExpiry => "promotion_expiry",
            Self::PromotionExpired => "promotion_expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "request" => Some(Self::Request),
            "offer" => Some(Self::Offer),
            "system" => Some(Self::System),
            "promotion_expiry" => Some(Self::PromotionExpiry),
            "promotion_expired" => Some(Self::PromotionExpired),
            _ => None,
        }
    }
}

/// Typed reference to the entity a notification is about. The tag travels
/// with the id, so rendering and dereferencing are exhaustively matched
/// instead of guessing from a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RelatedEntity {
    Message(String),
    ServiceRequest(String),
    Offer(String),
}

impl RelatedEntity {
    fn to_columns(&self) -> (&'static str, &str) {
        match self {
            Self::Message(id) => ("message", id),
            Self::ServiceRequest(id) => ("service_request", id),
            Self::Offer(id) => ("offer", id),
        }
    }

    fn from_columns(kind: Option<String>, id: Option<String>) -> Option<Self> {
        match (kind.as_deref(), id) {
            (Some("message"), Some(id)) => Some(Self::Message(id)),
            (Some("service_request"), Some(id)) => Some(Self::ServiceRequest(id)),
            (Some("offer"), Some(id)) => Some(Self::Offer(id)),
            _ => None,
        }
    }
}

/// A persisted notification. Mutable only in its read flag.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub body: String,
    pub related: Option<RelatedEntity>,
    pub read: bool,
    pub created_at: String,
}

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind_str: String = row.get(2)?;
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: NotificationKind::from_str(&kind_str).unwrap_or(NotificationKind::System),
        body: row.get(3)?,
        related: RelatedEntity::from_columns(row.get(4)?, row.get(5)?),
        read: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
    })
}

/// Persist a notification row, then deliver it best-effort.
///
/// The insert is the primary write and its errors propagate. Even if every
/// transport raises, the caller still gets back the persisted notification.
pub async fn send_notification(
    state: &AppState,
    user_id: &str,
    kind: NotificationKind,
    body: String,
    related: Option<RelatedEntity>,
) -> Result<Notification, CoreError> {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let related_for_row = related.clone();
    let body_for_row = body.clone();

    let (notification, push_subscription, email_address) =
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;

            let user = models::get_user(&conn, &uid)?;

            let notification = Notification {
                id: Uuid::now_v7().to_string(),
                user_id: uid,
                kind,
                body: body_for_row,
                related: related_for_row,
                read: false,
                created_at: now_rfc3339(),
            };
            let (related_kind, related_id) = match &notification.related {
                Some(r) => {
                    let (k, i) = r.to_columns();
                    (Some(k), Some(i.to_string()))
                }
                None => (None, None),
            };

            conn.execute(
                "INSERT INTO notifications (id, user_id, kind, body, related_kind, related_id, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![
                    notification.id,
                    notification.user_id,
                    notification.kind.as_str(),
                    notification.body,
                    related_kind,
                    related_id,
                    notification.created_at,
                ],
            )?;

            Ok::<_, CoreError>((notification, user.push_subscription, user.email))
        })
        .await
        .map_err(join_err)??;

    // Durable record exists; everything below is best-effort.
    let live_delivered = state.connections.send_json(
        user_id,
        &ServerEvent::Notification {
            notification: notification.clone(),
        },
    );

    let mut push_delivered = false;
    if let Some(subscription) = &push_subscription {
        match state
            .push
            .deliver(subscription, &notification.body, notification.kind.as_str())
            .await
        {
            Ok(()) => push_delivered = true,
            Err(e) => {
                tracing::warn!(
                    user_id = %notification.user_id,
                    error = %e,
                    "Push delivery failed"
                );
            }
        }
    }

    // Email only as a fallback when nothing else reached the user.
    if !live_delivered && !push_delivered {
        if let Err(e) = state
            .email
            .send(&email_address, "You have a new notification", &notification.body)
            .await
        {
            tracing::warn!(
                user_id = %notification.user_id,
                error = %e,
                "Email delivery failed"
            );
        }
    }

    Ok(notification)
}

/// Dispatch a notification from a detached task with its own error
/// boundary. Used where notification is a side effect that must not fail
/// the triggering operation.
pub fn dispatch_detached(
    state: AppState,
    user_id: String,
    kind: NotificationKind,
    body: String,
    related: Option<RelatedEntity>,
) {
    tokio::spawn(async move {
        if let Err(e) = send_notification(&state, &user_id, kind, body, related).await {
            tracing::warn!(user_id = %user_id, error = %e, "Notification dispatch failed");
        }
    });
}

/// Mark one notification read. NotFound when the id does not exist or does
/// not belong to the caller.
pub async fn mark_notification_read(
    state: &AppState,
    user_id: &str,
    notification_id: &str,
) -> Result<(), CoreError> {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let nid = notification_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;
        let updated = conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![nid, uid],
        )?;
        if updated == 0 {
            return Err(CoreError::NotFound(format!("notification {nid}")));
        }
        Ok(())
    })
    .await
    .map_err(join_err)?
}

/// Paginated notification list, newest first.
pub async fn list_notifications(
    state: &AppState,
    user_id: &str,
    page: u32,
    limit: u32,
    unread_only: bool,
) -> Result<NotificationPage, CoreError> {
    let db = state.db.clone();
    let uid = user_id.to_string();
    let limit = limit.clamp(1, MAX_LIMIT);
    // Offset in i64; page arrives unchecked from the query string.
    let offset = (i64::from(page.max(1)) - 1) * i64::from(limit);

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;

        let read_filter = if unread_only { "AND read = 0" } else { "" };

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM notifications WHERE user_id = ?1 {read_filter}"),
            rusqlite::params![uid],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT id, user_id, kind, body, related_kind, related_id, read, created_at
             FROM notifications
             WHERE user_id = ?1 {read_filter}
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let items: Vec<Notification> = stmt
            .query_map(
                rusqlite::params![uid, limit as i64, offset],
                notification_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok::<_, CoreError>(NotificationPage {
            items,
            total: total as u64,
        })
    })
    .await
    .map_err(join_err)?
}

/// Human-readable body for a promotion that is about to lapse.
pub fn expiry_warning_body(tier_label: &str, offer_title: &str, days_remaining: i64) -> String {
    let when = match days_remaining {
        d if d <= 0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        d => format!("in {d} days"),
    };
    format!("Your {tier_label} promotion for \"{offer_title}\" expires {when}")
}

/// Human-readable body for a promotion that has lapsed.
pub fn expired_body(tier_label: &str, offer_title: &str) -> String {
    format!("Your {tier_label} promotion for \"{offer_title}\" has expired")
}

// --- Request / Response types ---

#[derive(Debug, Serialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub unread_only: Option<bool>,
}

// --- Handlers ---

/// GET /api/notifications?page&limit&unread_only — JWT auth required.
pub async fn list(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ListQuery>,
) -> Result<Json<NotificationPage>, CoreError> {
    let page = list_notifications(
        &state,
        &claims.sub,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_LIMIT),
        query.unread_only.unwrap_or(false),
    )
    .await?;
    Ok(Json(page))
}

/// POST /api/notifications/{id}/read — JWT auth required.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    mark_notification_read(&state, &claims.sub, &notification_id).await?;
    Ok(Json(serde_json::json!({ "read": true })))
}
