//! Core error taxonomy shared by the messaging, notification, and promotion
//! components.
//!
//! Primary-write failures (message save, notification save, promotion save)
//! propagate to the caller. Secondary effects (fan-out, push, email) catch
//! `Delivery` errors at the effect site, log, and continue.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or malformed input, reported to the caller.
    #[error("validation: {0}")]
    Validation(String),

    /// Referenced entity absent (or not owned by the caller).
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller lacks ownership or role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Duplicate where a unique row was expected.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient push/email/fan-out failure. Never surfaced to the
    /// triggering call chain; swallowed after logging at the effect site.
    #[error("delivery: {0}")]
    Delivery(String),

    #[error("database: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Delivery(_) | CoreError::Db(_) | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs, not the response body.
        let message = match &self {
            CoreError::Db(e) => {
                tracing::error!(error = %e, "database error");
                "internal error".to_string()
            }
            CoreError::Internal(msg) | CoreError::Delivery(msg) => {
                tracing::error!(error = %msg, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Map a `spawn_blocking` join failure into an internal error.
pub fn join_err(e: tokio::task::JoinError) -> CoreError {
    CoreError::Internal(format!("blocking task failed: {e}"))
}
