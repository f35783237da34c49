//! Minimal user-directory surface.
//!
//! Account management proper (profiles, roles, passwords) lives in the
//! marketplace CRUD service; the realtime core only needs directory rows to
//! exist. This endpoint creates one and hands back a bearer token for it,
//! which is also what the integration tests drive everything with.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt;
use crate::db::now_rfc3339;
use crate::error::{join_err, CoreError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub display_name: String,
    pub email: String,
    /// Opaque push subscription descriptor (JSON with an `endpoint`).
    pub push_subscription: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub id: String,
    pub display_name: String,
    pub access_token: String,
}

/// POST /api/users — Register a directory row and issue a bearer token.
pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), CoreError> {
    let display_name = body.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(CoreError::Validation("display_name is required".into()));
    }
    if body.email.trim().is_empty() || !body.email.contains('@') {
        return Err(CoreError::Validation("a valid email is required".into()));
    }

    let db = state.db.clone();
    let email = body.email.trim().to_string();
    let push_subscription = body.push_subscription.clone();
    let name_for_row = display_name.clone();

    let user_id = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;
        let id = Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO users (id, display_name, email, push_subscription, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, name_for_row, email, push_subscription, now_rfc3339()],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::Conflict("email already registered".into())
            }
            other => CoreError::Db(other),
        })?;
        Ok::<_, CoreError>(id)
    })
    .await
    .map_err(join_err)??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user_id)
        .map_err(|e| CoreError::Internal(format!("token issue failed: {e}")))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            id: user_id,
            display_name,
            access_token,
        }),
    ))
}
