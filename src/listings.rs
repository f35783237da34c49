//! Offer and service-request rows (collaborator tables).
//!
//! Full listing CRUD belongs to the marketplace service; the core needs
//! these rows for conversation resolution, promotion, and ranking, so it
//! exposes the two create endpoints its flows start from.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::{models, now_rfc3339};
use crate::error::{join_err, CoreError};
use crate::notify::{self, NotificationKind, RelatedEntity};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct OfferResponse {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: String,
}

/// POST /api/offers — Create an offer owned by the caller. JWT auth required.
pub async fn create_offer(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateOfferRequest>,
) -> Result<(StatusCode, Json<OfferResponse>), CoreError> {
    let title = body.title.trim().to_string();
    if title.is_empty() {
        return Err(CoreError::Validation("title is required".into()));
    }

    let db = state.db.clone();
    let owner_id = claims.sub.clone();
    let title_for_row = title.clone();

    let offer = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;
        models::get_user(&conn, &owner_id)?;
        let offer = OfferResponse {
            id: Uuid::now_v7().to_string(),
            owner_id,
            title: title_for_row,
            created_at: now_rfc3339(),
        };
        conn.execute(
            "INSERT INTO offers (id, owner_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![offer.id, offer.owner_id, offer.title, offer.created_at],
        )?;
        Ok::<_, CoreError>(offer)
    })
    .await
    .map_err(join_err)??;

    Ok((StatusCode::CREATED, Json(offer)))
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestRequest {
    pub provider_id: String,
}

#[derive(Debug, Serialize)]
pub struct RequestResponse {
    pub id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub created_at: String,
}

/// POST /api/requests — Open a service request toward a provider.
/// JWT auth required; the caller is the customer. Notifies the provider.
pub async fn create_request(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateRequestRequest>,
) -> Result<(StatusCode, Json<RequestResponse>), CoreError> {
    if body.provider_id.is_empty() {
        return Err(CoreError::Validation("provider_id is required".into()));
    }
    if body.provider_id == claims.sub {
        return Err(CoreError::Validation(
            "cannot open a request with yourself".into(),
        ));
    }

    let db = state.db.clone();
    let customer_id = claims.sub.clone();
    let provider_id = body.provider_id.clone();

    let (request, customer_name) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;
        let customer = models::get_user(&conn, &customer_id)?;
        models::get_user(&conn, &provider_id)?;

        let request = RequestResponse {
            id: Uuid::now_v7().to_string(),
            customer_id,
            provider_id,
            created_at: now_rfc3339(),
        };
        conn.execute(
            "INSERT INTO service_requests (id, customer_id, provider_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                request.id,
                request.customer_id,
                request.provider_id,
                request.created_at
            ],
        )?;
        Ok::<_, CoreError>((request, customer.display_name))
    })
    .await
    .map_err(join_err)??;

    notify::dispatch_detached(
        state.clone(),
        request.provider_id.clone(),
        NotificationKind::Request,
        format!("New service request from {customer_name}"),
        Some(RelatedEntity::ServiceRequest(request.id.clone())),
    );

    Ok((StatusCode::CREATED, Json(request)))
}
