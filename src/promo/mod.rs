//! Promotion tiers, purchase/extension, status checks, and promotion-aware
//! offer ranking.
//!
//! `promotions` rows are the system of record for billing history. The
//! offer row carries a denormalized snapshot of the active promotion, and
//! that snapshot — not a join — is what listing queries consult. The
//! snapshot is a cache with exactly two writers: [`promote_offer`] and the
//! expiry sweep.

pub mod sweep;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::{fmt_rfc3339, now_rfc3339};
use crate::error::{join_err, CoreError};
use crate::notify::{self, NotificationKind, RelatedEntity};
use crate::state::AppState;

/// Default page size for offer listings.
const DEFAULT_LIMIT: u32 = 20;
/// Maximum page size for offer listings.
const MAX_LIMIT: u32 = 100;

/// Promotion priority tiers. Total order for ranking: TOP > HIGHLIGHT >
/// URGENT > none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionTier {
    Top,
    Highlight,
    Urgent,
}

impl PromotionTier {
    /// Storage form (lowercase, matches the SQL CASE in the ranking query).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Highlight => "highlight",
            Self::Urgent => "urgent",
        }
    }

    /// Display form used in notification text.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Top => "TOP",
            Self::Highlight => "HIGHLIGHT",
            Self::Urgent => "URGENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "top" => Some(Self::Top),
            "highlight" => Some(Self::Highlight),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    /// Ranking weight. Inactive/no promotion ranks as 0.
    pub fn priority(&self) -> i64 {
        match self {
            Self::Top => 3,
            Self::Highlight => 2,
            Self::Urgent => 1,
        }
    }

    pub fn price_cents(&self) -> i64 {
        match self {
            Self::Top => 1499,
            Self::Highlight => 999,
            Self::Urgent => 499,
        }
    }

    /// Duration added per purchase.
    pub fn duration_days(&self) -> i64 {
        match self {
            Self::Top => 7,
            Self::Highlight => 3,
            Self::Urgent => 1,
        }
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Active iff the snapshot is flagged active and start <= now <= end,
/// inclusive on both boundaries. `now` is truncated to the stored
/// microsecond precision first, so an end timestamp equal to "now" still
/// counts as active despite the sub-microsecond remainder on the clock.
fn snapshot_active(
    active_flag: bool,
    start_at: Option<&str>,
    end_at: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    if !active_flag {
        return false;
    }
    let (Some(start), Some(end)) = (start_at.and_then(parse_ts), end_at.and_then(parse_ts)) else {
        return false;
    };
    let now = parse_ts(&fmt_rfc3339(now)).unwrap_or(now);
    start <= now && now <= end
}

/// Remaining whole days until `end`, rounded up. 12 hours left counts as 1.
fn remaining_days(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (end - now).num_seconds();
    if secs <= 0 {
        return 0;
    }
    (secs + 86_399) / 86_400
}

// --- Promotion purchase / extension ---

#[derive(Debug, Serialize)]
pub struct PromoteReceipt {
    pub offer_id: String,
    pub tier: PromotionTier,
    pub promoted_until: String,
    pub price_cents: i64,
}

/// Purchase (or extend) a promotion on an offer.
///
/// Forbidden unless the requester owns the offer; Validation for an
/// unrecognized tier. An active promotion is extended, not duplicated: the
/// new expiry is the later of "now" and the current expiry, plus the tier
/// duration. Writes a history row, rewrites the offer snapshot, and fires a
/// best-effort notification.
pub async fn promote_offer(
    state: &AppState,
    offer_id: &str,
    tier_name: &str,
    requester_id: &str,
) -> Result<PromoteReceipt, CoreError> {
    let tier = PromotionTier::from_str(tier_name)
        .ok_or_else(|| CoreError::Validation(format!("unknown promotion tier: {tier_name}")))?;

    let db = state.db.clone();
    let oid = offer_id.to_string();
    let requester = requester_id.to_string();

    let (receipt, title) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;

        let row: Option<(String, String, i64, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT owner_id, title, promo_active, promo_start_at, promo_end_at
                 FROM offers WHERE id = ?1",
                rusqlite::params![oid],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .ok();

        let Some((owner_id, title, active_flag, start_at, end_at)) = row else {
            return Err(CoreError::NotFound(format!("offer {oid}")));
        };
        if owner_id != requester {
            return Err(CoreError::Forbidden(
                "only the offer owner can promote it".to_string(),
            ));
        }

        let now = Utc::now();
        let currently_active =
            snapshot_active(active_flag != 0, start_at.as_deref(), end_at.as_deref(), now);

        // Extension stacks on top of whatever is still running.
        let base = if currently_active {
            let current_end = end_at.as_deref().and_then(parse_ts).unwrap_or(now);
            current_end.max(now)
        } else {
            now
        };
        let new_end = base + Duration::days(tier.duration_days());

        // Keep the original start when extending an active promotion.
        let new_start = if currently_active {
            start_at.clone().unwrap_or_else(|| fmt_rfc3339(now))
        } else {
            fmt_rfc3339(now)
        };
        let new_end_s = fmt_rfc3339(new_end);
        let now_s = fmt_rfc3339(now);

        // History row first (system of record), then the snapshot.
        conn.execute(
            "INSERT INTO promotions (id, offer_id, user_id, tier, price_cents, start_at, end_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                Uuid::now_v7().to_string(),
                oid,
                requester,
                tier.as_str(),
                tier.price_cents(),
                now_s,
                new_end_s,
                now_s,
            ],
        )?;

        conn.execute(
            "UPDATE offers
             SET promo_tier = ?1, promo_price_cents = ?2, promo_start_at = ?3,
                 promo_end_at = ?4, promo_active = 1, promo_warned_days = NULL
             WHERE id = ?5",
            rusqlite::params![tier.as_str(), tier.price_cents(), new_start, new_end_s, oid],
        )?;

        Ok((
            PromoteReceipt {
                offer_id: oid,
                tier,
                promoted_until: new_end_s,
                price_cents: tier.price_cents(),
            },
            title,
        ))
    })
    .await
    .map_err(join_err)??;

    notify::dispatch_detached(
        state.clone(),
        requester_id.to_string(),
        NotificationKind::Offer,
        format!(
            "Your {} promotion for \"{}\" is active until {}",
            receipt.tier.label(),
            title,
            receipt.promoted_until
        ),
        Some(RelatedEntity::Offer(receipt.offer_id.clone())),
    );

    Ok(receipt)
}

// --- Status check ---

#[derive(Debug, Serialize)]
pub struct PromotionStatus {
    pub is_promoted: bool,
    pub tier: Option<PromotionTier>,
    pub remaining_days: i64,
    pub ends_at: Option<String>,
}

pub async fn check_promotion_status(
    state: &AppState,
    offer_id: &str,
) -> Result<PromotionStatus, CoreError> {
    let db = state.db.clone();
    let oid = offer_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;

        let row: Option<(i64, Option<String>, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT promo_active, promo_tier, promo_start_at, promo_end_at
                 FROM offers WHERE id = ?1",
                rusqlite::params![oid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .ok();

        let Some((active_flag, tier, start_at, end_at)) = row else {
            return Err(CoreError::NotFound(format!("offer {oid}")));
        };

        let now = Utc::now();
        let is_promoted =
            snapshot_active(active_flag != 0, start_at.as_deref(), end_at.as_deref(), now);

        if !is_promoted {
            return Ok(PromotionStatus {
                is_promoted: false,
                tier: None,
                remaining_days: 0,
                ends_at: None,
            });
        }

        let end = end_at.as_deref().and_then(parse_ts).unwrap_or(now);
        Ok(PromotionStatus {
            is_promoted: true,
            tier: tier.as_deref().and_then(PromotionTier::from_str),
            remaining_days: remaining_days(end, now),
            ends_at: end_at,
        })
    })
    .await
    .map_err(join_err)?
}

// --- Ranked listing ---

#[derive(Debug, Serialize)]
pub struct OfferListItem {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: String,
    pub promotion_priority: i64,
    pub promoted_tier: Option<PromotionTier>,
    pub promoted_until: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OfferPage {
    pub items: Vec<OfferListItem>,
    pub total: u64,
}

/// Listing query with promotion priority as the leading sort key and
/// recency as the tie-break. Pagination applies after sorting, so promoted
/// items surface ahead of equally-recent unpromoted ones without leaking
/// across page boundaries.
pub async fn ranked_offers(state: &AppState, page: u32, limit: u32) -> Result<OfferPage, CoreError> {
    let db = state.db.clone();
    let limit = limit.clamp(1, MAX_LIMIT);
    // Offset in i64; page arrives unchecked from the query string.
    let offset = (i64::from(page.max(1)) - 1) * i64::from(limit);

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;

        let now = now_rfc3339();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM offers", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT id, owner_id, title, created_at,
                    CASE
                        WHEN promo_active = 1
                             AND promo_start_at <= ?1 AND ?1 <= promo_end_at
                        THEN CASE promo_tier
                            WHEN 'top' THEN 3
                            WHEN 'highlight' THEN 2
                            WHEN 'urgent' THEN 1
                            ELSE 0
                        END
                        ELSE 0
                    END AS promotion_priority,
                    promo_tier, promo_end_at
             FROM offers
             ORDER BY promotion_priority DESC, created_at DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let items: Vec<OfferListItem> = stmt
            .query_map(
                rusqlite::params![now, limit as i64, offset],
                |row| {
                    let priority: i64 = row.get(4)?;
                    let tier: Option<String> = row.get(5)?;
                    let end_at: Option<String> = row.get(6)?;
                    Ok(OfferListItem {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        title: row.get(2)?,
                        created_at: row.get(3)?,
                        promotion_priority: priority,
                        promoted_tier: if priority > 0 {
                            tier.as_deref().and_then(PromotionTier::from_str)
                        } else {
                            None
                        },
                        promoted_until: if priority > 0 { end_at } else { None },
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok::<_, CoreError>(OfferPage {
            items,
            total: total as u64,
        })
    })
    .await
    .map_err(join_err)?
}

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub tier: String,
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

// --- Handlers ---

/// POST /api/offers/{id}/promote — Purchase or extend a promotion.
/// JWT auth required; rate limited.
pub async fn promote(
    State(state): State<AppState>,
    claims: Claims,
    Path(offer_id): Path<String>,
    Json(body): Json<PromoteRequest>,
) -> Result<(StatusCode, Json<PromoteReceipt>), CoreError> {
    let receipt = promote_offer(&state, &offer_id, &body.tier, &claims.sub).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/offers/{id}/promotion — Current promotion status.
pub async fn promotion_status(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
) -> Result<Json<PromotionStatus>, CoreError> {
    let status = check_promotion_status(&state, &offer_id).await?;
    Ok(Json(status))
}

/// GET /api/offers?page&limit — Ranked offer listing.
pub async fn list_offers(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<OfferPage>, CoreError> {
    let page = ranked_offers(
        &state,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_LIMIT),
    )
    .await?;
    Ok(Json(page))
}
