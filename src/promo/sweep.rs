//! Background promotion expiry sweep.
//!
//! Runs periodically: deactivates promotion snapshots whose window has
//! passed (notifying the owner), and warns owners whose promotions lapse
//! within the warning window. `promo_warned_days` remembers the last
//! days-remaining value warned about so a warning fires once per day of
//! countdown, not once per sweep.

use chrono::{Duration, Utc};

use crate::config::SweepConfig;
use crate::db::fmt_rfc3339;
use crate::error::{join_err, CoreError};
use crate::notify::{self, NotificationKind, RelatedEntity};
use crate::promo::PromotionTier;
use crate::state::AppState;

/// Spawn the periodic sweep task.
pub fn spawn_promotion_sweep(state: AppState, config: SweepConfig) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(config.interval_secs)).await;

            match run_sweep(&state, config.warning_days).await {
                Ok((expired, warned)) => {
                    if expired > 0 || warned > 0 {
                        tracing::info!(
                            expired = expired,
                            warned = warned,
                            "Promotion sweep completed"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Promotion sweep failed");
                }
            }
        }
    });
}

/// One sweep pass. Returns (expired count, warning count).
///
/// Snapshot writes happen in one blocking section; notification dispatch
/// follows afterwards so a delivery problem cannot stall the deactivation.
pub async fn run_sweep(state: &AppState, warning_days: i64) -> Result<(usize, usize), CoreError> {
    let db = state.db.clone();

    let (expired, expiring) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| CoreError::Internal("db lock poisoned".into()))?;

        let now = Utc::now();
        let now_s = fmt_rfc3339(now);
        let horizon = fmt_rfc3339(now + Duration::days(warning_days));

        // Pass 1: promotions whose window has passed.
        let expired: Vec<(String, String, String, Option<String>)> = {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, title, promo_tier FROM offers
                 WHERE promo_active = 1 AND promo_end_at < ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![now_s], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for (offer_id, _, _, _) in &expired {
            conn.execute(
                "UPDATE offers SET promo_active = 0, promo_warned_days = NULL WHERE id = ?1",
                rusqlite::params![offer_id],
            )?;
        }

        // Pass 2: promotions lapsing within the warning window that have
        // not been warned for this days-remaining value yet.
        let mut expiring: Vec<(String, String, String, Option<String>, i64)> = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, title, promo_tier, promo_end_at, promo_warned_days
                 FROM offers
                 WHERE promo_active = 1 AND promo_end_at >= ?1 AND promo_end_at <= ?2",
            )?;
            let rows: Vec<(String, String, String, Option<String>, String, Option<i64>)> = stmt
                .query_map(rusqlite::params![now_s, horizon], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for (offer_id, owner_id, title, tier, end_at, warned_days) in rows {
                let Some(end) = chrono::DateTime::parse_from_rfc3339(&end_at)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
                else {
                    continue;
                };
                let days = ((end - now).num_seconds().max(0) + 86_399) / 86_400;
                if warned_days.is_some_and(|w| w <= days) {
                    continue;
                }
                conn.execute(
                    "UPDATE offers SET promo_warned_days = ?1 WHERE id = ?2",
                    rusqlite::params![days, offer_id],
                )?;
                expiring.push((offer_id, owner_id, title, tier, days));
            }
        }

        Ok::<_, CoreError>((expired, expiring))
    })
    .await
    .map_err(join_err)??;

    let expired_count = expired.len();
    let warned_count = expiring.len();

    for (offer_id, owner_id, title, tier) in expired {
        let label = tier
            .as_deref()
            .and_then(PromotionTier::from_str)
            .map(|t| t.label())
            .unwrap_or("promotion");
        if let Err(e) = notify::send_notification(
            state,
            &owner_id,
            NotificationKind::PromotionExpired,
            notify::expired_body(label, &title),
            Some(RelatedEntity::Offer(offer_id)),
        )
        .await
        {
            tracing::warn!(owner_id = %owner_id, error = %e, "Expiry notification failed");
        }
    }

    for (offer_id, owner_id, title, tier, days) in expiring {
        let label = tier
            .as_deref()
            .and_then(PromotionTier::from_str)
            .map(|t| t.label())
            .unwrap_or("promotion");
        if let Err(e) = notify::send_notification(
            state,
            &owner_id,
            NotificationKind::PromotionExpiry,
            notify::expiry_warning_body(label, &title, days),
            Some(RelatedEntity::Offer(offer_id)),
        )
        .await
        {
            tracing::warn!(owner_id = %owner_id, error = %e, "Expiry warning failed");
        }
    }

    Ok((expired_count, warned_count))
}
