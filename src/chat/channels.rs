//! Conversation-to-channel resolution and membership tracking.
//!
//! A channel is the server-side broadcast group for one two-party
//! conversation. The channel id is derived from the canonically ordered
//! participant pair, so both sides resolve the same id regardless of who
//! joins first. Mappings are created lazily and kept for the process
//! lifetime (no eviction); per-user membership is released on disconnect.

use std::collections::HashSet;

use dashmap::DashMap;
use rusqlite::Connection;

use crate::db::models;
use crate::error::{join_err, CoreError};
use crate::state::AppState;

/// Separator between the ordered participant ids in a channel id.
const CHANNEL_SEPARATOR: &str = ":";

/// Prefix marking an ad-hoc two-user pairing key (no backing request/offer).
const ADHOC_PREFIX: &str = "user:";

/// Channel resolver and membership registry. Held in `AppState` behind an
/// `Arc`, never a module-level global.
#[derive(Debug, Default)]
pub struct ChannelResolver {
    /// conversation key -> channel id
    mappings: DashMap<String, String>,
    /// channel id -> joined user ids
    members: DashMap<String, HashSet<String>>,
    /// user id -> channels the user has joined
    user_channels: DashMap<String, HashSet<String>>,
}

impl ChannelResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable channel id for a participant pair: the two ids sorted, then
    /// joined. Order-independent by construction.
    pub fn channel_id_for_pair(a: &str, b: &str) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{lo}{CHANNEL_SEPARATOR}{hi}")
    }

    /// Synthesized conversation key for an ad-hoc pairing of two users.
    pub fn adhoc_key(a: &str, b: &str) -> String {
        format!("{ADHOC_PREFIX}{}", Self::channel_id_for_pair(a, b))
    }

    /// Resolve a conversation key to its channel id. A previously assigned
    /// mapping wins; otherwise the id is derived from the participant pair
    /// and the mapping recorded.
    pub fn resolve(&self, conversation_key: &str, participant_a: &str, participant_b: &str) -> String {
        self.mappings
            .entry(conversation_key.to_string())
            .or_insert_with(|| Self::channel_id_for_pair(participant_a, participant_b))
            .clone()
    }

    /// Add a user to a channel's broadcast group.
    pub fn join(&self, user_id: &str, channel_id: &str) {
        self.members
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        self.user_channels
            .entry(user_id.to_string())
            .or_default()
            .insert(channel_id.to_string());
        tracing::debug!(user_id = %user_id, channel_id = %channel_id, "Joined channel");
    }

    /// Remove a user from a channel. No-op when not joined.
    pub fn leave(&self, user_id: &str, channel_id: &str) {
        if let Some(mut members) = self.members.get_mut(channel_id) {
            members.remove(user_id);
        }
        if let Some(mut channels) = self.user_channels.get_mut(user_id) {
            channels.remove(channel_id);
        }
    }

    /// Release all channel memberships for a user. Called on disconnect.
    pub fn release_user(&self, user_id: &str) {
        if let Some((_, channels)) = self.user_channels.remove(user_id) {
            for channel_id in channels {
                if let Some(mut members) = self.members.get_mut(&channel_id) {
                    members.remove(user_id);
                }
            }
        }
    }

    pub fn is_member(&self, channel_id: &str, user_id: &str) -> bool {
        self.members
            .get(channel_id)
            .map(|m| m.contains(user_id))
            .unwrap_or(false)
    }

    pub fn members_of(&self, channel_id: &str) -> Vec<String> {
        self.members
            .get(channel_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Resolve a conversation key to its two participants.
///
/// A key is a service request id (customer/provider), an offer id (owner
/// plus the inquiring counterparty), or an ad-hoc `user:` pairing. A key
/// matching none of these fails with an explicit unresolvable-conversation
/// error rather than inventing a placeholder participant.
pub fn resolve_participants(
    conn: &Connection,
    conversation_key: &str,
    caller_id: &str,
    other_id: &str,
) -> Result<(String, String), CoreError> {
    if conversation_key.starts_with(ADHOC_PREFIX) {
        return Ok((caller_id.to_string(), other_id.to_string()));
    }

    let request: Option<(String, String)> = conn
        .query_row(
            "SELECT customer_id, provider_id FROM service_requests WHERE id = ?1",
            rusqlite::params![conversation_key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok();
    if let Some((customer_id, provider_id)) = request {
        return Ok((customer_id, provider_id));
    }

    let owner: Option<String> = conn
        .query_row(
            "SELECT owner_id FROM offers WHERE id = ?1",
            rusqlite::params![conversation_key],
            |row| row.get(0),
        )
        .ok();
    if let Some(owner_id) = owner {
        // Offer conversations pair the owner with whichever side is not the owner.
        let counterparty = if caller_id == owner_id {
            other_id.to_string()
        } else {
            caller_id.to_string()
        };
        return Ok((owner_id, counterparty));
    }

    Err(CoreError::Validation(format!(
        "unresolvable conversation key: {conversation_key}"
    )))
}

/// Resolve a conversation and join the caller to its channel.
///
/// The caller must be one of the two resolved participants; otherwise the
/// join is refused with Forbidden, surfaced to the caller only.
pub async fn join_conversation(
    state: &AppState,
    caller_id: &str,
    conversation_key: &str,
    other_user_id: &str,
) -> Result<String, CoreError> {
    let db = state.db.clone();
    let key = conversation_key.to_string();
    let caller = caller_id.to_string();
    let other = other_user_id.to_string();

    let (participant_a, participant_b) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| CoreError::Internal("db lock poisoned".into()))?;
        // The counterparty must exist in the directory.
        models::get_user(&conn, &other)?;
        resolve_participants(&conn, &key, &caller, &other)
    })
    .await
    .map_err(join_err)??;

    if caller_id != participant_a && caller_id != participant_b {
        return Err(CoreError::Forbidden(
            "not a participant in this conversation".to_string(),
        ));
    }

    let channel_id = state
        .channels
        .resolve(conversation_key, &participant_a, &participant_b);
    state.channels.join(caller_id, &channel_id);

    Ok(channel_id)
}
