//! Preferences union merge
//!
//! The one transfer that keeps both sides: every array field of the
//! destination's row becomes the set union of both accounts' values.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::MergeError;
use super::plan::PREFERENCES_TABLE;
use super::store::MergeTx;
use crate::core_types::AccountId;

/// `user_preferences` row (one per account)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub user_id: AccountId,
    pub favorite_games: Vec<String>,
    pub followed_streamers: Vec<String>,
    pub preferred_categories: Vec<String>,
    pub preferred_tags: Vec<String>,
}

impl Preferences {
    pub fn empty(user_id: AccountId) -> Self {
        Self {
            user_id,
            favorite_games: Vec::new(),
            followed_streamers: Vec::new(),
            preferred_categories: Vec::new(),
            preferred_tags: Vec::new(),
        }
    }

    /// Union of two rows, owned by `owner`.
    ///
    /// Destination values come first, followed by source values it lacked.
    /// Returns `None` when neither side has a row.
    pub fn union(
        owner: AccountId,
        destination: Option<&Preferences>,
        source: Option<&Preferences>,
    ) -> Option<Preferences> {
        if destination.is_none() && source.is_none() {
            return None;
        }
        let empty = Preferences::empty(owner);
        let dst = destination.unwrap_or(&empty);
        let src = source.unwrap_or(&empty);

        Some(Preferences {
            user_id: owner,
            favorite_games: union_values(&dst.favorite_games, &src.favorite_games),
            followed_streamers: union_values(&dst.followed_streamers, &src.followed_streamers),
            preferred_categories: union_values(&dst.preferred_categories, &src.preferred_categories),
            preferred_tags: union_values(&dst.preferred_tags, &src.preferred_tags),
        })
    }
}

fn union_values(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .iter()
        .chain(second)
        .filter(|v| seen.insert(v.as_str()))
        .cloned()
        .collect()
}

/// Merge source preferences into destination, then delete the source row.
///
/// Returns whether a preferences row was written. An absent table or two
/// accounts without rows is a no-op.
pub async fn merge_preferences(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<bool, MergeError> {
    let presence = tx.probe(PREFERENCES_TABLE, "user_id", source).await?;
    if !presence.exists() {
        debug!("user_preferences table not present, skipping");
        return Ok(false);
    }

    let dst = tx.load_preferences(destination).await?;
    let src = if presence.has_rows() {
        tx.load_preferences(source).await?
    } else {
        None
    };

    let Some(merged) = Preferences::union(destination, dst.as_ref(), src.as_ref()) else {
        return Ok(false);
    };

    tx.upsert_preferences(&merged).await?;
    if src.is_some() {
        tx.delete_preferences(source).await?;
    }

    debug!(
        favorite_games = merged.favorite_games.len(),
        followed_streamers = merged.followed_streamers.len(),
        preferred_categories = merged.preferred_categories.len(),
        preferred_tags = merged.preferred_tags.len(),
        "Preferences merged"
    );
    Ok(true)
}
