//! Merge audit recording
//!
//! Writes one `moderation_audit_logs` row per merge. Recording is best-effort:
//! it runs under its own savepoint and a failure never fails the merge.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::Postgres;
use tracing::warn;
use uuid::Uuid;

use super::error::MergeError;
use super::plan::AUDIT_LOG_TABLE;
use super::result::MergeResult;
use super::store::{MergeTx, close_savepoint};
use crate::core_types::AccountId;

pub const ACTION_ACCOUNT_MERGED: &str = "account_merged";
pub const ENTITY_TYPE_USER: &str = "user";

/// One audit log row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: AccountId,
    /// The account holder initiated the merge by claiming the account
    pub actor_id: AccountId,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Entry describing a finished merge of `source` into `destination`
    pub fn account_merged(
        source: AccountId,
        destination: AccountId,
        result: &MergeResult,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: ACTION_ACCOUNT_MERGED.to_string(),
            entity_type: ENTITY_TYPE_USER.to_string(),
            entity_id: destination,
            actor_id: destination,
            metadata: merge_metadata(source, destination, result, at),
            created_at: at,
        }
    }
}

fn merge_metadata(
    source: AccountId,
    destination: AccountId,
    result: &MergeResult,
    at: DateTime<Utc>,
) -> serde_json::Value {
    json!({
        "from_user_id": source.to_string(),
        "to_user_id": destination.to_string(),
        "clips_merged": result.clips_merged,
        "votes_merged": result.votes_merged,
        "favorites_merged": result.favorites_merged,
        "comments_merged": result.comments_merged,
        "follows_merged": result.follows_merged,
        "watch_history_merged": result.watch_history_merged,
        "preferences_merged": result.preferences_merged,
        "settings_merged": result.settings_merged,
        "subscription_merged": result.subscription_merged,
        "duplicates_skipped": result.duplicates_skipped,
        "timestamp": at.to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

/// Audit log writer
pub struct AuditLogRepository;

impl AuditLogRepository {
    /// Insert one entry. `moderator_id` is the legacy actor column and is
    /// written alongside `actor_id`.
    pub async fn create<'e, E>(executor: E, entry: &AuditLogEntry) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO moderation_audit_logs
                (id, action, entity_type, entity_id, moderator_id, actor_id, metadata, created_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id.as_uuid())
        .bind(entry.actor_id.as_uuid())
        .bind(entry.actor_id.as_uuid())
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(executor)
        .await?;

        Ok(())
    }
}

/// Record the merge outcome. Returns whether the entry was written.
///
/// A serialization conflict or a failure to restore the savepoint is
/// returned as an error; any other insert failure is logged and swallowed.
pub async fn record_merge(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
    result: &MergeResult,
) -> Result<bool, MergeError> {
    let entry = AuditLogEntry::account_merged(source, destination, result, Utc::now());

    if let Err(e) = tx.savepoint(AUDIT_LOG_TABLE).await {
        warn!(error = %e, "Failed to open savepoint for merge audit log");
        return Ok(false);
    }
    let written = tx.insert_audit_log(&entry).await;

    match close_savepoint(tx, AUDIT_LOG_TABLE, written).await? {
        Ok(()) => Ok(true),
        Err(e) if e.is_retryable() => Err(e),
        Err(e) => {
            warn!(
                source = %source,
                destination = %destination,
                error = %e,
                "Failed to create merge audit log"
            );
            Ok(false)
        }
    }
}
