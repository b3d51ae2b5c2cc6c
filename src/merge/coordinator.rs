//! Account Merge Coordinator
//!
//! Drives one merge: validation, then every transfer step in a fixed order
//! inside a single transaction, then commit. Serialization conflicts restart
//! the whole attempt on a fresh transaction.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::audit::record_merge;
use super::error::{MergeError, MergeStep};
use super::preferences::merge_preferences;
use super::result::MergeResult;
use super::store::{MergeStore, MergeTx, PgMergeStore};
use super::subscription::transfer_subscription;
use super::transfers;
use super::types::AccountStatus;
use crate::config::MergeConfig;
use crate::core_types::AccountId;
use crate::db::Database;

/// Merges an unclaimed account into a claimed one
pub struct AccountMergeService {
    store: Arc<dyn MergeStore>,
    config: MergeConfig,
}

impl AccountMergeService {
    pub fn new(store: Arc<dyn MergeStore>, config: MergeConfig) -> Self {
        Self { store, config }
    }

    /// Service running against the platform database
    pub fn postgres(db: &Database, config: MergeConfig) -> Self {
        let store = PgMergeStore::new(db.pool().clone(), &config);
        Self::new(Arc::new(store), config)
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge every piece of data owned by `source` into `destination` and
    /// retire `source`.
    ///
    /// Either the whole merge commits and a complete [`MergeResult`] is
    /// returned, or nothing changed and the error is returned.
    pub async fn merge_accounts(
        &self,
        source: AccountId,
        destination: AccountId,
    ) -> Result<MergeResult, MergeError> {
        if source == destination {
            return Err(MergeError::SameAccount(source));
        }

        info!(
            source = %source,
            destination = %destination,
            store = self.store.name(),
            "Starting account merge"
        );

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(source, destination).await {
                Ok(result) => {
                    info!(
                        source = %source,
                        destination = %destination,
                        attempt,
                        clips = result.clips_merged,
                        votes = result.votes_merged,
                        favorites = result.favorites_merged,
                        comments = result.comments_merged,
                        follows = result.follows_merged,
                        watch_history = result.watch_history_merged,
                        preferences = result.preferences_merged,
                        subscription = result.subscription_merged,
                        duplicates_skipped = result.duplicates_skipped,
                        "Account merge completed"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        source = %source,
                        destination = %destination,
                        attempt,
                        backoff = ?backoff,
                        error = %e,
                        "Account merge conflicted, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        source = %source,
                        destination = %destination,
                        attempt,
                        code = e.code(),
                        step = ?e.step(),
                        error = %e,
                        "Account merge failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// One attempt, bounded by the configured timeout.
    ///
    /// On expiry the in-flight transaction is dropped, which rolls it back.
    async fn attempt(
        &self,
        source: AccountId,
        destination: AccountId,
    ) -> Result<MergeResult, MergeError> {
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, self.run_once(source, destination))
                .await
                .map_err(|_| MergeError::Timeout(limit))?,
            None => self.run_once(source, destination).await,
        }
    }

    async fn run_once(
        &self,
        source: AccountId,
        destination: AccountId,
    ) -> Result<MergeResult, MergeError> {
        let mut tx = self
            .store
            .begin(self.config.isolation)
            .await
            .map_err(|e| e.at(MergeStep::Begin))?;

        match run_steps(tx.as_mut(), source, destination).await {
            Ok(mut result) => {
                tx.commit().await.map_err(|e| e.at(MergeStep::Commit))?;
                result.success = true;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back merge transaction");
                }
                Err(e)
            }
        }
    }
}

/// Lock both accounts and check they can take part in a merge
async fn lock_and_validate(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<(), MergeError> {
    let records = tx
        .lock_accounts(&[source, destination])
        .await
        .map_err(|e| e.at(MergeStep::LockAccounts))?;

    let status_of = |id: AccountId| {
        records
            .iter()
            .find(|r| r.id == id)
            .map(|r| &r.status)
            .ok_or(MergeError::AccountNotFound(id))
    };
    let source_status = status_of(source)?;
    let destination_status = status_of(destination)?;

    if *destination_status == AccountStatus::Merged {
        return Err(MergeError::DestinationRetired(destination));
    }
    if *source_status == AccountStatus::Merged {
        warn!(source = %source, "Source account is already merged, merging remaining data");
    }
    debug!(
        source_status = %source_status,
        destination_status = %destination_status,
        "Accounts locked"
    );
    Ok(())
}

async fn run_steps(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<MergeResult, MergeError> {
    lock_and_validate(tx, source, destination).await?;

    let mut result = MergeResult::default();
    for step in MergeStep::TRANSFER_ORDER {
        apply_step(tx, step, source, destination, &mut result)
            .await
            .map_err(|e| e.at(step))?;
    }
    Ok(result)
}

async fn apply_step(
    tx: &mut dyn MergeTx,
    step: MergeStep,
    source: AccountId,
    destination: AccountId,
    result: &mut MergeResult,
) -> Result<(), MergeError> {
    let outcome = match step {
        MergeStep::Clips => transfers::transfer_clips(tx, source, destination).await?,
        MergeStep::Votes => transfers::transfer_votes(tx, source, destination).await?,
        MergeStep::Favorites => transfers::transfer_favorites(tx, source, destination).await?,
        MergeStep::Comments => transfers::transfer_comments(tx, source, destination).await?,
        MergeStep::Follows => transfers::transfer_follows(tx, source, destination).await?,
        MergeStep::WatchHistory => {
            transfers::transfer_watch_history(tx, source, destination).await?
        }
        MergeStep::Preferences => {
            result.preferences_merged = merge_preferences(tx, source, destination).await?;
            return Ok(());
        }
        MergeStep::Settings => {
            // Destination settings win; source settings are not copied
            result.settings_merged = true;
            return Ok(());
        }
        MergeStep::Subscription => {
            result.subscription_merged = transfer_subscription(tx, source, destination).await?;
            return Ok(());
        }
        MergeStep::MarkMerged => {
            transfers::mark_source_merged(tx, source).await?;
            return Ok(());
        }
        MergeStep::Audit => {
            // The entry describes the result that is about to commit
            let mut recorded = result.clone();
            recorded.success = true;
            record_merge(tx, source, destination, &recorded).await?;
            return Ok(());
        }
        MergeStep::Begin | MergeStep::LockAccounts | MergeStep::Commit => return Ok(()),
    };
    result.record(step, outcome);
    Ok(())
}
