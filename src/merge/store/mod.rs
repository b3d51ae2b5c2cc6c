//! Merge Store
//!
//! The transactional store a merge runs against. One [`MergeTx`] is one
//! database transaction; every transfer operation receives it by `&mut` and
//! nothing is visible outside it until [`MergeTx::commit`].
//!
//! Implementations must take row locks on everything they update or delete so
//! that concurrent platform writes against either account block until the
//! merge commits or rolls back.

pub mod postgres;

#[cfg(test)]
pub mod mock;

pub use postgres::PgMergeStore;

use async_trait::async_trait;

use super::audit::AuditLogEntry;
use super::error::MergeError;
use super::plan::{DedupReassign, FollowEdges, Reassign};
use super::preferences::Preferences;
use super::types::{AccountRecord, AccountStatus, SubscriptionStatus, TablePresence};
use crate::config::IsolationLevel;
use crate::core_types::AccountId;

/// Opens merge transactions
#[async_trait]
pub trait MergeStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &'static str;

    /// Begin a transaction at the given isolation level
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn MergeTx>, MergeError>;
}

/// Statements a merge issues inside its transaction.
///
/// Row counts returned are rows affected by that single statement.
/// Dropping a transaction without calling [`MergeTx::commit`] rolls it back.
#[async_trait]
pub trait MergeTx: Send {
    /// Lock the `users` rows of the given accounts (`FOR UPDATE`, in id order).
    /// Missing accounts are simply absent from the result.
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<AccountRecord>, MergeError>;

    /// Schema probe for an optional table, scoped to one owner
    async fn probe(
        &mut self,
        table: &'static str,
        owner_column: &'static str,
        owner: AccountId,
    ) -> Result<TablePresence, MergeError>;

    /// `UPDATE table SET owner = destination WHERE owner = source`
    async fn reassign(
        &mut self,
        plan: Reassign,
        source: AccountId,
        destination: AccountId,
    ) -> Result<u64, MergeError>;

    /// Delete source rows whose key the destination already owns
    async fn delete_conflicts(
        &mut self,
        plan: DedupReassign,
        source: AccountId,
        destination: AccountId,
    ) -> Result<u64, MergeError>;

    /// Delete edges directly between `a` and `b`, in either direction
    async fn delete_links(
        &mut self,
        edges: FollowEdges,
        a: AccountId,
        b: AccountId,
    ) -> Result<u64, MergeError>;

    /// Load (and lock) one account's preferences row
    async fn load_preferences(&mut self, owner: AccountId) -> Result<Option<Preferences>, MergeError>;

    /// Insert or overwrite the row for `prefs.user_id`
    async fn upsert_preferences(&mut self, prefs: &Preferences) -> Result<(), MergeError>;

    async fn delete_preferences(&mut self, owner: AccountId) -> Result<u64, MergeError>;

    /// Status of every subscription row the account owns (locked)
    async fn subscription_statuses(
        &mut self,
        owner: AccountId,
    ) -> Result<Vec<SubscriptionStatus>, MergeError>;

    /// Reassign source subscriptions whose status is in `statuses`
    async fn reassign_subscriptions(
        &mut self,
        source: AccountId,
        destination: AccountId,
        statuses: &[&'static str],
    ) -> Result<u64, MergeError>;

    async fn set_account_status(
        &mut self,
        id: AccountId,
        status: &AccountStatus,
    ) -> Result<u64, MergeError>;

    async fn insert_audit_log(&mut self, entry: &AuditLogEntry) -> Result<(), MergeError>;

    async fn savepoint(&mut self, name: &'static str) -> Result<(), MergeError>;

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> Result<(), MergeError>;

    async fn release_savepoint(&mut self, name: &'static str) -> Result<(), MergeError>;

    async fn commit(self: Box<Self>) -> Result<(), MergeError>;

    async fn rollback(self: Box<Self>) -> Result<(), MergeError>;
}

/// Close a savepoint opened before a soft-failable operation.
///
/// Releases it when `outcome` is Ok, rolls back to it otherwise, and hands
/// `outcome` back. The outer error is reserved for the savepoint statement
/// itself failing, which leaves the transaction unusable.
pub async fn close_savepoint<T>(
    tx: &mut dyn MergeTx,
    name: &'static str,
    outcome: Result<T, MergeError>,
) -> Result<Result<T, MergeError>, MergeError> {
    match outcome {
        Ok(value) => {
            tx.release_savepoint(name).await?;
            Ok(Ok(value))
        }
        Err(e) => {
            tx.rollback_to_savepoint(name).await?;
            Ok(Err(e))
        }
    }
}
