//! Ownership transfer operations
//!
//! One function per kind of owned data. Each runs inside the merge
//! transaction and reports what it moved; none of them commits.

use tracing::{debug, warn};

use super::error::MergeError;
use super::plan::{
    CLIPS, COMMENT_VOTES, COMMENTS, DedupReassign, FAVORITES, Reassign, TARGET_FOLLOWS,
    USER_FOLLOWS, USERS_TABLE, VOTES, WATCH_HISTORY,
};
use super::result::StepOutcome;
use super::store::{MergeTx, close_savepoint};
use super::types::AccountStatus;
use crate::core_types::AccountId;

/// Plain reassignment, no delete phase
async fn reassign_all(
    tx: &mut dyn MergeTx,
    plan: Reassign,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    let moved = tx.reassign(plan, source, destination).await?;
    debug!(table = plan.table, transferred = moved, "Rows reassigned");
    Ok(StepOutcome::transferred(moved))
}

/// Drop source rows the destination already has a key for, then reassign
/// the rest. Destination rows are never touched.
pub async fn dedup_then_reassign(
    tx: &mut dyn MergeTx,
    plan: DedupReassign,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    let duplicates = tx.delete_conflicts(plan, source, destination).await?;
    let moved = tx.reassign(plan.reassign(), source, destination).await?;
    debug!(
        table = plan.table,
        owner_column = plan.owner_column,
        transferred = moved,
        duplicates_skipped = duplicates,
        "Rows deduplicated and reassigned"
    );
    Ok(StepOutcome {
        transferred: moved,
        duplicates_skipped: duplicates,
    })
}

pub async fn transfer_clips(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    reassign_all(tx, CLIPS, source, destination).await
}

pub async fn transfer_votes(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    dedup_then_reassign(tx, VOTES, source, destination).await
}

pub async fn transfer_favorites(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    dedup_then_reassign(tx, FAVORITES, source, destination).await
}

/// Comments move as-is; comment votes are deduplicated per comment.
///
/// Only the comments themselves count as transferred.
pub async fn transfer_comments(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    let mut outcome = reassign_all(tx, COMMENTS, source, destination).await?;
    let votes = dedup_then_reassign(tx, COMMENT_VOTES, source, destination).await?;
    outcome.duplicates_skipped += votes.duplicates_skipped;
    Ok(outcome)
}

pub async fn transfer_watch_history(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    dedup_then_reassign(tx, WATCH_HISTORY, source, destination).await
}

/// Broadcaster, stream, game and user follows.
///
/// Each follow table is a soft unit: it runs under its own savepoint, and a
/// failure is logged, rolled back to that savepoint and counted as zero while
/// the other tables still transfer. Serialization conflicts and a failing
/// savepoint statement are hard errors; a conflict restarts the attempt.
pub async fn transfer_follows(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    let mut total = StepOutcome::default();

    for plan in TARGET_FOLLOWS {
        tx.savepoint(plan.table).await?;
        let outcome = target_follows(tx, plan, source, destination).await;
        match close_savepoint(tx, plan.table, outcome).await? {
            Ok(outcome) => total.add(outcome),
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => warn!(
                table = plan.table,
                source = %source,
                destination = %destination,
                error = %e,
                "Failed to transfer follows, continuing"
            ),
        }
    }

    tx.savepoint(USER_FOLLOWS.table).await?;
    let outcome = user_follows(tx, source, destination).await;
    match close_savepoint(tx, USER_FOLLOWS.table, outcome).await? {
        Ok(outcome) => total.add(outcome),
        Err(e) if e.is_retryable() => return Err(e),
        Err(e) => warn!(
            table = USER_FOLLOWS.table,
            source = %source,
            destination = %destination,
            error = %e,
            "Failed to transfer user follows, continuing"
        ),
    }

    Ok(total)
}

async fn target_follows(
    tx: &mut dyn MergeTx,
    plan: DedupReassign,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    let presence = tx.probe(plan.table, plan.owner_column, source).await?;
    if !presence.has_rows() {
        return Ok(StepOutcome::default());
    }
    dedup_then_reassign(tx, plan, source, destination).await
}

/// Both directions of the account-to-account follow graph.
///
/// Edges between the two accounts are removed first: after the merge either
/// one would be a self-follow.
async fn user_follows(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<StepOutcome, MergeError> {
    let as_follower = tx
        .probe(USER_FOLLOWS.table, USER_FOLLOWS.follower_column, source)
        .await?;
    let as_followed = tx
        .probe(USER_FOLLOWS.table, USER_FOLLOWS.following_column, source)
        .await?;
    if !as_follower.or(as_followed).has_rows() {
        return Ok(StepOutcome::default());
    }

    let mut outcome = StepOutcome {
        transferred: 0,
        duplicates_skipped: tx.delete_links(USER_FOLLOWS, source, destination).await?,
    };
    outcome.add(dedup_then_reassign(tx, USER_FOLLOWS.outgoing(), source, destination).await?);
    outcome.add(dedup_then_reassign(tx, USER_FOLLOWS.incoming(), source, destination).await?);
    Ok(outcome)
}

/// Set the source's status to `merged`
pub async fn mark_source_merged(tx: &mut dyn MergeTx, source: AccountId) -> Result<(), MergeError> {
    let updated = tx.set_account_status(source, &AccountStatus::Merged).await?;
    if updated == 0 {
        return Err(MergeError::AccountNotFound(source));
    }
    debug!(table = USERS_TABLE, account = %source, "Account marked as merged");
    Ok(())
}
