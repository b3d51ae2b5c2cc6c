//! Subscription conditional transfer
//!
//! A paid entitlement follows the user only when it is live and the
//! destination has no subscription history of its own. Billing rows are
//! never duplicated or overwritten.

use tracing::{debug, info};

use super::error::MergeError;
use super::plan::SUBSCRIPTIONS_TABLE;
use super::store::MergeTx;
use super::types::SubscriptionStatus;
use crate::core_types::AccountId;

/// Returns whether a subscription changed owner
pub async fn transfer_subscription(
    tx: &mut dyn MergeTx,
    source: AccountId,
    destination: AccountId,
) -> Result<bool, MergeError> {
    let presence = tx.probe(SUBSCRIPTIONS_TABLE, "user_id", source).await?;
    if !presence.has_rows() {
        debug!(table_present = presence.exists(), "No source subscription to transfer");
        return Ok(false);
    }

    let statuses = tx.subscription_statuses(source).await?;
    if !statuses.iter().any(SubscriptionStatus::is_transferable) {
        debug!(
            statuses = ?statuses.iter().map(SubscriptionStatus::as_str).collect::<Vec<_>>(),
            "Source subscription is not active, leaving it in place"
        );
        return Ok(false);
    }

    if !tx.subscription_statuses(destination).await?.is_empty() {
        info!(
            source = %source,
            destination = %destination,
            "Destination already has a subscription, source subscription not transferred"
        );
        return Ok(false);
    }

    let moved = tx
        .reassign_subscriptions(source, destination, &SubscriptionStatus::TRANSFERABLE)
        .await?;
    debug!(transferred = moved, "Subscription reassigned");
    Ok(moved > 0)
}
