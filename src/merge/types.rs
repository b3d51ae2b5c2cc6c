//! Merge Core Types

use std::fmt;

use crate::core_types::AccountId;

/// `users.account_status`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountStatus {
    Active,
    Unclaimed,
    /// Terminal: data has been folded into another account
    Merged,
    /// Any status this engine does not act on (suspended, banned, ...)
    Other(String),
}

impl AccountStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Unclaimed => "unclaimed",
            AccountStatus::Merged => "merged",
            AccountStatus::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => AccountStatus::Active,
            "unclaimed" => AccountStatus::Unclaimed,
            "merged" => AccountStatus::Merged,
            other => AccountStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A locked `users` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: AccountId,
    pub status: AccountStatus,
}

/// Result of probing an optional table for one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePresence {
    /// Table does not exist in this deployment
    Absent,
    /// Table exists, the owner has no rows in it
    Empty,
    /// Table exists and the owner has at least one row
    HasRows,
}

impl TablePresence {
    pub fn exists(&self) -> bool {
        !matches!(self, TablePresence::Absent)
    }

    pub fn has_rows(&self) -> bool {
        matches!(self, TablePresence::HasRows)
    }

    /// Combine probes of the same table (e.g. both sides of a link table)
    pub fn or(self, other: TablePresence) -> TablePresence {
        match (self, other) {
            (TablePresence::HasRows, _) | (_, TablePresence::HasRows) => TablePresence::HasRows,
            (TablePresence::Empty, _) | (_, TablePresence::Empty) => TablePresence::Empty,
            _ => TablePresence::Absent,
        }
    }
}

/// `subscriptions.status`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Canceled,
    PastDue,
    Other(String),
}

impl SubscriptionStatus {
    /// Statuses that carry a live entitlement and may follow the user
    pub const TRANSFERABLE: [&'static str; 2] = ["active", "trialing"];

    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "canceled" => SubscriptionStatus::Canceled,
            "past_due" => SubscriptionStatus::PastDue,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }

    #[inline]
    pub fn is_transferable(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }
}
