//! Merge Error Types

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::core_types::AccountId;

/// Phases of a merge, in execution order.
///
/// Transfer steps are listed in [`MergeStep::TRANSFER_ORDER`]; the remaining
/// variants bracket them (transaction begin, account locking, commit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStep {
    Begin,
    LockAccounts,
    Clips,
    Votes,
    Favorites,
    Comments,
    Follows,
    WatchHistory,
    Preferences,
    Settings,
    Subscription,
    MarkMerged,
    Audit,
    Commit,
}

impl MergeStep {
    /// Deterministic order of the data-moving steps
    pub const TRANSFER_ORDER: [MergeStep; 11] = [
        MergeStep::Clips,
        MergeStep::Votes,
        MergeStep::Favorites,
        MergeStep::Comments,
        MergeStep::Follows,
        MergeStep::WatchHistory,
        MergeStep::Preferences,
        MergeStep::Settings,
        MergeStep::Subscription,
        MergeStep::MarkMerged,
        MergeStep::Audit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStep::Begin => "begin",
            MergeStep::LockAccounts => "lock_accounts",
            MergeStep::Clips => "clips",
            MergeStep::Votes => "votes",
            MergeStep::Favorites => "favorites",
            MergeStep::Comments => "comments",
            MergeStep::Follows => "follows",
            MergeStep::WatchHistory => "watch_history",
            MergeStep::Preferences => "preferences",
            MergeStep::Settings => "settings",
            MergeStep::Subscription => "subscription",
            MergeStep::MarkMerged => "mark_merged",
            MergeStep::Audit => "audit",
            MergeStep::Commit => "commit",
        }
    }

    /// Verb phrase used in error messages ("failed to ...")
    pub fn action(&self) -> &'static str {
        match self {
            MergeStep::Begin => "begin transaction",
            MergeStep::LockAccounts => "lock accounts",
            MergeStep::Clips => "transfer clips",
            MergeStep::Votes => "transfer votes",
            MergeStep::Favorites => "transfer favorites",
            MergeStep::Comments => "transfer comments",
            MergeStep::Follows => "transfer follows",
            MergeStep::WatchHistory => "transfer watch history",
            MergeStep::Preferences => "merge user preferences",
            MergeStep::Settings => "keep destination settings",
            MergeStep::Subscription => "transfer subscription",
            MergeStep::MarkMerged => "mark account as merged",
            MergeStep::Audit => "create merge audit log",
            MergeStep::Commit => "commit transaction",
        }
    }
}

impl fmt::Display for MergeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Merge error types
///
/// Every variant is a hard error: the merge transaction has been rolled back
/// by the time the caller sees it.
#[derive(Error, Debug, Clone)]
pub enum MergeError {
    // === Validation Errors ===
    #[error("Source and destination account are the same: {0}")]
    SameAccount(AccountId),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Destination account {0} has itself been merged")]
    DestinationRetired(AccountId),

    // === Execution Errors ===
    #[error("failed to {}: {source}", .step.action())]
    Step {
        step: MergeStep,
        #[source]
        source: Box<MergeError>,
    },

    #[error("Serialization conflict: {0}")]
    Conflict(String),

    #[error("Merge attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl MergeError {
    /// Attach the step that failed
    pub fn at(self, step: MergeStep) -> Self {
        MergeError::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping step wrappers
    pub fn root(&self) -> &MergeError {
        match self {
            MergeError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// The step that failed, if known
    pub fn step(&self) -> Option<MergeStep> {
        match self {
            MergeError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Only serialization failures and deadlocks are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), MergeError::Conflict(_))
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self.root() {
            MergeError::SameAccount(_) => "SAME_ACCOUNT",
            MergeError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            MergeError::DestinationRetired(_) => "DESTINATION_RETIRED",
            MergeError::Conflict(_) => "SERIALIZATION_CONFLICT",
            MergeError::Timeout(_) => "TIMEOUT",
            MergeError::Database(_) => "DATABASE_ERROR",
            MergeError::SystemError(_) | MergeError::Step { .. } => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self.root() {
            MergeError::SameAccount(_) => 400,
            MergeError::AccountNotFound(_) => 404,
            MergeError::DestinationRetired(_) | MergeError::Conflict(_) => 409,
            MergeError::Timeout(_) => 504,
            MergeError::Database(_) | MergeError::SystemError(_) | MergeError::Step { .. } => 500,
        }
    }
}

/// SQLSTATE serialization_failure
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE deadlock_detected
const SQLSTATE_DEADLOCK: &str = "40P01";

impl From<sqlx::Error> for MergeError {
    fn from(e: sqlx::Error) -> Self {
        let retryable = e
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == SQLSTATE_SERIALIZATION_FAILURE || code == SQLSTATE_DEADLOCK);
        if retryable {
            MergeError::Conflict(e.to_string())
        } else {
            MergeError::Database(e.to_string())
        }
    }
}
