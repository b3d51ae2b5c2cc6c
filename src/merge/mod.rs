//! Account Merge Engine
//!
//! Folds an unclaimed account (created from imported activity) into the
//! account a person actually logs in with.
//!
//! # Order of operations
//!
//! ```text
//! lock accounts → clips → votes → favorites → comments (+ comment votes)
//!   → follows → watch history → preferences → settings → subscription
//!   → mark source merged → audit log → COMMIT
//! ```
//!
//! # Invariants
//!
//! 1. **Atomicity**: all steps share one transaction; any hard failure rolls
//!    every step back
//! 2. **Conflict precedence**: where both accounts hold the same key, the
//!    destination's row is kept untouched and the source's row is deleted
//! 3. **Completeness**: after a successful merge the source owns nothing in
//!    any transferable table
//! 4. **Soft units**: a single follow table or the audit write may fail
//!    without aborting the merge; each runs under its own savepoint

pub mod audit;
pub mod coordinator;
pub mod error;
pub mod plan;
pub mod preferences;
pub mod result;
pub mod store;
pub mod subscription;
pub mod transfers;
pub mod types;


// Re-exports for convenience
pub use audit::{AuditLogEntry, AuditLogRepository};
pub use coordinator::AccountMergeService;
pub use error::{MergeError, MergeStep};
pub use preferences::Preferences;
pub use result::{MergeResult, StepOutcome};
pub use store::{MergeStore, MergeTx, PgMergeStore};
pub use types::{AccountStatus, SubscriptionStatus, TablePresence};
