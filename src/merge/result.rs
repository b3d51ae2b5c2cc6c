//! Merge result contract

use serde::{Deserialize, Serialize};

use super::error::{MergeError, MergeStep};

/// Counters of one dedup-then-reassign run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Source rows reassigned to the destination
    pub transferred: u64,
    /// Source rows deleted because the destination already had the key
    pub duplicates_skipped: u64,
}

impl StepOutcome {
    pub fn transferred(n: u64) -> Self {
        Self {
            transferred: n,
            duplicates_skipped: 0,
        }
    }

    pub fn add(&mut self, other: StepOutcome) {
        self.transferred += other.transferred;
        self.duplicates_skipped += other.duplicates_skipped;
    }
}

/// Report returned to callers of a merge.
///
/// Field names and meanings are a stable contract; the audit entry metadata
/// is built from this record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub clips_merged: u64,
    pub votes_merged: u64,
    pub favorites_merged: u64,
    pub comments_merged: u64,
    pub follows_merged: u64,
    pub watch_history_merged: u64,
    pub preferences_merged: bool,
    /// Always true: destination settings are authoritative and left as-is
    pub settings_merged: bool,
    pub subscription_merged: bool,
    /// Sum over every dedup operation of the merge
    pub duplicates_skipped: u64,
    pub success: bool,
    /// Empty on success
    pub error: String,
}

impl MergeResult {
    /// Failure report for a merge that returned a hard error.
    ///
    /// No counters are carried over: a failed merge left no effects.
    pub fn failed(err: &MergeError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            ..Self::default()
        }
    }

    /// Fold the counts of a row-moving step into the report
    pub fn record(&mut self, step: MergeStep, outcome: StepOutcome) {
        self.duplicates_skipped += outcome.duplicates_skipped;
        let counter = match step {
            MergeStep::Clips => &mut self.clips_merged,
            MergeStep::Votes => &mut self.votes_merged,
            MergeStep::Favorites => &mut self.favorites_merged,
            MergeStep::Comments => &mut self.comments_merged,
            MergeStep::Follows => &mut self.follows_merged,
            MergeStep::WatchHistory => &mut self.watch_history_merged,
            _ => return,
        };
        *counter += outcome.transferred;
    }

    /// Total rows that changed owner
    pub fn rows_transferred(&self) -> u64 {
        self.clips_merged
            + self.votes_merged
            + self.favorites_merged
            + self.comments_merged
            + self.follows_merged
            + self.watch_history_merged
    }
}
