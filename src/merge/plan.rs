//! Transfer plans
//!
//! Every owned-data table is described once here: which column names the
//! owner, and which column (if any) forms a unique key together with it.
//! Transfer operations and store implementations work from these plans, so
//! table and column names never come from user input.

/// Plain ownership reassignment (no uniqueness beyond the row itself)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassign {
    pub table: &'static str,
    pub owner_column: &'static str,
}

/// Dedup-then-reassign for a table with `UNIQUE(owner_column, key_column)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupReassign {
    pub table: &'static str,
    pub owner_column: &'static str,
    pub key_column: &'static str,
}

impl DedupReassign {
    pub const fn reassign(&self) -> Reassign {
        Reassign {
            table: self.table,
            owner_column: self.owner_column,
        }
    }
}

/// Self-referencing edge table with `UNIQUE(follower_column, following_column)`.
///
/// An account can sit on either end of an edge, so a merge runs the
/// dedup-then-reassign pattern once per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowEdges {
    pub table: &'static str,
    pub follower_column: &'static str,
    pub following_column: &'static str,
}

impl FollowEdges {
    /// Source as follower: reassign edges the source created
    pub const fn outgoing(&self) -> DedupReassign {
        DedupReassign {
            table: self.table,
            owner_column: self.follower_column,
            key_column: self.following_column,
        }
    }

    /// Source as followed: reassign edges pointing at the source
    pub const fn incoming(&self) -> DedupReassign {
        DedupReassign {
            table: self.table,
            owner_column: self.following_column,
            key_column: self.follower_column,
        }
    }
}

pub const USERS_TABLE: &str = "users";
pub const PREFERENCES_TABLE: &str = "user_preferences";
pub const SUBSCRIPTIONS_TABLE: &str = "subscriptions";
pub const AUDIT_LOG_TABLE: &str = "moderation_audit_logs";

pub const CLIPS: Reassign = Reassign {
    table: "clips",
    owner_column: "submitted_by_user_id",
};

pub const COMMENTS: Reassign = Reassign {
    table: "comments",
    owner_column: "user_id",
};

pub const VOTES: DedupReassign = DedupReassign {
    table: "votes",
    owner_column: "user_id",
    key_column: "clip_id",
};

pub const FAVORITES: DedupReassign = DedupReassign {
    table: "favorites",
    owner_column: "user_id",
    key_column: "clip_id",
};

pub const COMMENT_VOTES: DedupReassign = DedupReassign {
    table: "comment_votes",
    owner_column: "user_id",
    key_column: "comment_id",
};

pub const WATCH_HISTORY: DedupReassign = DedupReassign {
    table: "watch_history",
    owner_column: "user_id",
    key_column: "clip_id",
};

pub const BROADCASTER_FOLLOWS: DedupReassign = DedupReassign {
    table: "broadcaster_follows",
    owner_column: "user_id",
    key_column: "broadcaster_id",
};

pub const STREAM_FOLLOWS: DedupReassign = DedupReassign {
    table: "stream_follows",
    owner_column: "user_id",
    key_column: "streamer_username",
};

pub const GAME_FOLLOWS: DedupReassign = DedupReassign {
    table: "game_follows",
    owner_column: "user_id",
    key_column: "game_id",
};

pub const USER_FOLLOWS: FollowEdges = FollowEdges {
    table: "user_follows",
    follower_column: "follower_id",
    following_column: "following_id",
};

/// Single-direction follow tables, in transfer order
pub const TARGET_FOLLOWS: [DedupReassign; 3] = [BROADCASTER_FOLLOWS, STREAM_FOLLOWS, GAME_FOLLOWS];
