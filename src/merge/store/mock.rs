//! In-memory merge store for tests
//!
//! A transaction works on a private copy of the committed state and swaps it
//! in on commit, so rollback and atomicity behave like the real database.
//! Unique keys and the no-self-follow check of the platform schema are
//! enforced after every write.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{MergeStore, MergeTx};
use crate::config::IsolationLevel;
use crate::core_types::AccountId;
use crate::merge::audit::AuditLogEntry;
use crate::merge::error::MergeError;
use crate::merge::plan::{
    AUDIT_LOG_TABLE, CLIPS, COMMENT_VOTES, COMMENTS, DedupReassign, FAVORITES, FollowEdges,
    PREFERENCES_TABLE, Reassign, SUBSCRIPTIONS_TABLE, TARGET_FOLLOWS, USER_FOLLOWS, USERS_TABLE,
    VOTES, WATCH_HISTORY,
};
use crate::merge::preferences::Preferences;
use crate::merge::types::{AccountRecord, AccountStatus, SubscriptionStatus, TablePresence};

pub type Row = BTreeMap<&'static str, String>;

/// Committed contents of the mock database
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockState {
    pub users: BTreeMap<AccountId, AccountStatus>,
    /// Generic owned-data tables; a missing key means the table does not exist
    pub tables: BTreeMap<&'static str, Vec<Row>>,
    /// `None` when the table does not exist
    pub preferences: Option<BTreeMap<AccountId, Preferences>>,
    /// (owner, status); `None` when the table does not exist
    pub subscriptions: Option<Vec<(AccountId, String)>>,
    pub audit_logs: Vec<AuditLogEntry>,
}

impl MockState {
    fn owned(&self, table: &str, column: &str, owner: AccountId) -> usize {
        let owner = owner.to_string();
        self.tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| r.get(column) == Some(&owner)).count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
struct Faults {
    failing_tables: HashSet<&'static str>,
    stalled_tables: HashSet<&'static str>,
    fail_begin: bool,
    fail_commit: bool,
    /// Commits that fail with a serialization conflict before one succeeds
    conflicts_on_commit: usize,
    /// Tables whose next statement fails with a serialization conflict
    conflicting_tables: HashSet<&'static str>,
}

#[derive(Debug, Default)]
struct MockInner {
    state: MockState,
    faults: Faults,
    begins: usize,
    commits: usize,
    rollbacks: usize,
}

/// Shared handle; clones see the same database
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<MockInner>>,
}

impl MockStore {
    /// Store with every platform table present and empty
    pub fn new() -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.lock().unwrap();
            let state = &mut inner.state;
            for table in [CLIPS.table, COMMENTS.table] {
                state.tables.insert(table, Vec::new());
            }
            for plan in [VOTES, FAVORITES, COMMENT_VOTES, WATCH_HISTORY] {
                state.tables.insert(plan.table, Vec::new());
            }
            for plan in TARGET_FOLLOWS {
                state.tables.insert(plan.table, Vec::new());
            }
            state.tables.insert(USER_FOLLOWS.table, Vec::new());
            state.preferences = Some(BTreeMap::new());
            state.subscriptions = Some(Vec::new());
        }
        store
    }

    pub fn add_account(&self, status: AccountStatus) -> AccountId {
        let id = AccountId::random();
        self.inner.lock().unwrap().state.users.insert(id, status);
        id
    }

    pub fn insert(&self, table: &'static str, values: &[(&'static str, String)]) {
        let row: Row = values.iter().cloned().collect();
        self.inner
            .lock()
            .unwrap()
            .state
            .tables
            .entry(table)
            .or_default()
            .push(row);
    }

    pub fn drop_table(&self, table: &'static str) {
        let mut inner = self.inner.lock().unwrap();
        match table {
            PREFERENCES_TABLE => inner.state.preferences = None,
            SUBSCRIPTIONS_TABLE => inner.state.subscriptions = None,
            _ => {
                inner.state.tables.remove(table);
            }
        }
    }

    pub fn set_preferences(&self, prefs: Preferences) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .state
            .preferences
            .get_or_insert_with(BTreeMap::new)
            .insert(prefs.user_id, prefs);
    }

    pub fn add_subscription(&self, owner: AccountId, status: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .state
            .subscriptions
            .get_or_insert_with(Vec::new)
            .push((owner, status.to_string()));
    }

    /// Every statement touching `table` fails
    pub fn fail_table(&self, table: &'static str) {
        self.inner.lock().unwrap().faults.failing_tables.insert(table);
    }

    /// Every statement touching `table` never completes
    pub fn stall_table(&self, table: &'static str) {
        self.inner.lock().unwrap().faults.stalled_tables.insert(table);
    }

    /// The next statement touching `table`, in any transaction, fails with a
    /// serialization conflict
    pub fn conflict_table(&self, table: &'static str) {
        self.inner
            .lock()
            .unwrap()
            .faults
            .conflicting_tables
            .insert(table);
    }

    pub fn fail_begin(&self) {
        self.inner.lock().unwrap().faults.fail_begin = true;
    }

    pub fn fail_commit(&self) {
        self.inner.lock().unwrap().faults.fail_commit = true;
    }

    pub fn conflict_on_commit(&self, times: usize) {
        self.inner.lock().unwrap().faults.conflicts_on_commit = times;
    }

    pub fn state(&self) -> MockState {
        self.inner.lock().unwrap().state.clone()
    }

    /// Rows of `table` whose `column` equals `owner`
    pub fn count(&self, table: &str, column: &str, owner: AccountId) -> usize {
        self.inner.lock().unwrap().state.owned(table, column, owner)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .lock()
            .unwrap()
            .state
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn status(&self, id: AccountId) -> Option<AccountStatus> {
        self.inner.lock().unwrap().state.users.get(&id).cloned()
    }

    pub fn begins(&self) -> usize {
        self.inner.lock().unwrap().begins
    }

    pub fn commits(&self) -> usize {
        self.inner.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.lock().unwrap().rollbacks
    }
}

#[async_trait]
impl MergeStore for MockStore {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn begin(&self, _isolation: IsolationLevel) -> Result<Box<dyn MergeTx>, MergeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.begins += 1;
        if inner.faults.fail_begin {
            return Err(MergeError::Database("Mock begin failure".to_string()));
        }
        Ok(Box::new(MockTx {
            shared: self.inner.clone(),
            working: inner.state.clone(),
            faults: inner.faults.clone(),
            savepoints: Vec::new(),
        }))
    }
}

pub struct MockTx {
    shared: Arc<Mutex<MockInner>>,
    working: MockState,
    faults: Faults,
    savepoints: Vec<(&'static str, MockState)>,
}

/// (table, left, right) pairs that must be unique
const UNIQUE_KEYS: [(&str, &str, &str); 8] = [
    ("votes", "user_id", "clip_id"),
    ("favorites", "user_id", "clip_id"),
    ("comment_votes", "user_id", "comment_id"),
    ("watch_history", "user_id", "clip_id"),
    ("broadcaster_follows", "user_id", "broadcaster_id"),
    ("stream_follows", "user_id", "streamer_username"),
    ("game_follows", "user_id", "game_id"),
    ("user_follows", "follower_id", "following_id"),
];

impl MockTx {
    async fn touch(&self, table: &'static str) -> Result<(), MergeError> {
        if self.faults.stalled_tables.contains(table) {
            std::future::pending::<()>().await;
        }
        if self.faults.failing_tables.contains(table) {
            return Err(MergeError::Database(format!("Mock failure on {}", table)));
        }
        let conflicted = {
            let mut inner = self.shared.lock().unwrap();
            inner.faults.conflicting_tables.remove(table)
        };
        if conflicted {
            return Err(MergeError::Conflict(format!(
                "could not serialize access on {}",
                table
            )));
        }
        Ok(())
    }

    fn table_mut(&mut self, table: &'static str) -> Result<&mut Vec<Row>, MergeError> {
        self.working
            .tables
            .get_mut(table)
            .ok_or_else(|| MergeError::Database(format!("relation \"{}\" does not exist", table)))
    }

    fn check_constraints(&self, table: &str) -> Result<(), MergeError> {
        let Some(rows) = self.working.tables.get(table) else {
            return Ok(());
        };
        for (t, left, right) in UNIQUE_KEYS {
            if t != table {
                continue;
            }
            let mut seen = HashSet::new();
            for row in rows {
                if !seen.insert((row.get(left), row.get(right))) {
                    return Err(MergeError::Database(format!(
                        "duplicate key value violates unique constraint on {} ({}, {})",
                        table, left, right
                    )));
                }
            }
        }
        if table == USER_FOLLOWS.table {
            let self_follow = rows.iter().any(|r| {
                r.get(USER_FOLLOWS.follower_column) == r.get(USER_FOLLOWS.following_column)
            });
            if self_follow {
                return Err(MergeError::Database(
                    "new row violates check constraint user_follows_no_self_follow".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MergeTx for MockTx {
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<AccountRecord>, MergeError> {
        self.touch(USERS_TABLE).await?;
        let mut records: Vec<AccountRecord> = ids
            .iter()
            .filter_map(|id| {
                self.working.users.get(id).map(|status| AccountRecord {
                    id: *id,
                    status: status.clone(),
                })
            })
            .collect();
        records.sort_by_key(|r| r.id);
        records.dedup_by_key(|r| r.id);
        Ok(records)
    }

    async fn probe(
        &mut self,
        table: &'static str,
        owner_column: &'static str,
        owner: AccountId,
    ) -> Result<TablePresence, MergeError> {
        self.touch(table).await?;
        let (exists, has_rows) = match table {
            PREFERENCES_TABLE => match &self.working.preferences {
                Some(prefs) => (true, prefs.contains_key(&owner)),
                None => (false, false),
            },
            SUBSCRIPTIONS_TABLE => match &self.working.subscriptions {
                Some(subs) => (true, subs.iter().any(|(o, _)| *o == owner)),
                None => (false, false),
            },
            _ => (
                self.working.tables.contains_key(table),
                self.working.owned(table, owner_column, owner) > 0,
            ),
        };
        Ok(match (exists, has_rows) {
            (false, _) => TablePresence::Absent,
            (true, false) => TablePresence::Empty,
            (true, true) => TablePresence::HasRows,
        })
    }

    async fn reassign(
        &mut self,
        plan: Reassign,
        source: AccountId,
        destination: AccountId,
    ) -> Result<u64, MergeError> {
        self.touch(plan.table).await?;
        let (src, dst) = (source.to_string(), destination.to_string());
        let mut moved = 0;
        for row in self.table_mut(plan.table)? {
            if row.get(plan.owner_column) == Some(&src) {
                row.insert(plan.owner_column, dst.clone());
                moved += 1;
            }
        }
        self.check_constraints(plan.table)?;
        Ok(moved)
    }

    async fn delete_conflicts(
        &mut self,
        plan: DedupReassign,
        source: AccountId,
        destination: AccountId,
    ) -> Result<u64, MergeError> {
        self.touch(plan.table).await?;
        let (src, dst) = (source.to_string(), destination.to_string());
        let rows = self.table_mut(plan.table)?;
        let taken: HashSet<String> = rows
            .iter()
            .filter(|r| r.get(plan.owner_column) == Some(&dst))
            .filter_map(|r| r.get(plan.key_column).cloned())
            .collect();
        let before = rows.len();
        rows.retain(|r| {
            let conflicting = r.get(plan.owner_column) == Some(&src)
                && r.get(plan.key_column).is_some_and(|k| taken.contains(k));
            !conflicting
        });
        Ok((before - rows.len()) as u64)
    }

    async fn delete_links(
        &mut self,
        edges: FollowEdges,
        a: AccountId,
        b: AccountId,
    ) -> Result<u64, MergeError> {
        self.touch(edges.table).await?;
        let (a, b) = (a.to_string(), b.to_string());
        let rows = self.table_mut(edges.table)?;
        let before = rows.len();
        rows.retain(|r| {
            let f = r.get(edges.follower_column);
            let g = r.get(edges.following_column);
            let linked = (f == Some(&a) && g == Some(&b)) || (f == Some(&b) && g == Some(&a));
            !linked
        });
        Ok((before - rows.len()) as u64)
    }

    async fn load_preferences(&mut self, owner: AccountId) -> Result<Option<Preferences>, MergeError> {
        self.touch(PREFERENCES_TABLE).await?;
        Ok(self
            .working
            .preferences
            .as_ref()
            .and_then(|p| p.get(&owner).cloned()))
    }

    async fn upsert_preferences(&mut self, prefs: &Preferences) -> Result<(), MergeError> {
        self.touch(PREFERENCES_TABLE).await?;
        let table = self.working.preferences.as_mut().ok_or_else(|| {
            MergeError::Database("relation \"user_preferences\" does not exist".to_string())
        })?;
        table.insert(prefs.user_id, prefs.clone());
        Ok(())
    }

    async fn delete_preferences(&mut self, owner: AccountId) -> Result<u64, MergeError> {
        self.touch(PREFERENCES_TABLE).await?;
        Ok(self
            .working
            .preferences
            .as_mut()
            .and_then(|p| p.remove(&owner))
            .map_or(0, |_| 1))
    }

    async fn subscription_statuses(
        &mut self,
        owner: AccountId,
    ) -> Result<Vec<SubscriptionStatus>, MergeError> {
        self.touch(SUBSCRIPTIONS_TABLE).await?;
        Ok(self
            .working
            .subscriptions
            .iter()
            .flatten()
            .filter(|(o, _)| *o == owner)
            .map(|(_, s)| SubscriptionStatus::parse(s))
            .collect())
    }

    async fn reassign_subscriptions(
        &mut self,
        source: AccountId,
        destination: AccountId,
        statuses: &[&'static str],
    ) -> Result<u64, MergeError> {
        self.touch(SUBSCRIPTIONS_TABLE).await?;
        let mut moved = 0;
        for (owner, status) in self.working.subscriptions.iter_mut().flatten() {
            if *owner == source && statuses.iter().any(|s| *s == status.as_str()) {
                *owner = destination;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn set_account_status(
        &mut self,
        id: AccountId,
        status: &AccountStatus,
    ) -> Result<u64, MergeError> {
        self.touch(USERS_TABLE).await?;
        Ok(match self.working.users.get_mut(&id) {
            Some(current) => {
                *current = status.clone();
                1
            }
            None => 0,
        })
    }

    async fn insert_audit_log(&mut self, entry: &AuditLogEntry) -> Result<(), MergeError> {
        self.touch(AUDIT_LOG_TABLE).await?;
        self.working.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn savepoint(&mut self, name: &'static str) -> Result<(), MergeError> {
        self.savepoints.push((name, self.working.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> Result<(), MergeError> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|(n, _)| *n == name)
            .ok_or_else(|| MergeError::Database(format!("savepoint \"{}\" does not exist", name)))?;
        // The savepoint itself survives a rollback to it
        self.savepoints.truncate(pos + 1);
        self.working = self.savepoints[pos].1.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &'static str) -> Result<(), MergeError> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|(n, _)| *n == name)
            .ok_or_else(|| MergeError::Database(format!("savepoint \"{}\" does not exist", name)))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), MergeError> {
        let MockTx {
            shared, working, ..
        } = *self;
        let mut inner = shared.lock().unwrap();
        if inner.faults.conflicts_on_commit > 0 {
            inner.faults.conflicts_on_commit -= 1;
            inner.rollbacks += 1;
            return Err(MergeError::Conflict(
                "could not serialize access due to read/write dependencies".to_string(),
            ));
        }
        if inner.faults.fail_commit {
            inner.rollbacks += 1;
            return Err(MergeError::Database("Mock commit failure".to_string()));
        }
        inner.state = working;
        inner.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), MergeError> {
        self.shared.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_work_is_invisible() {
        let store = MockStore::new();
        let a = store.add_account(AccountStatus::Unclaimed);
        let b = store.add_account(AccountStatus::Active);
        store.insert("clips", &[("submitted_by_user_id", a.to_string())]);

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(tx.reassign(CLIPS, a, b).await.unwrap(), 1);
        assert_eq!(store.count("clips", "submitted_by_user_id", a), 1);
        tx.rollback().await.unwrap();

        assert_eq!(store.count("clips", "submitted_by_user_id", a), 1);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_reassign_enforces_unique_key() {
        let store = MockStore::new();
        let a = store.add_account(AccountStatus::Unclaimed);
        let b = store.add_account(AccountStatus::Active);
        for owner in [a, b] {
            store.insert(
                "votes",
                &[("user_id", owner.to_string()), ("clip_id", "c1".to_string())],
            );
        }

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let err = tx.reassign(VOTES.reassign(), a, b).await.unwrap_err();
        assert!(err.to_string().contains("unique constraint"));
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_restores_working_copy() {
        let store = MockStore::new();
        let a = store.add_account(AccountStatus::Unclaimed);
        let b = store.add_account(AccountStatus::Active);
        store.insert("comments", &[("user_id", a.to_string())]);

        let mut tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        tx.savepoint("sp").await.unwrap();
        tx.reassign(COMMENTS, a, b).await.unwrap();
        tx.rollback_to_savepoint("sp").await.unwrap();
        tx.release_savepoint("sp").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.count("comments", "user_id", a), 1);
        assert_eq!(store.commits(), 1);
    }
}
