//! PostgreSQL merge store
//!
//! Every statement runs on one `sqlx::Transaction`. Table and column names
//! are interpolated from the `'static` plans in [`crate::merge::plan`]; all
//! values are bound parameters.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{MergeStore, MergeTx};
use crate::config::{IsolationLevel, MergeConfig};
use crate::core_types::AccountId;
use crate::merge::audit::{AuditLogEntry, AuditLogRepository};
use crate::merge::error::MergeError;
use crate::merge::plan::{DedupReassign, FollowEdges, Reassign};
use crate::merge::preferences::Preferences;
use crate::merge::types::{AccountRecord, AccountStatus, SubscriptionStatus, TablePresence};

/// Merge store backed by the platform database
pub struct PgMergeStore {
    pool: PgPool,
    schema: String,
    lock_timeout_ms: Option<u64>,
}

impl PgMergeStore {
    pub fn new(pool: PgPool, config: &MergeConfig) -> Self {
        Self {
            pool,
            schema: config.schema.clone(),
            lock_timeout_ms: config.lock_timeout_ms,
        }
    }
}

#[async_trait]
impl MergeStore for PgMergeStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn MergeTx>, MergeError> {
        let mut tx = self.pool.begin().await?;

        // Must precede every other statement of the transaction
        let set_isolation = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&set_isolation).execute(&mut *tx).await?;

        if let Some(ms) = self.lock_timeout_ms {
            let set_lock_timeout = format!("SET LOCAL lock_timeout = '{}ms'", ms);
            sqlx::query(&set_lock_timeout).execute(&mut *tx).await?;
        }

        Ok(Box::new(PgMergeTx {
            tx,
            schema: self.schema.clone(),
        }))
    }
}

/// One open merge transaction. Dropping it rolls back.
pub struct PgMergeTx {
    tx: Transaction<'static, Postgres>,
    schema: String,
}

fn reassign_sql(plan: Reassign) -> String {
    format!(
        "UPDATE {table} SET {owner} = $1 WHERE {owner} = $2",
        table = plan.table,
        owner = plan.owner_column,
    )
}

fn delete_conflicts_sql(plan: DedupReassign) -> String {
    format!(
        "DELETE FROM {table} WHERE {owner} = $1 AND {key} IN (SELECT {key} FROM {table} WHERE {owner} = $2)",
        table = plan.table,
        owner = plan.owner_column,
        key = plan.key_column,
    )
}

fn delete_links_sql(edges: FollowEdges) -> String {
    format!(
        "DELETE FROM {table} WHERE ({a} = $1 AND {b} = $2) OR ({a} = $2 AND {b} = $1)",
        table = edges.table,
        a = edges.follower_column,
        b = edges.following_column,
    )
}

fn owner_has_rows_sql(table: &str, owner_column: &str) -> String {
    format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE {owner_column} = $1)")
}

#[async_trait]
impl MergeTx for PgMergeTx {
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<AccountRecord>, MergeError> {
        let ids: Vec<Uuid> = ids.iter().map(AccountId::as_uuid).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, account_status
            FROM users
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let status: String = row.try_get("account_status")?;
            records.push(AccountRecord {
                id: id.into(),
                status: AccountStatus::parse(&status),
            });
        }
        Ok(records)
    }

    async fn probe(
        &mut self,
        table: &'static str,
        owner_column: &'static str,
        owner: AccountId,
    ) -> Result<TablePresence, MergeError> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(format!("{}.{}", self.schema, table))
            .fetch_one(&mut *self.tx)
            .await?;
        if !exists {
            return Ok(TablePresence::Absent);
        }

        let sql = owner_has_rows_sql(table, owner_column);
        let has_rows = sqlx::query_scalar::<_, bool>(&sql)
            .bind(owner.as_uuid())
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(if has_rows {
            TablePresence::HasRows
        } else {
            TablePresence::Empty
        })
    }

    async fn reassign(
        &mut self,
        plan: Reassign,
        source: AccountId,
        destination: AccountId,
    ) -> Result<u64, MergeError> {
        let sql = reassign_sql(plan);
        let result = sqlx::query(&sql)
            .bind(destination.as_uuid())
            .bind(source.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_conflicts(
        &mut self,
        plan: DedupReassign,
        source: AccountId,
        destination: AccountId,
    ) -> Result<u64, MergeError> {
        let sql = delete_conflicts_sql(plan);
        let result = sqlx::query(&sql)
            .bind(source.as_uuid())
            .bind(destination.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_links(
        &mut self,
        edges: FollowEdges,
        a: AccountId,
        b: AccountId,
    ) -> Result<u64, MergeError> {
        let sql = delete_links_sql(edges);
        let result = sqlx::query(&sql)
            .bind(a.as_uuid())
            .bind(b.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn load_preferences(&mut self, owner: AccountId) -> Result<Option<Preferences>, MergeError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(favorite_games, '{}')       AS favorite_games,
                   COALESCE(followed_streamers, '{}')   AS followed_streamers,
                   COALESCE(preferred_categories, '{}') AS preferred_categories,
                   COALESCE(preferred_tags, '{}')       AS preferred_tags
            FROM user_preferences
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(owner.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Preferences {
            user_id: owner,
            favorite_games: row.try_get("favorite_games")?,
            followed_streamers: row.try_get("followed_streamers")?,
            preferred_categories: row.try_get("preferred_categories")?,
            preferred_tags: row.try_get("preferred_tags")?,
        }))
    }

    async fn upsert_preferences(&mut self, prefs: &Preferences) -> Result<(), MergeError> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences
                (user_id, favorite_games, followed_streamers, preferred_categories, preferred_tags, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET
                favorite_games = EXCLUDED.favorite_games,
                followed_streamers = EXCLUDED.followed_streamers,
                preferred_categories = EXCLUDED.preferred_categories,
                preferred_tags = EXCLUDED.preferred_tags,
                updated_at = NOW()
            "#,
        )
        .bind(prefs.user_id.as_uuid())
        .bind(&prefs.favorite_games)
        .bind(&prefs.followed_streamers)
        .bind(&prefs.preferred_categories)
        .bind(&prefs.preferred_tags)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_preferences(&mut self, owner: AccountId) -> Result<u64, MergeError> {
        let result = sqlx::query("DELETE FROM user_preferences WHERE user_id = $1")
            .bind(owner.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn subscription_statuses(
        &mut self,
        owner: AccountId,
    ) -> Result<Vec<SubscriptionStatus>, MergeError> {
        let statuses = sqlx::query_scalar::<_, String>(
            "SELECT status FROM subscriptions WHERE user_id = $1 FOR UPDATE",
        )
        .bind(owner.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(statuses.iter().map(|s| SubscriptionStatus::parse(s)).collect())
    }

    async fn reassign_subscriptions(
        &mut self,
        source: AccountId,
        destination: AccountId,
        statuses: &[&'static str],
    ) -> Result<u64, MergeError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET user_id = $1
            WHERE user_id = $2
              AND status = ANY($3)
            "#,
        )
        .bind(destination.as_uuid())
        .bind(source.as_uuid())
        .bind(statuses)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_account_status(
        &mut self,
        id: AccountId,
        status: &AccountStatus,
    ) -> Result<u64, MergeError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET account_status = $1,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(status.as_str())
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_audit_log(&mut self, entry: &AuditLogEntry) -> Result<(), MergeError> {
        AuditLogRepository::create(&mut *self.tx, entry).await?;
        Ok(())
    }

    async fn savepoint(&mut self, name: &'static str) -> Result<(), MergeError> {
        let sql = format!("SAVEPOINT {}", name);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> Result<(), MergeError> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", name);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &'static str) -> Result<(), MergeError> {
        let sql = format!("RELEASE SAVEPOINT {}", name);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), MergeError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), MergeError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
