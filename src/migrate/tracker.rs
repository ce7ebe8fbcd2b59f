//! Database-side record of applied migrations and the exclusive lock.
//!
//! The tracker owns two tables in the `public` schema so that dropping the
//! application schema never orphans tracking state:
//!
//! ```sql
//! applied_migrations(version TEXT PRIMARY KEY, description TEXT,
//!     applied_at TIMESTAMP NOT NULL DEFAULT now(), execution_ms INT,
//!     forward_checksum TEXT NOT NULL, forward_sql TEXT, rollback_sql TEXT,
//!     applied_by TEXT)
//! migration_lock(id INT PRIMARY KEY CHECK (id = 1), locked BOOLEAN NOT NULL,
//!     locked_at TIMESTAMP, locked_by TEXT)
//! ```
//!
//! Lock discipline: acquisition is one atomic `UPDATE ... WHERE locked =
//! FALSE` in an auto-committing statement. A held lock always fails the
//! acquisition — staleness is reported through diagnostics (`stuck_lock`),
//! never taken over silently.

use crate::error::{Error, Result};
use crate::migrate::store::version_sort_key;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;

/// Default staleness threshold for the migration lock.
pub const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(300);

/// One row of `applied_migrations`.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct AppliedMigration {
    pub version: String,
    pub description: Option<String>,
    pub applied_at: NaiveDateTime,
    pub execution_ms: Option<i32>,
    pub forward_checksum: String,
    /// Snapshot of the forward SQL at apply time.
    #[serde(skip_serializing)]
    pub forward_sql: Option<String>,
    /// Snapshot of the rollback SQL at apply time. Rollback uses this, not
    /// the current file, so it works even after the file disappears.
    #[serde(skip_serializing)]
    pub rollback_sql: Option<String>,
    pub applied_by: Option<String>,
}

impl AppliedMigration {
    pub fn sort_key(&self) -> u64 {
        version_sort_key(&self.version)
    }
}

/// The singleton `migration_lock` row.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct LockInfo {
    pub locked: bool,
    pub locked_at: Option<NaiveDateTime>,
    pub locked_by: Option<String>,
}

impl LockInfo {
    /// Stored timestamps are naive UTC (postgres `now()` in a UTC container).
    pub fn locked_since(&self) -> Option<DateTime<Utc>> {
        self.locked_at.map(|at| Utc.from_utc_datetime(&at))
    }

    /// A lock held longer than the threshold is considered stuck.
    pub fn is_stale(&self, stale_after: Duration, now: DateTime<Utc>) -> bool {
        if !self.locked {
            return false;
        }
        match self.locked_since() {
            Some(since) => {
                let age = now.signed_duration_since(since);
                age.num_seconds() >= stale_after.as_secs() as i64
            }
            // Locked with no timestamp is corrupt enough to count as stuck
            None => true,
        }
    }
}

/// Operator/process identity recorded in `applied_by` and `locked_by`.
pub fn operator_identity() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Handle on the tracker tables for one database.
#[derive(Debug, Clone)]
pub struct MigrationTracker {
    pool: PgPool,
    stale_after: Duration,
}

impl MigrationTracker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            stale_after: DEFAULT_LOCK_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// Create the tracker tables and seed the lock row. Idempotent.
    pub async fn bootstrap(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS public.applied_migrations (
                version TEXT PRIMARY KEY,
                description TEXT,
                applied_at TIMESTAMP NOT NULL DEFAULT now(),
                execution_ms INT,
                forward_checksum TEXT NOT NULL,
                forward_sql TEXT,
                rollback_sql TEXT,
                applied_by TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS public.migration_lock (
                id INT PRIMARY KEY CHECK (id = 1),
                locked BOOLEAN NOT NULL,
                locked_at TIMESTAMP,
                locked_by TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO public.migration_lock (id, locked) VALUES (1, FALSE)
             ON CONFLICT (id) DO NOTHING",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Applied rows
    // ========================================================================

    /// All applied migrations in ascending version order.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>> {
        let mut rows: Vec<AppliedMigration> = sqlx::query_as(
            "SELECT version, description, applied_at, execution_ms,
                    forward_checksum, forward_sql, rollback_sql, applied_by
             FROM public.applied_migrations",
        )
        .fetch_all(&self.pool)
        .await?;
        // TEXT versions sort numerically, not lexicographically
        rows.sort_by_key(|r| r.sort_key());
        Ok(rows)
    }

    pub async fn get_applied(&self, version: &str) -> Result<Option<AppliedMigration>> {
        let row: Option<AppliedMigration> = sqlx::query_as(
            "SELECT version, description, applied_at, execution_ms,
                    forward_checksum, forward_sql, rollback_sql, applied_by
             FROM public.applied_migrations WHERE version = $1",
        )
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert a tracking row outside any migration transaction (used by
    /// repair/recover, which must not touch the application schema).
    pub async fn insert_applied(
        &self,
        version: &str,
        description: &str,
        checksum: &str,
        forward_sql: Option<&str>,
        rollback_sql: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO public.applied_migrations
                 (version, description, forward_checksum, forward_sql, rollback_sql, applied_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (version) DO NOTHING",
        )
        .bind(version)
        .bind(description)
        .bind(checksum)
        .bind(forward_sql)
        .bind(rollback_sql)
        .bind(operator_identity())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_checksum(&self, version: &str, checksum: &str) -> Result<()> {
        sqlx::query("UPDATE public.applied_migrations SET forward_checksum = $1 WHERE version = $2")
            .bind(checksum)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_applied(&self, version: &str) -> Result<()> {
        sqlx::query("DELETE FROM public.applied_migrations WHERE version = $1")
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Lock
    // ========================================================================

    pub async fn lock_info(&self) -> Result<LockInfo> {
        let row: Option<LockInfo> = sqlx::query_as(
            "SELECT locked, locked_at, locked_by FROM public.migration_lock WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or(LockInfo {
            locked: false,
            locked_at: None,
            locked_by: None,
        }))
    }

    /// Atomically take the lock iff it is free.
    ///
    /// Fails with [`Error::LockHeld`] when another holder has it — including
    /// a stale holder; staleness is an explicit repair decision, not an
    /// implicit takeover.
    pub async fn acquire_lock(&self, holder: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE public.migration_lock
             SET locked = TRUE, locked_at = now(), locked_by = $1
             WHERE id = 1 AND locked = FALSE",
        )
        .bind(holder)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let info = self.lock_info().await?;
        Err(Error::LockHeld {
            since: info.locked_since().unwrap_or_else(Utc::now),
            holder: info.locked_by.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Clear the lock row unconditionally. Safe to call on failure paths.
    pub async fn release_lock(&self) -> Result<()> {
        sqlx::query(
            "UPDATE public.migration_lock
             SET locked = FALSE, locked_at = NULL, locked_by = NULL
             WHERE id = 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Schema introspection (for diagnostics)
    // ========================================================================

    /// User-visible schemas, excluding postgres internals.
    pub async fn list_schemas(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT schema_name FROM information_schema.schemata
             WHERE schema_name NOT IN ('information_schema', 'pg_catalog', 'pg_toast')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("schema_name"))
            .collect())
    }

    /// User tables as `schema.table` pairs, excluding the tracker's own.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT table_schema, table_name FROM information_schema.tables
             WHERE table_schema NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
               AND table_name NOT IN ('applied_migrations', 'migration_lock')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                format!(
                    "{}.{}",
                    row.get::<String, _>("table_schema"),
                    row.get::<String, _>("table_name")
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(locked: bool, age_secs: i64) -> LockInfo {
        LockInfo {
            locked,
            locked_at: Some((Utc::now() - chrono::Duration::seconds(age_secs)).naive_utc()),
            locked_by: Some("worker".to_string()),
        }
    }

    #[test]
    fn unlocked_is_never_stale() {
        let now = Utc::now();
        assert!(!lock(false, 10_000).is_stale(DEFAULT_LOCK_STALE_AFTER, now));
    }

    #[test]
    fn fresh_lock_is_not_stale() {
        let now = Utc::now();
        assert!(!lock(true, 30).is_stale(DEFAULT_LOCK_STALE_AFTER, now));
    }

    #[test]
    fn old_lock_is_stale() {
        let now = Utc::now();
        assert!(lock(true, 600).is_stale(DEFAULT_LOCK_STALE_AFTER, now));
    }

    #[test]
    fn stale_threshold_is_configurable() {
        let now = Utc::now();
        let short = Duration::from_secs(10);
        assert!(lock(true, 30).is_stale(short, now));
        assert!(!lock(true, 5).is_stale(short, now));
    }

    #[test]
    fn locked_without_timestamp_counts_as_stale() {
        let info = LockInfo {
            locked: true,
            locked_at: None,
            locked_by: None,
        };
        assert!(info.is_stale(DEFAULT_LOCK_STALE_AFTER, Utc::now()));
    }

    #[test]
    fn operator_identity_is_nonempty() {
        assert!(!operator_identity().is_empty());
    }
}
