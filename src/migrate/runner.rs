//! Transactional forward/rollback execution.
//!
//! Every migration runs inside its own transaction together with its tracker
//! row, so observers only ever see a monotonic prefix of applied versions.
//! The exclusive lock is taken before the first migration and released on
//! every exit path, success or failure.

use crate::error::{Error, Result};
use crate::migrate::diagnostics::{DiagnosticIssue, IssueKind, Severity};
use crate::migrate::store::{version_sort_key, Migration, MigrationStore};
use crate::migrate::tracker::{operator_identity, AppliedMigration, MigrationTracker};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Aggregate view returned by `status()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationStatus {
    /// Highest applied version, if any.
    pub current_version: Option<String>,
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<String>,
    pub is_locked: bool,
    pub lock_holder: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MigrateOutcome {
    pub applied_versions: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RollbackOutcome {
    pub rolled_back: Vec<String>,
}

// ============================================================================
// Pure decision logic
// ============================================================================

/// Pending migrations in ascending order: discovered but not applied, and
/// within the optional target ceiling.
pub fn select_pending<'a>(
    migrations: &'a [Migration],
    applied_keys: &HashSet<u64>,
    target: Option<&str>,
) -> Vec<&'a Migration> {
    let ceiling = target.map(version_sort_key);
    migrations
        .iter()
        .filter(|m| !applied_keys.contains(&m.sort_key()))
        .filter(|m| ceiling.map(|c| m.sort_key() <= c).unwrap_or(true))
        .collect()
}

/// A pending version below the applied high-water mark means a prior run was
/// interrupted or a file was back-filled; the runner refuses to skip
/// backwards.
pub fn first_out_of_order<'a>(
    pending: &[&'a Migration],
    max_applied: Option<u64>,
) -> Option<&'a Migration> {
    let max = max_applied?;
    pending.iter().find(|m| m.sort_key() < max).copied()
}

/// Read-only drift detection: recorded vs. current checksums, plus applied
/// rows whose file is gone. Pure.
pub fn detect_drift(store: &MigrationStore, applied: &[AppliedMigration]) -> Vec<DiagnosticIssue> {
    let mut issues = Vec::new();
    for row in applied {
        match store.get(&row.version) {
            Some(migration) => {
                if migration.forward_checksum != row.forward_checksum {
                    issues.push(DiagnosticIssue {
                        kind: IssueKind::ChecksumMismatch,
                        severity: Severity::Medium,
                        version: Some(row.version.clone()),
                        description: format!(
                            "migration {} was edited after being applied",
                            row.version
                        ),
                        details: BTreeMap::from([
                            ("recorded".to_string(), row.forward_checksum.clone()),
                            ("current".to_string(), migration.forward_checksum.clone()),
                        ]),
                        suggested_fix: "accept the edit with `poststack repair`".to_string(),
                        auto_fixable: true,
                    });
                }
            }
            None => {
                issues.push(DiagnosticIssue {
                    kind: IssueKind::MissingFile,
                    severity: Severity::High,
                    version: Some(row.version.clone()),
                    description: format!(
                        "migration {} is tracked but its file is missing",
                        row.version
                    ),
                    details: BTreeMap::from([(
                        "recorded_checksum".to_string(),
                        row.forward_checksum.clone(),
                    )]),
                    suggested_fix: "restore the file; rollback still works from the stored snapshot"
                        .to_string(),
                    auto_fixable: false,
                });
            }
        }
    }
    issues
}

// ============================================================================
// Runner
// ============================================================================

pub struct MigrationRunner {
    store: MigrationStore,
    tracker: MigrationTracker,
}

impl MigrationRunner {
    pub fn new(store: MigrationStore, tracker: MigrationTracker) -> Self {
        Self { store, tracker }
    }

    pub fn store(&self) -> &MigrationStore {
        &self.store
    }

    pub fn tracker(&self) -> &MigrationTracker {
        &self.tracker
    }

    pub async fn status(&self) -> Result<MigrationStatus> {
        self.tracker.bootstrap().await?;
        let applied = self.tracker.applied().await?;
        let lock = self.tracker.lock_info().await?;

        let applied_keys: HashSet<u64> = applied.iter().map(|a| a.sort_key()).collect();
        let pending = select_pending(self.store.migrations(), &applied_keys, None)
            .into_iter()
            .map(|m| m.version.clone())
            .collect();

        Ok(MigrationStatus {
            current_version: applied
                .iter()
                .max_by_key(|a| a.sort_key())
                .map(|a| a.version.clone()),
            applied,
            pending,
            is_locked: lock.locked,
            lock_holder: lock.locked_by,
        })
    }

    /// Apply all pending migrations with version ≤ `target` (or all of them)
    /// in ascending order, one transaction each.
    pub async fn migrate(
        &self,
        target: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MigrateOutcome> {
        self.tracker.bootstrap().await?;
        let applied = self.tracker.applied().await?;
        let applied_keys: HashSet<u64> = applied.iter().map(|a| a.sort_key()).collect();
        let pending = select_pending(self.store.migrations(), &applied_keys, target);

        if pending.is_empty() {
            info!("no pending migrations");
            return Ok(MigrateOutcome::default());
        }

        let max_applied = applied.iter().map(|a| a.sort_key()).max();
        if let Some(out_of_order) = first_out_of_order(&pending, max_applied) {
            return Err(Error::PartialMigration {
                version: out_of_order.version.clone(),
            });
        }

        self.tracker.acquire_lock(&operator_identity()).await?;
        let result = self.apply_all(&pending, cancel).await;
        // Release even when a migration failed; its transaction already
        // rolled back and the tracker row was never written.
        let release = self.tracker.release_lock().await;
        let applied_versions = result?;
        release?;

        Ok(MigrateOutcome { applied_versions })
    }

    async fn apply_all(
        &self,
        pending: &[&Migration],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let operator = operator_identity();
        let mut applied_versions = Vec::with_capacity(pending.len());

        for migration in pending {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            info!(
                version = %migration.version,
                description = %migration.description,
                "applying migration"
            );
            let started = Instant::now();
            let mut tx = self.tracker.pool().begin().await?;

            let exec_result = {
                let fut = sqlx::raw_sql(&migration.forward_sql).execute(&mut *tx);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = fut => Some(result),
                }
            };

            match exec_result {
                None => {
                    tx.rollback().await.ok();
                    return Err(Error::Cancelled);
                }
                Some(Err(cause)) => {
                    tx.rollback().await.ok();
                    return Err(Error::MigrationFailed {
                        version: migration.version.clone(),
                        cause: cause.to_string(),
                    });
                }
                Some(Ok(_)) => {}
            }

            let execution_ms = started.elapsed().as_millis() as i32;
            let insert_result = sqlx::query(
                "INSERT INTO public.applied_migrations
                     (version, description, execution_ms, forward_checksum,
                      forward_sql, rollback_sql, applied_by)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&migration.version)
            .bind(&migration.description)
            .bind(execution_ms)
            .bind(&migration.forward_checksum)
            .bind(&migration.forward_sql)
            .bind(&migration.rollback_sql)
            .bind(&operator)
            .execute(&mut *tx)
            .await;

            if let Err(cause) = insert_result {
                tx.rollback().await.ok();
                return Err(Error::MigrationFailed {
                    version: migration.version.clone(),
                    cause: cause.to_string(),
                });
            }

            tx.commit().await?;
            info!(
                version = %migration.version,
                execution_ms,
                "migration applied"
            );
            applied_versions.push(migration.version.clone());
        }

        Ok(applied_versions)
    }

    /// Roll back every applied migration with version > `target`, in
    /// descending order, one transaction each.
    ///
    /// Uses the rollback snapshot stored at apply time, falling back to the
    /// on-disk rollback file only when no snapshot was recorded.
    pub async fn rollback(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<RollbackOutcome> {
        self.tracker.bootstrap().await?;
        let applied = self.tracker.applied().await?;
        let target_key = version_sort_key(target);

        let mut to_roll: Vec<AppliedMigration> = applied
            .into_iter()
            .filter(|row| row.sort_key() > target_key)
            .collect();
        to_roll.sort_by_key(|row| std::cmp::Reverse(row.sort_key()));

        if to_roll.is_empty() {
            info!(target, "already at or below target version");
            return Ok(RollbackOutcome::default());
        }

        self.tracker.acquire_lock(&operator_identity()).await?;
        let result = self.rollback_all(&to_roll, cancel).await;
        let release = self.tracker.release_lock().await;
        let rolled_back = result?;
        release?;

        Ok(RollbackOutcome { rolled_back })
    }

    async fn rollback_all(
        &self,
        rows: &[AppliedMigration],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut rolled_back = Vec::with_capacity(rows.len());

        for row in rows {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let sql = match &row.rollback_sql {
                Some(snapshot) => snapshot.clone(),
                None => match self.store.get(&row.version).and_then(|m| m.rollback_sql.clone()) {
                    Some(from_file) => from_file,
                    None => {
                        return Err(Error::MigrationFailed {
                            version: row.version.clone(),
                            cause: "no rollback SQL recorded or on disk".to_string(),
                        });
                    }
                },
            };

            info!(version = %row.version, "rolling back migration");
            let mut tx = self.tracker.pool().begin().await?;

            let exec_result = {
                let fut = sqlx::raw_sql(&sql).execute(&mut *tx);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = fut => Some(result),
                }
            };

            match exec_result {
                None => {
                    tx.rollback().await.ok();
                    return Err(Error::Cancelled);
                }
                Some(Err(cause)) => {
                    tx.rollback().await.ok();
                    return Err(Error::MigrationFailed {
                        version: row.version.clone(),
                        cause: cause.to_string(),
                    });
                }
                Some(Ok(_)) => {}
            }

            let delete_result =
                sqlx::query("DELETE FROM public.applied_migrations WHERE version = $1")
                    .bind(&row.version)
                    .execute(&mut *tx)
                    .await;

            if let Err(cause) = delete_result {
                tx.rollback().await.ok();
                return Err(Error::MigrationFailed {
                    version: row.version.clone(),
                    cause: cause.to_string(),
                });
            }

            tx.commit().await?;
            rolled_back.push(row.version.clone());
        }

        Ok(rolled_back)
    }

    /// Drift report: never mutates state.
    pub async fn verify(&self) -> Result<Vec<DiagnosticIssue>> {
        self.tracker.bootstrap().await?;
        let applied = self.tracker.applied().await?;
        Ok(detect_drift(&self.store, &applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::store::checksum;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn store_with(files: &[(&str, &str)]) -> (TempDir, MigrationStore) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let store = MigrationStore::discover(dir.path()).unwrap();
        (dir, store)
    }

    fn applied_row(version: &str, content: &str) -> AppliedMigration {
        AppliedMigration {
            version: version.to_string(),
            description: None,
            applied_at: Utc::now().naive_utc(),
            execution_ms: Some(3),
            forward_checksum: checksum(content),
            forward_sql: Some(content.to_string()),
            rollback_sql: None,
            applied_by: None,
        }
    }

    fn keys(versions: &[&str]) -> HashSet<u64> {
        versions.iter().map(|v| version_sort_key(v)).collect()
    }

    #[test]
    fn pending_excludes_applied_versions() {
        let (_dir, store) = store_with(&[
            ("001_a.sql", "SELECT 1;"),
            ("002_b.sql", "SELECT 2;"),
            ("003_c.sql", "SELECT 3;"),
        ]);
        let pending = select_pending(store.migrations(), &keys(&["001"]), None);
        let versions: Vec<_> = pending.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["002", "003"]);
    }

    #[test]
    fn pending_respects_target_ceiling() {
        let (_dir, store) = store_with(&[
            ("001_a.sql", "SELECT 1;"),
            ("002_b.sql", "SELECT 2;"),
            ("003_c.sql", "SELECT 3;"),
        ]);
        let pending = select_pending(store.migrations(), &keys(&[]), Some("002"));
        let versions: Vec<_> = pending.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002"]);
    }

    #[test]
    fn target_matches_numerically() {
        let (_dir, store) = store_with(&[("001_a.sql", "SELECT 1;"), ("002_b.sql", "SELECT 2;")]);
        let pending = select_pending(store.migrations(), &keys(&[]), Some("1"));
        let versions: Vec<_> = pending.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001"]);
    }

    #[test]
    fn out_of_order_detected_below_high_water_mark() {
        let (_dir, store) = store_with(&[("002_b.sql", "SELECT 2;"), ("004_d.sql", "SELECT 4;")]);
        let pending = select_pending(store.migrations(), &keys(&["003"]), None);
        let oo = first_out_of_order(&pending, Some(version_sort_key("003"))).unwrap();
        assert_eq!(oo.version, "002");
    }

    #[test]
    fn no_out_of_order_when_nothing_applied() {
        let (_dir, store) = store_with(&[("001_a.sql", "SELECT 1;")]);
        let pending = select_pending(store.migrations(), &keys(&[]), None);
        assert!(first_out_of_order(&pending, None).is_none());
    }

    #[test]
    fn no_out_of_order_for_strictly_ascending_pending() {
        let (_dir, store) = store_with(&[("002_b.sql", "SELECT 2;"), ("003_c.sql", "SELECT 3;")]);
        let pending = select_pending(store.migrations(), &keys(&["001"]), None);
        assert!(first_out_of_order(&pending, Some(version_sort_key("001"))).is_none());
    }

    #[test]
    fn drift_reports_checksum_mismatch() {
        let (_dir, store) = store_with(&[("001_a.sql", "SELECT 1 -- edited;")]);
        let applied = vec![applied_row("001", "SELECT 1;")];
        let issues = detect_drift(&store, &applied);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::ChecksumMismatch);
        assert_eq!(issues[0].version.as_deref(), Some("001"));
    }

    #[test]
    fn drift_reports_missing_file() {
        let (_dir, store) = store_with(&[]);
        let applied = vec![applied_row("001", "SELECT 1;")];
        let issues = detect_drift(&store, &applied);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::MissingFile);
    }

    #[test]
    fn drift_is_clean_when_checksums_match() {
        let (_dir, store) = store_with(&[("001_a.sql", "SELECT 1;")]);
        // Trailing newline must not read as drift
        let applied = vec![applied_row("001", "SELECT 1;\n")];
        assert!(detect_drift(&store, &applied).is_empty());
    }

    #[test]
    fn pending_empty_iff_all_versions_recorded() {
        // Property 3 shape: pending is empty exactly when recorded == files
        let (_dir, store) = store_with(&[("001_a.sql", "SELECT 1;"), ("002_b.sql", "SELECT 2;")]);
        assert!(!select_pending(store.migrations(), &keys(&["001"]), None).is_empty());
        assert!(select_pending(store.migrations(), &keys(&["001", "002"]), None).is_empty());
    }
}
