//! Detection and repair of inconsistent migration tracking state.
//!
//! Classification is computed over plain snapshots (the discovered file set,
//! the tracker rows, the lock row, and the observable schema objects) so the
//! decision logic is testable without a database. The thin execution layer
//! at the bottom applies planned fixes through [`MigrationTracker`].

use crate::error::Result;
use crate::migrate::store::{version_sort_key, Migration, MigrationStore};
use crate::migrate::tracker::{AppliedMigration, LockInfo, MigrationTracker};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// Issue model
// ============================================================================

/// The closed set of detectable issue kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingTracking,
    MissingFile,
    ChecksumMismatch,
    StuckLock,
    OrphanedSchema,
    PartialMigration,
    DuplicateVersion,
    RollbackMissing,
    InvalidMigration,
    CorruptedData,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::MissingTracking => "missing_tracking",
            IssueKind::MissingFile => "missing_file",
            IssueKind::ChecksumMismatch => "checksum_mismatch",
            IssueKind::StuckLock => "stuck_lock",
            IssueKind::OrphanedSchema => "orphaned_schema",
            IssueKind::PartialMigration => "partial_migration",
            IssueKind::DuplicateVersion => "duplicate_version",
            IssueKind::RollbackMissing => "rollback_missing",
            IssueKind::InvalidMigration => "invalid_migration",
            IssueKind::CorruptedData => "corrupted_data",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "missing_tracking" => Some(IssueKind::MissingTracking),
            "missing_file" => Some(IssueKind::MissingFile),
            "checksum_mismatch" => Some(IssueKind::ChecksumMismatch),
            "stuck_lock" => Some(IssueKind::StuckLock),
            "orphaned_schema" => Some(IssueKind::OrphanedSchema),
            "partial_migration" => Some(IssueKind::PartialMigration),
            "duplicate_version" => Some(IssueKind::DuplicateVersion),
            "rollback_missing" => Some(IssueKind::RollbackMissing),
            "invalid_migration" => Some(IssueKind::InvalidMigration),
            "corrupted_data" => Some(IssueKind::CorruptedData),
            _ => None,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One detected inconsistency.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub version: Option<String>,
    pub description: String,
    pub details: BTreeMap<String, String>,
    pub suggested_fix: String,
    pub auto_fixable: bool,
}

/// Snapshot of the observable application schema, used to decide whether an
/// untracked migration was actually applied.
#[derive(Debug, Clone, Default)]
pub struct SchemaObjects {
    /// Schema names (excluding postgres internals).
    pub schemas: Vec<String>,
    /// Tables as `schema.table`.
    pub tables: Vec<String>,
}

impl SchemaObjects {
    fn has_table(&self, name: &str) -> bool {
        // Unqualified names in migrations land in the search_path schema
        let qualified = name.contains('.');
        self.tables.iter().any(|t| {
            if qualified {
                t == name
            } else {
                t.split('.').nth(1).map(|bare| bare == name).unwrap_or(false)
            }
        })
    }

    fn has_schema(&self, name: &str) -> bool {
        self.schemas.iter().any(|s| s == name)
    }
}

// ============================================================================
// SQL object extraction
// ============================================================================

static CREATE_TABLE_REGEX: OnceLock<Regex> = OnceLock::new();
static CREATE_SCHEMA_REGEX: OnceLock<Regex> = OnceLock::new();

fn create_table_regex() -> &'static Regex {
    CREATE_TABLE_REGEX.get_or_init(|| {
        Regex::new(r"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([A-Za-z_][\w]*(?:\.[A-Za-z_][\w]*)?)")
            .expect("static regex pattern is valid")
    })
}

fn create_schema_regex() -> &'static Regex {
    CREATE_SCHEMA_REGEX.get_or_init(|| {
        Regex::new(r"(?i)CREATE\s+SCHEMA\s+(?:IF\s+NOT\s+EXISTS\s+)?([A-Za-z_][\w]*)")
            .expect("static regex pattern is valid")
    })
}

/// Tables a migration's forward SQL would create.
pub fn created_tables(sql: &str) -> Vec<String> {
    create_table_regex()
        .captures_iter(sql)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Schemas a migration's forward SQL would create.
pub fn created_schemas(sql: &str) -> Vec<String> {
    create_schema_regex()
        .captures_iter(sql)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Heuristic: a migration "appears applied" when it creates at least one
/// table or schema and every one of them exists in the database.
pub fn migration_appears_applied(migration: &Migration, objects: &SchemaObjects) -> bool {
    let tables = created_tables(&migration.forward_sql);
    let schemas = created_schemas(&migration.forward_sql);
    if tables.is_empty() && schemas.is_empty() {
        return false;
    }
    tables.iter().all(|t| objects.has_table(t)) && schemas.iter().all(|s| objects.has_schema(s))
}

// ============================================================================
// Classification
// ============================================================================

/// Compute every detectable issue from the given snapshots. Pure.
pub fn classify(
    store: &MigrationStore,
    applied: &[AppliedMigration],
    lock: &LockInfo,
    objects: &SchemaObjects,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Vec<DiagnosticIssue> {
    let mut issues = Vec::new();

    let applied_keys: HashSet<u64> = applied.iter().map(|a| a.sort_key()).collect();
    let file_keys: HashSet<u64> = store.migrations().iter().map(|m| m.sort_key()).collect();
    let max_applied = applied.iter().map(|a| a.sort_key()).max();

    // --- missing_tracking: schema objects exist for an untracked migration
    for migration in store.migrations() {
        if applied_keys.contains(&migration.sort_key()) {
            continue;
        }
        if migration_appears_applied(migration, objects) {
            issues.push(DiagnosticIssue {
                kind: IssueKind::MissingTracking,
                severity: Severity::High,
                version: Some(migration.version.clone()),
                description: format!(
                    "migration {} appears applied but is not tracked",
                    migration.version
                ),
                details: BTreeMap::from([
                    (
                        "file".to_string(),
                        migration.forward_path.display().to_string(),
                    ),
                    (
                        "expected_checksum".to_string(),
                        migration.forward_checksum.clone(),
                    ),
                ]),
                suggested_fix: "insert a tracking row with `poststack recover`".to_string(),
                auto_fixable: true,
            });
        }
    }

    // --- partial_migration: untracked version below the applied high-water mark
    // that does NOT appear applied (those are missing_tracking above)
    for migration in store.migrations() {
        if applied_keys.contains(&migration.sort_key()) {
            continue;
        }
        if migration_appears_applied(migration, objects) {
            continue;
        }
        if let Some(max) = max_applied {
            if migration.sort_key() < max {
                issues.push(DiagnosticIssue {
                    kind: IssueKind::PartialMigration,
                    severity: Severity::High,
                    version: Some(migration.version.clone()),
                    description: format!(
                        "migration {} is pending below the latest applied version",
                        migration.version
                    ),
                    details: BTreeMap::from([(
                        "latest_applied".to_string(),
                        applied
                            .iter()
                            .max_by_key(|a| a.sort_key())
                            .map(|a| a.version.clone())
                            .unwrap_or_default(),
                    )]),
                    suggested_fix:
                        "clear any residue with `poststack repair --force`, then review the skipped migration"
                            .to_string(),
                    auto_fixable: true,
                });
            }
        }
    }

    // --- missing_file: tracked version with no file on disk
    for row in applied {
        if !file_keys.contains(&row.sort_key()) {
            issues.push(DiagnosticIssue {
                kind: IssueKind::MissingFile,
                severity: Severity::High,
                version: Some(row.version.clone()),
                description: format!("migration {} is tracked but its file is missing", row.version),
                details: BTreeMap::from([(
                    "recorded_checksum".to_string(),
                    row.forward_checksum.clone(),
                )]),
                suggested_fix: "restore the migration file or review tracker state manually"
                    .to_string(),
                auto_fixable: false,
            });
        }
    }

    // --- checksum_mismatch: recorded vs. current file checksum differ
    for migration in store.migrations() {
        let Some(row) = applied.iter().find(|a| a.sort_key() == migration.sort_key()) else {
            continue;
        };
        if row.forward_checksum != migration.forward_checksum {
            issues.push(DiagnosticIssue {
                kind: IssueKind::ChecksumMismatch,
                severity: Severity::Medium,
                version: Some(migration.version.clone()),
                description: format!("migration {} was edited after being applied", migration.version),
                details: BTreeMap::from([
                    ("recorded".to_string(), row.forward_checksum.clone()),
                    ("current".to_string(), migration.forward_checksum.clone()),
                ]),
                suggested_fix: "accept the edit with `poststack repair`, or restore the original file"
                    .to_string(),
                auto_fixable: true,
            });
        }
    }

    // --- stuck_lock
    if lock.is_stale(stale_after, now) {
        issues.push(DiagnosticIssue {
            kind: IssueKind::StuckLock,
            severity: Severity::High,
            version: None,
            description: format!(
                "migration lock held by '{}' since {}",
                lock.locked_by.as_deref().unwrap_or("unknown"),
                lock.locked_since()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            details: BTreeMap::from([(
                "locked_by".to_string(),
                lock.locked_by.clone().unwrap_or_default(),
            )]),
            suggested_fix: "clear it with `poststack clear-locks`".to_string(),
            auto_fixable: true,
        });
    }

    // --- orphaned_schema: schema in the database no migration creates
    let migration_schemas: HashSet<String> = store
        .migrations()
        .iter()
        .flat_map(|m| created_schemas(&m.forward_sql))
        .collect();
    for schema in &objects.schemas {
        if schema == "public" || schema.starts_with("pg_") {
            continue;
        }
        if !migration_schemas.contains(schema) {
            issues.push(DiagnosticIssue {
                kind: IssueKind::OrphanedSchema,
                severity: Severity::Low,
                version: None,
                description: format!("schema '{}' has no corresponding migration", schema),
                details: BTreeMap::from([("schema".to_string(), schema.clone())]),
                suggested_fix: "write a migration for it or drop it manually".to_string(),
                auto_fixable: false,
            });
        }
    }

    // --- rollback_missing: no snapshot and no file to roll back with
    for row in applied {
        let file_rollback = store
            .get(&row.version)
            .map(|m| m.rollback_sql.is_some())
            .unwrap_or(false);
        if row.rollback_sql.is_none() && !file_rollback {
            issues.push(DiagnosticIssue {
                kind: IssueKind::RollbackMissing,
                severity: Severity::Low,
                version: Some(row.version.clone()),
                description: format!("migration {} cannot be rolled back", row.version),
                details: BTreeMap::new(),
                suggested_fix: "write a rollback file before relying on `poststack rollback`"
                    .to_string(),
                auto_fixable: false,
            });
        }
    }

    // --- invalid_migration / corrupted_data: tracker rows violating invariants
    for row in applied {
        if row.version.is_empty() || row.forward_checksum.is_empty() {
            issues.push(DiagnosticIssue {
                kind: IssueKind::CorruptedData,
                severity: Severity::Critical,
                version: Some(row.version.clone()),
                description: "tracker row is missing required fields".to_string(),
                details: BTreeMap::from([
                    ("version".to_string(), row.version.clone()),
                    ("checksum".to_string(), row.forward_checksum.clone()),
                ]),
                suggested_fix: "inspect public.applied_migrations manually".to_string(),
                auto_fixable: false,
            });
            continue;
        }
        if row.version.parse::<u64>().is_err() {
            issues.push(DiagnosticIssue {
                kind: IssueKind::InvalidMigration,
                severity: Severity::Medium,
                version: Some(row.version.clone()),
                description: format!("tracker row has invalid version '{}'", row.version),
                details: BTreeMap::new(),
                suggested_fix: "delete the row with `poststack repair --force`".to_string(),
                auto_fixable: true,
            });
        } else if row.forward_checksum.len() != 64
            || !row.forward_checksum.chars().all(|c| c.is_ascii_hexdigit())
        {
            issues.push(DiagnosticIssue {
                kind: IssueKind::CorruptedData,
                severity: Severity::Critical,
                version: Some(row.version.clone()),
                description: format!(
                    "tracker row for {} has an unparseable checksum",
                    row.version
                ),
                details: BTreeMap::from([(
                    "checksum".to_string(),
                    row.forward_checksum.clone(),
                )]),
                suggested_fix: "inspect public.applied_migrations manually".to_string(),
                auto_fixable: false,
            });
        }
    }

    // Highest severity first, then by version for stable output
    issues.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.version.cmp(&b.version))
    });
    issues
}

/// Scan a migrations directory for filenames resolving to the same version.
///
/// Unlike [`MigrationStore::discover`], this never fails — it is the path
/// `diagnose` takes when discovery itself refuses the set.
pub fn scan_duplicate_versions(directory: &Path) -> Vec<DiagnosticIssue> {
    static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = NAME_REGEX.get_or_init(|| {
        Regex::new(r"^(\d+)_[A-Za-z0-9_-]+\.sql$").expect("static regex pattern is valid")
    });

    let Ok(entries) = std::fs::read_dir(directory) else {
        return Vec::new();
    };

    let mut by_version: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".rollback.sql") {
            continue;
        }
        if let Some(caps) = regex.captures(&name) {
            by_version
                .entry(version_sort_key(&caps[1]))
                .or_default()
                .push(name);
        }
    }

    by_version
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(_, mut files)| {
            files.sort();
            let version = files[0]
                .split('_')
                .next()
                .unwrap_or_default()
                .to_string();
            DiagnosticIssue {
                kind: IssueKind::DuplicateVersion,
                severity: Severity::Critical,
                version: Some(version.clone()),
                description: format!("files {} resolve to the same version", files.join(", ")),
                details: BTreeMap::from([("files".to_string(), files.join(", "))]),
                suggested_fix: "renumber one of the files".to_string(),
                auto_fixable: false,
            }
        })
        .collect()
}

// ============================================================================
// Repair planning
// ============================================================================

/// A concrete mutation the repair executor knows how to perform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixAction {
    InsertTracking {
        version: String,
        description: String,
        checksum: String,
    },
    UpdateChecksum {
        version: String,
        checksum: String,
    },
    ClearLock,
    DeleteRow {
        version: String,
    },
}

impl std::fmt::Display for FixAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixAction::InsertTracking { version, .. } => {
                write!(f, "insert tracking row for migration {}", version)
            }
            FixAction::UpdateChecksum { version, .. } => {
                write!(f, "update recorded checksum for migration {}", version)
            }
            FixAction::ClearLock => write!(f, "clear the migration lock"),
            FixAction::DeleteRow { version } => {
                write!(f, "delete tracker row for migration {}", version)
            }
        }
    }
}

/// Outcome of `repair`/`recover`; in dry-run mode `actions` is the full plan
/// and nothing was mutated.
#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub actions: Vec<FixAction>,
    pub fixed: Vec<DiagnosticIssue>,
    pub remaining: Vec<DiagnosticIssue>,
    pub dry_run: bool,
}

/// Decide which issues can be fixed and what each fix is. Pure.
///
/// `force` unlocks the destructive subset (deleting tracker rows). Issues
/// that are not auto-fixable, or whose fix requires force, land in
/// `remaining`.
pub fn plan_repairs(
    issues: &[DiagnosticIssue],
    force: bool,
) -> (Vec<(DiagnosticIssue, FixAction)>, Vec<DiagnosticIssue>) {
    let mut planned = Vec::new();
    let mut remaining = Vec::new();

    for issue in issues {
        let fix = match issue.kind {
            IssueKind::MissingTracking => issue.version.clone().map(|version| {
                FixAction::InsertTracking {
                    description: format!("recovered {}", version),
                    checksum: issue
                        .details
                        .get("expected_checksum")
                        .cloned()
                        .unwrap_or_default(),
                    version,
                }
            }),
            IssueKind::ChecksumMismatch => {
                issue.version.clone().zip(issue.details.get("current")).map(
                    |(version, current)| FixAction::UpdateChecksum {
                        version,
                        checksum: current.clone(),
                    },
                )
            }
            IssueKind::StuckLock => Some(FixAction::ClearLock),
            IssueKind::InvalidMigration if force => issue
                .version
                .clone()
                .map(|version| FixAction::DeleteRow { version }),
            IssueKind::PartialMigration if force => issue
                .version
                .clone()
                .map(|version| FixAction::DeleteRow { version }),
            _ => None,
        };

        match fix {
            Some(action) => planned.push((issue.clone(), action)),
            None => remaining.push(issue.clone()),
        }
    }

    (planned, remaining)
}

// ============================================================================
// Execution
// ============================================================================

/// Diagnostic and repair operations over one environment's database.
pub struct Diagnostics {
    store: MigrationStore,
    tracker: MigrationTracker,
}

impl Diagnostics {
    pub fn new(store: MigrationStore, tracker: MigrationTracker) -> Self {
        Self { store, tracker }
    }

    async fn snapshots(&self) -> Result<(Vec<AppliedMigration>, LockInfo, SchemaObjects)> {
        self.tracker.bootstrap().await?;
        let applied = self.tracker.applied().await?;
        let lock = self.tracker.lock_info().await?;
        let objects = SchemaObjects {
            schemas: self.tracker.list_schemas().await?,
            tables: self.tracker.list_tables().await?,
        };
        Ok((applied, lock, objects))
    }

    /// Cross-check files, tracker, and schema; return every detected issue.
    pub async fn diagnose(&self) -> Result<Vec<DiagnosticIssue>> {
        let (applied, lock, objects) = self.snapshots().await?;
        let mut issues = classify(
            &self.store,
            &applied,
            &lock,
            &objects,
            self.tracker.stale_after(),
            Utc::now(),
        );
        issues.extend(scan_duplicate_versions(self.store.directory()));
        Ok(issues)
    }

    /// Apply the auto-fixable subset of `issues`.
    ///
    /// With `dry_run` the plan is returned without mutating anything. With
    /// `force` the destructive fixes (row deletion) are included.
    pub async fn repair(
        &self,
        issues: &[DiagnosticIssue],
        force: bool,
        dry_run: bool,
    ) -> Result<RepairOutcome> {
        let (planned, remaining) = plan_repairs(issues, force);

        if dry_run {
            return Ok(RepairOutcome {
                actions: planned.iter().map(|(_, action)| action.clone()).collect(),
                fixed: Vec::new(),
                remaining,
                dry_run: true,
            });
        }

        let mut actions = Vec::new();
        let mut fixed = Vec::new();
        for (issue, action) in planned {
            self.execute(&action).await?;
            info!(fix = %action, "repaired");
            actions.push(action);
            fixed.push(issue);
        }

        Ok(RepairOutcome {
            actions,
            fixed,
            remaining,
            dry_run: false,
        })
    }

    /// The common "applied but not tracked" recovery pathway: detect
    /// `missing_tracking` issues and insert their rows.
    pub async fn recover(&self, dry_run: bool) -> Result<RepairOutcome> {
        let issues: Vec<DiagnosticIssue> = self
            .diagnose()
            .await?
            .into_iter()
            .filter(|issue| issue.kind == IssueKind::MissingTracking)
            .collect();
        if issues.is_empty() {
            warn!("recover found no missing tracking rows");
        }
        self.repair(&issues, false, dry_run).await
    }

    async fn execute(&self, action: &FixAction) -> Result<()> {
        match action {
            FixAction::InsertTracking {
                version,
                description,
                checksum: expected,
            } => {
                // Use file contents as the snapshot so rollback keeps working
                let (forward, rollback, sum) = match self.store.get(version) {
                    Some(migration) => (
                        Some(migration.forward_sql.as_str()),
                        migration.rollback_sql.as_deref(),
                        migration.forward_checksum.clone(),
                    ),
                    None => (None, None, expected.clone()),
                };
                self.tracker
                    .insert_applied(version, description, &sum, forward, rollback)
                    .await
            }
            FixAction::UpdateChecksum { version, checksum } => {
                self.tracker.update_checksum(version, checksum).await
            }
            FixAction::ClearLock => self.tracker.release_lock().await,
            FixAction::DeleteRow { version } => self.tracker.delete_applied(version).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::store::checksum;
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

    fn applied_row(version: &str, checksum_of: &str) -> AppliedMigration {
        AppliedMigration {
            version: version.to_string(),
            description: None,
            applied_at: Utc::now().naive_utc(),
            execution_ms: Some(1),
            forward_checksum: checksum(checksum_of),
            forward_sql: Some(checksum_of.to_string()),
            rollback_sql: Some("DROP TABLE t;".to_string()),
            applied_by: Some("test".to_string()),
        }
    }

    fn free_lock() -> LockInfo {
        LockInfo {
            locked: false,
            locked_at: None,
            locked_by: None,
        }
    }

    fn run_classify(
        store: &MigrationStore,
        applied: &[AppliedMigration],
        lock: &LockInfo,
        objects: &SchemaObjects,
    ) -> Vec<DiagnosticIssue> {
        classify(
            store,
            applied,
            lock,
            objects,
            Duration::from_secs(300),
            Utc::now(),
        )
    }

    #[test]
    fn clean_state_has_no_issues() {
        let (_dir, store) = store_with(&[
            ("001_schema.sql", "CREATE TABLE users (id INT);"),
            ("001_schema.rollback.sql", "DROP TABLE users;"),
        ]);
        let applied = vec![applied_row("001", "CREATE TABLE users (id INT);")];
        let objects = SchemaObjects {
            schemas: vec!["public".to_string()],
            tables: vec!["public.users".to_string()],
        };
        let issues = run_classify(&store, &applied, &free_lock(), &objects);
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn detects_missing_tracking_for_applied_but_untracked() {
        // S2 shape: objects for 002..004 exist, tracking only has 001
        let (_dir, store) = store_with(&[
            ("001_users.sql", "CREATE TABLE users (id INT);"),
            ("002_orders.sql", "CREATE TABLE orders (id INT);"),
            ("003_items.sql", "CREATE TABLE items (id INT);"),
            ("004_audit.sql", "CREATE TABLE audit (id INT);"),
        ]);
        let applied = vec![applied_row("001", "CREATE TABLE users (id INT);")];
        let objects = SchemaObjects {
            schemas: vec!["public".to_string()],
            tables: vec![
                "public.users".to_string(),
                "public.orders".to_string(),
                "public.items".to_string(),
                "public.audit".to_string(),
            ],
        };

        let issues = run_classify(&store, &applied, &free_lock(), &objects);
        let missing: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::MissingTracking)
            .collect();
        assert_eq!(missing.len(), 3);
        assert!(missing.iter().all(|i| i.auto_fixable));
        let versions: Vec<_> = missing.iter().filter_map(|i| i.version.clone()).collect();
        assert_eq!(versions, vec!["002", "003", "004"]);
    }

    #[test]
    fn untracked_migration_with_absent_objects_is_not_missing_tracking() {
        let (_dir, store) = store_with(&[("001_users.sql", "CREATE TABLE users (id INT);")]);
        let objects = SchemaObjects::default();
        let issues = run_classify(&store, &[], &free_lock(), &objects);
        assert!(issues
            .iter()
            .all(|i| i.kind != IssueKind::MissingTracking));
    }

    #[test]
    fn detects_checksum_mismatch() {
        let (_dir, store) = store_with(&[("002_orders.sql", "CREATE TABLE orders (id BIGINT);")]);
        // Recorded checksum is for the pre-edit contents
        let applied = vec![applied_row("002", "CREATE TABLE orders (id INT);")];
        let objects = SchemaObjects {
            schemas: vec!["public".to_string()],
            tables: vec!["public.orders".to_string()],
        };

        let issues = run_classify(&store, &applied, &free_lock(), &objects);
        let mismatch: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::ChecksumMismatch)
            .collect();
        assert_eq!(mismatch.len(), 1);
        assert_eq!(mismatch[0].severity, Severity::Medium);
        assert!(mismatch[0].auto_fixable);
        assert_eq!(
            mismatch[0].details["current"],
            checksum("CREATE TABLE orders (id BIGINT);")
        );
    }

    #[test]
    fn detects_missing_file() {
        let (_dir, store) = store_with(&[]);
        let applied = vec![applied_row("001", "CREATE TABLE t (a INT);")];
        let issues = run_classify(&store, &applied, &free_lock(), &SchemaObjects::default());
        let missing: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::MissingFile)
            .collect();
        assert_eq!(missing.len(), 1);
        assert!(!missing[0].auto_fixable);
    }

    #[test]
    fn detects_stuck_lock() {
        let (_dir, store) = store_with(&[]);
        let lock = LockInfo {
            locked: true,
            locked_at: Some((Utc::now() - chrono::Duration::minutes(10)).naive_utc()),
            locked_by: Some("crashed-run".to_string()),
        };
        let issues = run_classify(&store, &[], &lock, &SchemaObjects::default());
        let stuck: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::StuckLock)
            .collect();
        assert_eq!(stuck.len(), 1);
        assert!(stuck[0].auto_fixable);
        assert!(stuck[0].description.contains("crashed-run"));
    }

    #[test]
    fn fresh_lock_is_not_stuck() {
        let (_dir, store) = store_with(&[]);
        let lock = LockInfo {
            locked: true,
            locked_at: Some(Utc::now().naive_utc()),
            locked_by: Some("live-run".to_string()),
        };
        let issues = run_classify(&store, &[], &lock, &SchemaObjects::default());
        assert!(issues.iter().all(|i| i.kind != IssueKind::StuckLock));
    }

    #[test]
    fn detects_orphaned_schema() {
        let (_dir, store) = store_with(&[("001_app.sql", "CREATE SCHEMA app;")]);
        let objects = SchemaObjects {
            schemas: vec![
                "public".to_string(),
                "app".to_string(),
                "legacy".to_string(),
            ],
            tables: vec![],
        };
        let issues = run_classify(&store, &[], &free_lock(), &objects);
        let orphaned: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::OrphanedSchema)
            .collect();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].details["schema"], "legacy");
        assert_eq!(orphaned[0].severity, Severity::Low);
    }

    #[test]
    fn detects_rollback_missing() {
        let (_dir, store) = store_with(&[("001_seed.sql", "INSERT INTO t VALUES (1);")]);
        let mut row = applied_row("001", "INSERT INTO t VALUES (1);");
        row.rollback_sql = None;
        let issues = run_classify(&store, &[row], &free_lock(), &SchemaObjects::default());
        let rollback: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::RollbackMissing)
            .collect();
        assert_eq!(rollback.len(), 1);
        assert!(!rollback[0].auto_fixable);
    }

    #[test]
    fn rollback_file_on_disk_satisfies_rollback_check() {
        let (_dir, store) = store_with(&[
            ("001_t.sql", "CREATE TABLE t (a INT);"),
            ("001_t.rollback.sql", "DROP TABLE t;"),
        ]);
        let mut row = applied_row("001", "CREATE TABLE t (a INT);");
        row.rollback_sql = None;
        let objects = SchemaObjects {
            schemas: vec!["public".into()],
            tables: vec!["public.t".into()],
        };
        let issues = run_classify(&store, &[row], &free_lock(), &objects);
        assert!(issues.iter().all(|i| i.kind != IssueKind::RollbackMissing));
    }

    #[test]
    fn detects_invalid_and_corrupted_rows() {
        let (_dir, store) = store_with(&[]);
        let mut bad_version = applied_row("abc", "x");
        bad_version.forward_checksum = checksum("x");
        let mut bad_checksum = applied_row("001", "x");
        bad_checksum.forward_checksum = "notahash".to_string();

        let issues = run_classify(
            &store,
            &[bad_version, bad_checksum],
            &free_lock(),
            &SchemaObjects::default(),
        );
        assert!(issues.iter().any(|i| i.kind == IssueKind::InvalidMigration));
        assert!(issues.iter().any(|i| i.kind == IssueKind::CorruptedData));
    }

    #[test]
    fn partial_migration_flagged_for_gap_below_high_water_mark() {
        let (_dir, store) = store_with(&[
            ("001_a.sql", "CREATE TABLE a (x INT);"),
            ("002_b.sql", "CREATE TABLE b (x INT);"),
            ("003_c.sql", "CREATE TABLE c (x INT);"),
        ]);
        let applied = vec![
            applied_row("001", "CREATE TABLE a (x INT);"),
            applied_row("003", "CREATE TABLE c (x INT);"),
        ];
        // b's table does not exist, so it is a true gap, not missing tracking
        let objects = SchemaObjects {
            schemas: vec!["public".to_string()],
            tables: vec!["public.a".to_string(), "public.c".to_string()],
        };
        let issues = run_classify(&store, &applied, &free_lock(), &objects);
        let partial: Vec<_> = issues
            .iter()
            .filter(|i| i.kind == IssueKind::PartialMigration)
            .collect();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].version.as_deref(), Some("002"));
    }

    #[test]
    fn issues_sorted_by_severity() {
        let (_dir, store) = store_with(&[("001_seed.sql", "INSERT INTO t VALUES (1);")]);
        let mut no_rollback = applied_row("001", "INSERT INTO t VALUES (1);");
        no_rollback.rollback_sql = None;
        let lock = LockInfo {
            locked: true,
            locked_at: Some((Utc::now() - chrono::Duration::minutes(20)).naive_utc()),
            locked_by: Some("x".to_string()),
        };
        let issues = run_classify(&store, &[no_rollback], &lock, &SchemaObjects::default());
        assert!(issues.len() >= 2);
        assert_eq!(issues[0].kind, IssueKind::StuckLock);
        assert_eq!(issues.last().unwrap().severity, Severity::Low);
    }

    #[test]
    fn scan_finds_duplicate_versions_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("001_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("001_b.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("002_c.sql"), "SELECT 3;").unwrap();

        let issues = scan_duplicate_versions(dir.path());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::DuplicateVersion);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert!(!issues[0].auto_fixable);
        assert!(issues[0].details["files"].contains("001_a.sql"));
        assert!(issues[0].details["files"].contains("001_b.sql"));
    }

    #[test]
    fn created_object_extraction() {
        let sql = "CREATE SCHEMA app;\n\
                   CREATE TABLE app.users (id INT);\n\
                   create table if not exists audit_log (id INT);";
        assert_eq!(created_schemas(sql), vec!["app"]);
        assert_eq!(created_tables(sql), vec!["app.users", "audit_log"]);
    }

    // ------------------------------------------------------------------
    // Repair planning
    // ------------------------------------------------------------------

    fn issue(kind: IssueKind, version: &str, details: &[(&str, &str)]) -> DiagnosticIssue {
        DiagnosticIssue {
            kind,
            severity: Severity::High,
            version: Some(version.to_string()),
            description: String::new(),
            details: details
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            suggested_fix: String::new(),
            auto_fixable: true,
        }
    }

    #[test]
    fn plans_insert_for_missing_tracking() {
        let issues = vec![issue(
            IssueKind::MissingTracking,
            "002",
            &[("expected_checksum", "deadbeef")],
        )];
        let (planned, remaining) = plan_repairs(&issues, false);
        assert_eq!(planned.len(), 1);
        assert!(remaining.is_empty());
        assert!(matches!(
            &planned[0].1,
            FixAction::InsertTracking { version, checksum, .. }
                if version == "002" && checksum == "deadbeef"
        ));
    }

    #[test]
    fn checksum_update_does_not_require_force() {
        let issues = vec![issue(
            IssueKind::ChecksumMismatch,
            "002",
            &[("recorded", "aaaa"), ("current", "bbbb")],
        )];
        let (planned, remaining) = plan_repairs(&issues, false);
        assert_eq!(planned.len(), 1);
        assert!(remaining.is_empty());
        assert!(matches!(
            &planned[0].1,
            FixAction::UpdateChecksum { checksum, .. } if checksum == "bbbb"
        ));
    }

    #[test]
    fn row_deletion_requires_force() {
        let issues = vec![issue(IssueKind::InvalidMigration, "abc", &[])];
        let (planned, remaining) = plan_repairs(&issues, false);
        assert!(planned.is_empty());
        assert_eq!(remaining.len(), 1);

        let (planned, remaining) = plan_repairs(&issues, true);
        assert_eq!(planned.len(), 1);
        assert!(remaining.is_empty());
        assert!(matches!(&planned[0].1, FixAction::DeleteRow { version } if version == "abc"));
    }

    #[test]
    fn unfixable_kinds_always_remain() {
        let issues = vec![
            issue(IssueKind::MissingFile, "001", &[]),
            issue(IssueKind::OrphanedSchema, "", &[]),
            issue(IssueKind::DuplicateVersion, "001", &[]),
            issue(IssueKind::CorruptedData, "001", &[]),
        ];
        let (planned, remaining) = plan_repairs(&issues, true);
        assert!(planned.is_empty());
        assert_eq!(remaining.len(), 4);
    }

    #[test]
    fn stuck_lock_plans_clear() {
        let issues = vec![issue(IssueKind::StuckLock, "", &[])];
        let (planned, _) = plan_repairs(&issues, false);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].1, FixAction::ClearLock);
    }

    #[test]
    fn issue_kind_round_trips_through_names() {
        for kind in [
            IssueKind::MissingTracking,
            IssueKind::MissingFile,
            IssueKind::ChecksumMismatch,
            IssueKind::StuckLock,
            IssueKind::OrphanedSchema,
            IssueKind::PartialMigration,
            IssueKind::DuplicateVersion,
            IssueKind::RollbackMissing,
            IssueKind::InvalidMigration,
            IssueKind::CorruptedData,
        ] {
            assert_eq!(IssueKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(IssueKind::parse("nonsense"), None);
    }
}
