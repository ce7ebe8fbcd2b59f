//! Diagnostic classification and repair planning over the recovery
//! scenarios: missing tracking, checksum drift, and a stuck lock.

use chrono::Utc;
use poststack::migrate::diagnostics::{classify, plan_repairs, FixAction, SchemaObjects};
use poststack::migrate::runner::detect_drift;
use poststack::migrate::store::checksum;
use poststack::migrate::tracker::{AppliedMigration, LockInfo};
use poststack::{IssueKind, MigrationStore};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const STALE_AFTER: Duration = Duration::from_secs(300);

fn migration_tree(files: &[(&str, &str)]) -> (TempDir, MigrationStore) {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
    let store = MigrationStore::discover(dir.path()).unwrap();
    (dir, store)
}

fn row(version: &str, content: &str) -> AppliedMigration {
    AppliedMigration {
        version: version.to_string(),
        description: Some(format!("migration {}", version)),
        applied_at: Utc::now().naive_utc(),
        execution_ms: Some(10),
        forward_checksum: checksum(content),
        forward_sql: Some(content.to_string()),
        rollback_sql: Some("-- rollback".to_string()),
        applied_by: Some("tester".to_string()),
    }
}

fn unlocked() -> LockInfo {
    LockInfo {
        locked: false,
        locked_at: None,
        locked_by: None,
    }
}

/// Database has objects from migrations 001-004, tracking only has 001:
/// three auto-fixable missing_tracking issues, and repairing them plans
/// three insertions.
#[test]
fn missing_tracking_recovery_scenario() {
    let (_dir, store) = migration_tree(&[
        ("001_users.sql", "CREATE TABLE users (id INT);"),
        ("002_orders.sql", "CREATE TABLE orders (id INT);"),
        ("003_invoices.sql", "CREATE TABLE invoices (id INT);"),
        ("004_audit.sql", "CREATE TABLE audit (id INT);"),
    ]);
    let applied = vec![row("001", "CREATE TABLE users (id INT);")];
    let objects = SchemaObjects {
        schemas: vec!["public".to_string()],
        tables: vec![
            "public.users".to_string(),
            "public.orders".to_string(),
            "public.invoices".to_string(),
            "public.audit".to_string(),
        ],
    };

    let issues = classify(&store, &applied, &unlocked(), &objects, STALE_AFTER, Utc::now());
    let missing: Vec<_> = issues
        .iter()
        .filter(|i| i.kind == IssueKind::MissingTracking)
        .cloned()
        .collect();

    assert_eq!(missing.len(), 3);
    assert!(missing.iter().all(|i| i.auto_fixable));

    // Dry-run repair plans exactly three inserts, no destructive actions
    let (planned, remaining) = plan_repairs(&missing, false);
    assert_eq!(planned.len(), 3);
    assert!(remaining.is_empty());
    let versions: Vec<_> = planned
        .iter()
        .map(|(_, action)| match action {
            FixAction::InsertTracking { version, .. } => version.clone(),
            other => panic!("unexpected action {:?}", other),
        })
        .collect();
    assert_eq!(versions, vec!["002", "003", "004"]);
}

/// Migration 002 was edited after being applied: verify reports exactly one
/// checksum mismatch, and repairing updates the recorded checksum to the
/// current file's.
#[test]
fn checksum_drift_scenario() {
    let edited = "CREATE INDEX orders_idx ON orders(id); -- tuned";
    let (_dir, store) = migration_tree(&[
        ("001_users.sql", "CREATE TABLE users (id INT);"),
        ("002_indexes.sql", edited),
    ]);
    let applied = vec![
        row("001", "CREATE TABLE users (id INT);"),
        row("002", "CREATE INDEX orders_idx ON orders(id);"),
    ];

    let issues = detect_drift(&store, &applied);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, IssueKind::ChecksumMismatch);
    assert_eq!(issues[0].version.as_deref(), Some("002"));

    let (planned, remaining) = plan_repairs(&issues, false);
    assert!(remaining.is_empty());
    match &planned[0].1 {
        FixAction::UpdateChecksum { version, checksum: new } => {
            assert_eq!(version, "002");
            assert_eq!(*new, checksum(edited));
        }
        other => panic!("unexpected action {:?}", other),
    }
}

/// A lock stamped ten minutes ago is stuck: diagnose flags it, repair plans
/// clearing it, and nothing else is touched.
#[test]
fn stuck_lock_scenario() {
    let (_dir, store) = migration_tree(&[("001_users.sql", "CREATE TABLE users (id INT);")]);
    let lock = LockInfo {
        locked: true,
        locked_at: Some((Utc::now() - chrono::Duration::minutes(10)).naive_utc()),
        locked_by: Some("interrupted-run".to_string()),
    };
    let applied = vec![row("001", "CREATE TABLE users (id INT);")];
    let objects = SchemaObjects {
        schemas: vec!["public".to_string()],
        tables: vec!["public.users".to_string()],
    };

    let issues = classify(&store, &applied, &lock, &objects, STALE_AFTER, Utc::now());
    let stuck: Vec<_> = issues
        .iter()
        .filter(|i| i.kind == IssueKind::StuckLock)
        .cloned()
        .collect();
    assert_eq!(stuck.len(), 1);

    let (planned, _) = plan_repairs(&stuck, false);
    assert_eq!(planned.len(), 1);
    assert_eq!(planned[0].1, FixAction::ClearLock);
}

/// A lock within the threshold is live, not stuck — the holder may still be
/// migrating.
#[test]
fn live_lock_is_not_flagged() {
    let (_dir, store) = migration_tree(&[]);
    let lock = LockInfo {
        locked: true,
        locked_at: Some((Utc::now() - chrono::Duration::seconds(30)).naive_utc()),
        locked_by: Some("other-terminal".to_string()),
    };
    let issues = classify(
        &store,
        &[],
        &lock,
        &SchemaObjects::default(),
        STALE_AFTER,
        Utc::now(),
    );
    assert!(issues.iter().all(|i| i.kind != IssueKind::StuckLock));
}

/// Force gates destructive repairs: an invalid tracker row is only planned
/// for deletion with `force`.
#[test]
fn force_gates_destructive_repairs() {
    let (_dir, store) = migration_tree(&[]);
    let mut bad = row("not-a-version", "SELECT 1;");
    bad.forward_checksum = checksum("SELECT 1;");

    let issues = classify(
        &store,
        &[bad],
        &unlocked(),
        &SchemaObjects::default(),
        STALE_AFTER,
        Utc::now(),
    );
    let invalid: Vec<_> = issues
        .iter()
        .filter(|i| i.kind == IssueKind::InvalidMigration)
        .cloned()
        .collect();
    assert_eq!(invalid.len(), 1);

    let (without_force, remaining) = plan_repairs(&invalid, false);
    assert!(without_force.is_empty());
    assert_eq!(remaining.len(), 1);

    let (with_force, _) = plan_repairs(&invalid, true);
    assert_eq!(with_force.len(), 1);
}
