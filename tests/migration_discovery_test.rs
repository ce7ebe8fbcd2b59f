//! Discovery, ordering, and pending-selection over real migration trees.

use poststack::migrate::runner::{first_out_of_order, select_pending};
use poststack::migrate::store::{checksum, version_sort_key};
use poststack::MigrationStore;
use std::collections::HashSet;
use std::fs;
use tempfile::TempDir;

fn migration_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    for (name, content) in files {
        fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

/// The fresh-install layout: three migrations, the last without a rollback.
#[test]
fn fresh_install_set_discovers_in_order() {
    let dir = migration_tree(&[
        ("001_schema.sql", "CREATE TABLE users (id SERIAL PRIMARY KEY);"),
        ("001_schema.rollback.sql", "DROP TABLE users;"),
        ("002_indexes.sql", "CREATE INDEX users_id_idx ON users(id);"),
        ("002_indexes.rollback.sql", "DROP INDEX users_id_idx;"),
        ("003_seed.sql", "INSERT INTO users DEFAULT VALUES;"),
    ]);

    let store = MigrationStore::discover(dir.path()).unwrap();
    assert_eq!(store.versions(), vec!["001", "002", "003"]);

    assert!(store.get("001").unwrap().rollback_sql.is_some());
    assert!(store.get("002").unwrap().rollback_sql.is_some());
    // No rollback for 003 is a warning, not an error
    assert!(store.get("003").unwrap().rollback_sql.is_none());

    // After applying all three, nothing is pending
    let applied: HashSet<u64> = ["001", "002", "003"]
        .iter()
        .map(|v| version_sort_key(v))
        .collect();
    assert!(select_pending(store.migrations(), &applied, None).is_empty());
}

#[test]
fn pending_follows_version_order_not_directory_order() {
    let dir = migration_tree(&[
        ("010_ten.sql", "SELECT 10;"),
        ("002_two.sql", "SELECT 2;"),
        ("001_one.sql", "SELECT 1;"),
    ]);
    let store = MigrationStore::discover(dir.path()).unwrap();

    let pending = select_pending(store.migrations(), &HashSet::new(), None);
    let versions: Vec<_> = pending.iter().map(|m| m.version.as_str()).collect();
    assert_eq!(versions, vec!["001", "002", "010"]);
}

#[test]
fn target_bounds_the_pending_set() {
    let dir = migration_tree(&[
        ("001_one.sql", "SELECT 1;"),
        ("002_two.sql", "SELECT 2;"),
        ("003_three.sql", "SELECT 3;"),
    ]);
    let store = MigrationStore::discover(dir.path()).unwrap();

    let pending = select_pending(store.migrations(), &HashSet::new(), Some("002"));
    let versions: Vec<_> = pending.iter().map(|m| m.version.as_str()).collect();
    assert_eq!(versions, vec!["001", "002"]);
}

#[test]
fn out_of_order_pending_is_refused_material() {
    // 003 applied; 002 appears later on disk — the runner must not skip back
    let dir = migration_tree(&[("002_two.sql", "SELECT 2;"), ("003_three.sql", "SELECT 3;")]);
    let store = MigrationStore::discover(dir.path()).unwrap();

    let applied: HashSet<u64> = [version_sort_key("003")].into_iter().collect();
    let pending = select_pending(store.migrations(), &applied, None);
    let out_of_order = first_out_of_order(&pending, Some(version_sort_key("003")));
    assert_eq!(out_of_order.unwrap().version, "002");
}

#[test]
fn duplicate_version_files_fail_discovery() {
    let dir = migration_tree(&[
        ("001_users.sql", "CREATE TABLE users (id INT);"),
        ("001_accounts.sql", "CREATE TABLE accounts (id INT);"),
    ]);
    let err = MigrationStore::discover(dir.path()).unwrap_err();
    assert_eq!(err.exit_code(), 2, "duplicate versions are a config error");
}

#[test]
fn checksums_are_stable_across_trailing_newline_edits() {
    let dir_a = migration_tree(&[("001_a.sql", "CREATE TABLE t (x INT);")]);
    let dir_b = migration_tree(&[("001_a.sql", "CREATE TABLE t (x INT);\n")]);

    let a = MigrationStore::discover(dir_a.path()).unwrap();
    let b = MigrationStore::discover(dir_b.path()).unwrap();
    assert_eq!(
        a.get("001").unwrap().forward_checksum,
        b.get("001").unwrap().forward_checksum
    );
}

#[test]
fn checksum_matches_recomputation_from_content() {
    let content = "CREATE TABLE t (x INT);";
    let dir = migration_tree(&[("001_a.sql", content)]);
    let store = MigrationStore::discover(dir.path()).unwrap();
    assert_eq!(store.get("001").unwrap().forward_checksum, checksum(content));
}

#[test]
fn rollback_checksum_is_independent_of_forward() {
    let dir = migration_tree(&[
        ("001_a.sql", "CREATE TABLE t (x INT);"),
        ("001_a.rollback.sql", "DROP TABLE t;"),
    ]);
    let store = MigrationStore::discover(dir.path()).unwrap();
    let migration = store.get("001").unwrap();
    assert_ne!(
        migration.forward_checksum,
        migration.rollback_checksum.clone().unwrap()
    );
    assert_eq!(
        migration.rollback_checksum.clone().unwrap(),
        checksum("DROP TABLE t;")
    );
}
