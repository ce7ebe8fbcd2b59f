//! Read-only view of the on-disk migration set.
//!
//! Discovery pairs forward files (`NNN_slug.sql`) with optional rollbacks
//! (`NNN_slug.rollback.sql`), computes content checksums, and orders the set
//! by the numeric value of the version prefix. A [`Migration`] is immutable
//! once discovered; duplicate versions are a fatal discovery error.

use crate::error::{Error, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

static FILENAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn filename_regex() -> &'static Regex {
    FILENAME_REGEX.get_or_init(|| {
        Regex::new(r"^(?P<version>\d+)_(?P<slug>[A-Za-z0-9_-]+)(?P<suffix>(\.rollback)?)\.sql$")
            .expect("static regex pattern is valid")
    })
}

/// A forward/rollback SQL pair identified by its version string.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Zero-padded version prefix exactly as it appears in the filename.
    pub version: String,
    /// Human description derived from the slug (`add_users_table` → "add users table").
    pub description: String,
    pub forward_path: PathBuf,
    pub rollback_path: Option<PathBuf>,
    pub forward_sql: String,
    pub rollback_sql: Option<String>,
    pub forward_checksum: String,
    pub rollback_checksum: Option<String>,
}

impl Migration {
    /// Numeric sort key; `001` and `1` are the same version.
    pub fn sort_key(&self) -> u64 {
        version_sort_key(&self.version)
    }
}

/// Numeric value of a version string. Unparseable versions sort last so they
/// surface in diagnostics rather than silently applying first.
pub fn version_sort_key(version: &str) -> u64 {
    version.parse::<u64>().unwrap_or(u64::MAX)
}

/// Content hash used everywhere in the system: SHA-256 over the file bytes
/// with trailing newlines stripped, so a trailing-newline-only edit does not
/// read as drift.
pub fn checksum(content: &str) -> String {
    let normalized = content.trim_end_matches(['\n', '\r']);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The discovered, ordered migration set for one project.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    directory: PathBuf,
    migrations: Vec<Migration>,
}

impl MigrationStore {
    /// Scan a directory for migration pairs.
    ///
    /// Files that don't match the naming convention are skipped with a
    /// warning. A missing directory yields an empty set (the project may not
    /// use migrations). Duplicate versions are fatal.
    pub fn discover(directory: &Path) -> Result<Self> {
        if !directory.exists() {
            warn!(directory = %directory.display(), "migrations directory not found");
            return Ok(Self {
                directory: directory.to_path_buf(),
                migrations: Vec::new(),
            });
        }

        struct Group {
            forward: Option<(PathBuf, String)>,
            rollback: Option<(PathBuf, String)>,
            version: String,
            slug: String,
        }

        // BTreeMap keyed on the numeric version gives discovery order for free
        let mut groups: BTreeMap<u64, Group> = BTreeMap::new();

        let mut entries: Vec<PathBuf> = std::fs::read_dir(directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        entries.sort();

        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".sql") {
                continue;
            }
            let Some(caps) = filename_regex().captures(name) else {
                warn!(file = name, "skipping file with invalid migration name");
                continue;
            };

            let version = caps["version"].to_string();
            let slug = caps["slug"].to_string();
            let is_rollback = !caps["suffix"].is_empty();
            let key = version_sort_key(&version);

            let group = groups.entry(key).or_insert_with(|| Group {
                forward: None,
                rollback: None,
                version: version.clone(),
                slug: slug.clone(),
            });

            if is_rollback {
                if group.rollback.is_some() {
                    return Err(Error::Config(format!(
                        "duplicate rollback for migration version {} ({})",
                        group.version,
                        path.display()
                    )));
                }
                group.rollback = Some((path, slug));
            } else {
                if let Some((existing, _)) = &group.forward {
                    return Err(Error::Config(format!(
                        "duplicate migration version {}: {} and {}",
                        group.version,
                        existing.display(),
                        path.display()
                    )));
                }
                group.forward = Some((path, slug.clone()));
                group.slug = slug;
            }
        }

        let mut migrations = Vec::with_capacity(groups.len());
        for (_, group) in groups {
            let Some((forward_path, _)) = group.forward else {
                return Err(Error::Config(format!(
                    "rollback file without a forward migration for version {}",
                    group.version
                )));
            };

            let forward_sql = std::fs::read_to_string(&forward_path)?;
            let forward_checksum = checksum(&forward_sql);

            let (rollback_path, rollback_sql, rollback_checksum) = match group.rollback {
                Some((path, _)) => {
                    let sql = std::fs::read_to_string(&path)?;
                    let sum = checksum(&sql);
                    (Some(path), Some(sql), Some(sum))
                }
                None => {
                    // Absence of a rollback is a warning, not an error
                    warn!(
                        version = %group.version,
                        "migration has no rollback file; rollback past it will not be possible"
                    );
                    (None, None, None)
                }
            };

            migrations.push(Migration {
                version: group.version,
                description: group.slug.replace('_', " "),
                forward_path,
                rollback_path,
                forward_sql,
                rollback_sql,
                forward_checksum,
                rollback_checksum,
            });
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            migrations,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// All migrations in ascending version order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Find a migration by version, matching numerically (`1` finds `001`).
    pub fn get(&self, version: &str) -> Option<&Migration> {
        let key = version_sort_key(version);
        self.migrations.iter().find(|m| m.sort_key() == key)
    }

    pub fn versions(&self) -> Vec<String> {
        self.migrations.iter().map(|m| m.version.clone()).collect()
    }
}
