use chrono::{DateTime, Utc};
use miette::Diagnostic;
use std::io;
use thiserror::Error;

use crate::runtime::RuntimeError;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(poststack::config::validation),
        help("Run `poststack validate` for detailed validation errors")
    )]
    Validation(String),

    #[error("Container runtime is unavailable: {0}")]
    #[diagnostic(
        code(poststack::runtime::unavailable),
        help("Check that the runtime daemon is running with `docker ps` (or `podman ps`)")
    )]
    RuntimeUnavailable(String),

    #[error("Container '{container}' failed: {reason}")]
    #[diagnostic(
        code(poststack::runtime::failure),
        help("Inspect the container with `docker logs {container}`")
    )]
    RuntimeFailure { container: String, reason: String },

    #[error("Runtime command error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Database unreachable: {0}")]
    #[diagnostic(
        code(poststack::database::unreachable),
        help("Verify the postgres container is running and the configured port is correct")
    )]
    DatabaseUnreachable(String),

    #[error("Migration lock is held by '{holder}' since {since}")]
    #[diagnostic(
        code(poststack::migrate::lock_held),
        help("If the lock is stale, clear it with `poststack clear-locks`")
    )]
    LockHeld {
        holder: String,
        since: DateTime<Utc>,
    },

    #[error("Migration {version} failed: {cause}")]
    #[diagnostic(
        code(poststack::migrate::failed),
        help("The failing migration was rolled back; the tracker is unchanged. Fix the SQL and re-run `poststack migrate`")
    )]
    MigrationFailed { version: String, cause: String },

    #[error("Partial migration state detected at version {version}")]
    #[diagnostic(
        code(poststack::migrate::partial),
        help("Run `poststack diagnose` and `poststack repair` before migrating again")
    )]
    PartialMigration { version: String },

    #[error("Checksum mismatch for migration {version}")]
    #[diagnostic(
        code(poststack::migrate::checksum),
        help("Run `poststack verify` to list drifted migrations, then `poststack repair` to accept the new contents")
    )]
    ChecksumMismatch { version: String },

    #[error("Init manifest '{manifest}' failed{}: exit code {exit_code}",
        .container.as_ref().map(|c| format!(" (container '{}')", c)).unwrap_or_default()
    )]
    #[diagnostic(
        code(poststack::init::failed),
        help("Deployment was not attempted. Check the init container logs above, fix, and re-run `poststack start`")
    )]
    InitFailed {
        manifest: String,
        container: Option<String>,
        exit_code: i32,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Filesystem error: {0}")]
    Filesystem(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Process exit code for this error.
    ///
    /// 0 success, 1 general failure, 2 configuration invalid,
    /// 3 database unreachable, 4 migration failure, 5 drift/validation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Validation(_) => 2,
            Error::DatabaseUnreachable(_) => 3,
            Error::MigrationFailed { .. }
            | Error::PartialMigration { .. }
            | Error::LockHeld { .. } => 4,
            Error::ChecksumMismatch { .. } => 5,
            _ => 1,
        }
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::Config(_) | Error::Validation(_) => {
                Some("Validate your config with: poststack validate".to_string())
            }
            Error::RuntimeUnavailable(_) => {
                Some("Check that the container runtime is running: docker ps".to_string())
            }
            Error::RuntimeFailure { container, .. } => Some(format!(
                "Check the container logs with: docker logs {}",
                container
            )),
            Error::DatabaseUnreachable(_) => Some(
                "Check the postgres container with: poststack status\nIf it is missing, start it with: poststack start"
                    .to_string(),
            ),
            Error::LockHeld { holder, since } => {
                let age = Utc::now().signed_duration_since(*since);
                if age.num_minutes() >= 5 {
                    Some(format!(
                        "The lock held by '{}' looks stale ({} minutes old). Clear it with: poststack clear-locks",
                        holder,
                        age.num_minutes()
                    ))
                } else {
                    Some(format!(
                        "Another migration by '{}' may still be running. Wait for it to finish or run: poststack diagnose",
                        holder
                    ))
                }
            }
            Error::MigrationFailed { version, .. } => Some(format!(
                "Migration {} was rolled back. Fix the SQL file and re-run: poststack migrate",
                version
            )),
            Error::PartialMigration { .. } => {
                Some("Inspect and repair tracker state with: poststack diagnose".to_string())
            }
            Error::ChecksumMismatch { .. } => Some(
                "List drift with: poststack verify\nAccept the edited file with: poststack repair --force"
                    .to_string(),
            ),
            Error::InitFailed { manifest, .. } => Some(format!(
                "Fix the init workload in '{}' and re-run: poststack start",
                manifest
            )),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-facing display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}
