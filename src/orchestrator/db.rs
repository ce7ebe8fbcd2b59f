//! Database wiring for the migration-facing commands.
//!
//! `migrate`, `rollback`, `verify`, `diagnose`, `repair`, and `clear-locks`
//! talk to an environment's database directly without driving the full start
//! sequence. Connection failures surface as `DatabaseUnreachable` with the
//! exit code that implies.

use super::Orchestrator;
use crate::error::{Error, Result};
use crate::migrate::{
    Diagnostics, MigrationRunner, MigrationStore, MigrationTracker, DEFAULT_LOCK_STALE_AFTER,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl Orchestrator {
    /// Connect to an environment's database without provisioning anything.
    pub async fn connect(&self, env_name: &str) -> Result<PgPool> {
        let (env_name, spec) = self.config.environment_spec(env_name)?;
        let controller = self.controller_for(env_name, spec);
        let info = controller.connection_info()?;

        PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(&info.url())
            .await
            .map_err(|e| {
                Error::DatabaseUnreachable(format!(
                    "cannot connect to {}:{}/{}: {}",
                    info.host, info.port, info.database, e
                ))
            })
    }

    fn stale_after(&self) -> Duration {
        self.config
            .lock_stale_minutes
            .map(|minutes| Duration::from_secs(minutes * 60))
            .unwrap_or(DEFAULT_LOCK_STALE_AFTER)
    }

    /// Every tracker in the crate is built here so the configured
    /// `lock_stale_minutes` applies uniformly.
    pub(crate) fn tracker(&self, pool: PgPool) -> MigrationTracker {
        MigrationTracker::new(pool).with_stale_after(self.stale_after())
    }

    /// A runner over the discovered migration set and this environment's
    /// tracker tables.
    pub async fn migration_runner(&self, env_name: &str) -> Result<MigrationRunner> {
        let pool = self.connect(env_name).await?;
        let store = MigrationStore::discover(&self.migrations_dir())?;
        Ok(MigrationRunner::new(store, self.tracker(pool)))
    }

    /// Diagnostics over the same pair.
    pub async fn diagnostics(&self, env_name: &str) -> Result<Diagnostics> {
        let pool = self.connect(env_name).await?;
        let store = MigrationStore::discover(&self.migrations_dir())?;
        Ok(Diagnostics::new(store, self.tracker(pool)))
    }

    /// Unconditionally clear the migration lock (the `clear-locks` command).
    pub async fn clear_locks(&self, env_name: &str) -> Result<()> {
        let pool = self.connect(env_name).await?;
        let tracker = self.tracker(pool);
        tracker.bootstrap().await?;
        tracker.release_lock().await
    }
}
