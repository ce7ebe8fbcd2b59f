//! Aggregate status for one environment.

use super::Orchestrator;
use crate::error::Result;
use crate::migrate::{MigrationRunner, MigrationStatus, MigrationStore};
use crate::runtime::ContainerState;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::debug;

/// Derived lifecycle phase of an environment.
///
/// The orchestrator holds no persistent state, so the phase is derived from
/// what is observable: the postgres container state and the deployment
/// containers. The transient phases (`starting-db`, `migrating`,
/// `initializing`, `deploying`) exist only inside a running `start` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Nothing exists for this environment.
    Down,
    /// Containers exist but are stopped (debug-friendly `stop`).
    Stopped,
    /// Postgres and the full deployment are running.
    Up,
    /// Something is half-way: postgres without deployment, failed init, or
    /// partially running containers.
    Degraded,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Down => write!(f, "down"),
            Phase::Stopped => write!(f, "stopped"),
            Phase::Up => write!(f, "up"),
            Phase::Degraded => write!(f, "degraded"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PostgresStatus {
    pub container: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentContainer {
    pub name: String,
    pub status: String,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStatus {
    pub environment: String,
    pub project: String,
    pub phase: Phase,
    pub postgres: PostgresStatus,
    /// `None` when the database is not reachable.
    pub migrations: Option<MigrationStatus>,
    pub deployment: Vec<DeploymentContainer>,
}

/// Derive the phase from observable container state. Pure.
pub(crate) fn derive_phase(postgres: &ContainerState, deployment: &[DeploymentContainer]) -> Phase {
    let any_deployment = !deployment.is_empty();
    let all_running = any_deployment && deployment.iter().all(|c| c.running);
    let any_running = deployment.iter().any(|c| c.running);

    match postgres {
        ContainerState::Running => {
            if all_running {
                Phase::Up
            } else {
                Phase::Degraded
            }
        }
        ContainerState::Exited(_) | ContainerState::Other(_) => {
            if any_running {
                Phase::Degraded
            } else {
                Phase::Stopped
            }
        }
        ContainerState::Absent => {
            if any_deployment {
                Phase::Degraded
            } else {
                Phase::Down
            }
        }
    }
}

impl Orchestrator {
    /// Aggregate project info, postgres state, migration status, and
    /// deployment container states for one environment.
    pub async fn status(&self, env_name: &str) -> Result<EnvironmentStatus> {
        let (env_name, spec) = self.config.environment_spec(env_name)?;
        let controller = self.controller_for(env_name, spec);

        let postgres_state = controller.state().await?;
        let postgres = PostgresStatus {
            container: controller.container_name(),
            state: postgres_state.clone(),
        };

        // Containers follow the `{project}-{service}-{env}` convention, and
        // the postgres container itself is reported separately
        let filter = format!("name={}-", self.config.project.name);
        let deployment: Vec<DeploymentContainer> = self
            .runtime
            .ps_status(&filter, Duration::from_secs(15))
            .await?
            .into_iter()
            .filter(|(name, _)| *name != postgres.container)
            .filter(|(name, _)| name.ends_with(&format!("-{}", env_name)))
            .map(|(name, status)| DeploymentContainer {
                running: status.starts_with("Up"),
                name,
                status,
            })
            .collect();

        let migrations = if postgres_state.is_running() {
            self.migration_status(env_name, spec).await
        } else {
            None
        };

        Ok(EnvironmentStatus {
            environment: env_name.to_string(),
            project: self.config.project.name.clone(),
            phase: derive_phase(&postgres_state, &deployment),
            postgres,
            migrations,
            deployment,
        })
    }

    async fn migration_status(
        &self,
        env_name: &str,
        spec: &crate::config::EnvironmentSpec,
    ) -> Option<MigrationStatus> {
        let controller = self.controller_for(env_name, spec);
        let info = controller.connection_info().ok()?;

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&info.url())
            .await
            .map_err(|e| debug!(error = %e, "database not reachable for status"))
            .ok()?;

        let store = MigrationStore::discover(&self.migrations_dir()).ok()?;
        let runner = MigrationRunner::new(store, self.tracker(pool));
        runner.status().await.ok()
    }
}
