//! `start` / `stop` / `restart` for one environment.

use super::{Orchestrator, Phase};
use crate::config::{EnvironmentSpec, ManifestRef};
use crate::error::{Error, Result};
use crate::migrate::{MigrationRunner, MigrationStore};
use crate::postgres::ConnectionInfo;
use crate::registry::ServiceRegistry;
use crate::runtime::{pod_name_from_manifest, ManifestKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// What `start` accomplished.
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub environment: String,
    /// True when the environment was already up and nothing was mutated.
    pub already_up: bool,
    pub migrations_applied: Vec<String>,
    pub init_manifests_run: usize,
}

impl Orchestrator {
    /// Bring an environment up: database, migrations, init phase, deployment.
    pub async fn start(&self, env_name: &str) -> Result<StartReport> {
        let (env_name, spec) = self.config.environment_spec(env_name)?;

        // Idempotence: a second `start` on an up environment is a no-op
        let current = self.status(env_name).await?;
        if current.phase == Phase::Up {
            info!(environment = env_name, "environment is already up");
            return Ok(StartReport {
                environment: env_name.to_string(),
                already_up: true,
                migrations_applied: Vec::new(),
                init_manifests_run: 0,
            });
        }

        info!(environment = env_name, phase = "starting-db", "starting environment");
        let controller = self.controller_for(env_name, spec);
        let (info, pool) = controller.ensure(&self.cancel).await?;

        let registry = self.build_registry(env_name, spec, &info);

        info!(environment = env_name, phase = "migrating", "applying migrations");
        let store = MigrationStore::discover(&self.migrations_dir())?;
        let runner = MigrationRunner::new(store, self.tracker(pool));
        let outcome = runner.migrate(None, &self.cancel).await?;
        if !outcome.applied_versions.is_empty() {
            info!(
                environment = env_name,
                count = outcome.applied_versions.len(),
                "migrations applied"
            );
        }

        info!(environment = env_name, phase = "initializing", "running init phase");
        let init_count = self
            .run_init_phase(env_name, spec, &info, &registry)
            .await?;

        info!(environment = env_name, phase = "deploying", "applying deployment");
        self.run_deployment(env_name, spec, &info, &registry).await?;

        info!(environment = env_name, phase = "up", "environment started");
        Ok(StartReport {
            environment: env_name.to_string(),
            already_up: false,
            migrations_applied: outcome.applied_versions,
            init_manifests_run: init_count,
        })
    }

    /// Run each init manifest in declared order; every one must finish with
    /// all containers at exit code zero before the next begins.
    async fn run_init_phase(
        &self,
        env_name: &str,
        spec: &EnvironmentSpec,
        info: &ConnectionInfo,
        registry: &ServiceRegistry,
    ) -> Result<usize> {
        for (index, manifest) in spec.init.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let stack =
                self.variable_stack(env_name, spec, info, registry, &format!("init[{}]", index))?;
            let (rendered, expansion) = self.render_manifest(manifest, &stack)?;
            if !expansion.undefined.is_empty() {
                warn!(
                    manifest = %manifest.path().display(),
                    undefined = ?expansion.undefined,
                    "undefined variables in init manifest"
                );
            }

            let result = self.run_init_manifest(manifest, &rendered).await;

            match result {
                Ok(()) => {
                    // Rendered init files are transient; keep them only for debugging failures
                    std::fs::remove_file(&rendered).ok();
                }
                Err(e) => {
                    error!(
                        manifest = %manifest.path().display(),
                        rendered = %rendered.display(),
                        "init phase failed; rendered manifest kept for inspection"
                    );
                    return Err(e);
                }
            }
        }
        Ok(spec.init.len())
    }

    async fn run_init_manifest(&self, manifest: &ManifestRef, rendered: &Path) -> Result<()> {
        let manifest_display = manifest.path().display().to_string();
        match manifest.kind() {
            ManifestKind::Compose => {
                let (exit_code, logs) = self
                    .runtime
                    .apply_manifest_wait(ManifestKind::Compose, rendered, self.init_timeout)
                    .await?;
                if exit_code != 0 {
                    warn!(manifest = %manifest_display, exit_code, "init output:\n{}", logs.trim_end());
                    return Err(Error::InitFailed {
                        manifest: manifest_display,
                        container: None,
                        exit_code,
                    });
                }
                // Completed one-shot containers would otherwise linger
                self.runtime
                    .down_manifest(ManifestKind::Compose, rendered, None, true, self.init_timeout)
                    .await
                    .ok();
                Ok(())
            }
            ManifestKind::Pod => {
                let (exit_code, logs) = self
                    .runtime
                    .apply_manifest_wait(ManifestKind::Pod, rendered, self.init_timeout)
                    .await?;
                if exit_code != 0 {
                    warn!(manifest = %manifest_display, exit_code, "init output:\n{}", logs.trim_end());
                    return Err(Error::InitFailed {
                        manifest: manifest_display,
                        container: None,
                        exit_code,
                    });
                }

                // play kube returns as soon as the pod is up; wait for every
                // container in the pod to exit
                let text = std::fs::read_to_string(rendered)?;
                let pod_name = pod_name_from_manifest(&text).ok_or_else(|| {
                    Error::Config(format!("pod manifest '{}' has no metadata.name", manifest_display))
                })?;
                let containers = self
                    .runtime
                    .pod_container_names(&pod_name, Duration::from_secs(30))
                    .await?;

                for container in &containers {
                    if self.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    let exit_code = self.runtime.wait_exit(container, self.init_timeout).await?;
                    if exit_code != 0 {
                        let logs = self
                            .runtime
                            .logs(container, 50, Duration::from_secs(10))
                            .await
                            .unwrap_or_default();
                        warn!(container = %container, exit_code, "init container logs:\n{}", logs.trim_end());
                        // Tear the failed pod down before reporting
                        self.runtime
                            .down_manifest(
                                ManifestKind::Pod,
                                rendered,
                                Some(&pod_name),
                                true,
                                self.init_timeout,
                            )
                            .await
                            .ok();
                        return Err(Error::InitFailed {
                            manifest: manifest_display,
                            container: Some(container.clone()),
                            exit_code,
                        });
                    }
                }

                self.runtime
                    .down_manifest(
                        ManifestKind::Pod,
                        rendered,
                        Some(&pod_name),
                        true,
                        self.init_timeout,
                    )
                    .await
                    .ok();
                Ok(())
            }
        }
    }

    async fn run_deployment(
        &self,
        env_name: &str,
        spec: &EnvironmentSpec,
        info: &ConnectionInfo,
        registry: &ServiceRegistry,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let stack = self.variable_stack(env_name, spec, info, registry, "deployment")?;
        let (rendered, expansion) = self.render_manifest(&spec.deployment, &stack)?;
        if !expansion.undefined.is_empty() {
            warn!(
                manifest = %spec.deployment.path().display(),
                undefined = ?expansion.undefined,
                "undefined variables in deployment manifest"
            );
        }

        // Readiness is `apply` returning success; deep health checks are the
        // deployment's own concern
        self.runtime
            .apply_manifest(spec.deployment.kind(), &rendered, self.deploy_timeout)
            .await?;
        Ok(())
    }

    /// Tear an environment down. With `remove` the containers are deleted;
    /// the data volume always survives.
    pub async fn stop(&self, env_name: &str, remove: bool) -> Result<()> {
        let (env_name, spec) = self.config.environment_spec(env_name)?;
        info!(environment = env_name, remove, "stopping environment");

        // Re-render so teardown has valid YAML even on a fresh invocation
        let rendered = match self.render_for_teardown(env_name, spec) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "could not render deployment manifest for teardown");
                None
            }
        };

        if let Some(rendered) = &rendered {
            let pod_name = match spec.deployment.kind() {
                ManifestKind::Pod => std::fs::read_to_string(rendered)
                    .ok()
                    .and_then(|text| pod_name_from_manifest(&text)),
                ManifestKind::Compose => None,
            };
            self.runtime
                .down_manifest(
                    spec.deployment.kind(),
                    rendered,
                    pod_name.as_deref(),
                    remove,
                    self.deploy_timeout,
                )
                .await?;
            if remove {
                std::fs::remove_file(rendered).ok();
            }
        }

        let controller = self.controller_for(env_name, spec);
        controller.stop(remove).await?;

        info!(environment = env_name, "environment stopped");
        Ok(())
    }

    /// Clean restart: `stop(remove = true)` then `start`.
    pub async fn restart(&self, env_name: &str) -> Result<StartReport> {
        self.stop(env_name, true).await?;
        self.start(env_name).await
    }

    fn render_for_teardown(&self, env_name: &str, spec: &EnvironmentSpec) -> Result<PathBuf> {
        let rendered = Self::rendered_path(&self.work_dir.join(spec.deployment.path()));
        if rendered.exists() {
            return Ok(rendered);
        }
        // No rendered file from a previous start; produce one
        let controller = self.controller_for(env_name, spec);
        let info = controller.connection_info()?;
        let registry = self.build_registry(env_name, spec, &info);
        let stack = self.variable_stack(env_name, spec, &info, &registry, "deployment")?;
        let (path, _) = self.render_manifest(&spec.deployment, &stack)?;
        Ok(path)
    }
}
