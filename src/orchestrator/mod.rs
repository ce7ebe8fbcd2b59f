//! Top-level state machine for a named environment.
//!
//! `start` drives the phases in order: ensure postgres, apply migrations,
//! run the init manifests to completion, then apply the deployment manifest.
//! Errors abort at the first failure and leave inspectable residue — no
//! automatic recovery happens inside a single command run. The orchestrator
//! owns the per-run [`ServiceRegistry`] and passes immutable snapshots down;
//! it holds no persistent state of its own.

mod db;
mod lifecycle;
mod status;

pub use lifecycle::StartReport;
pub use status::{DeploymentContainer, EnvironmentStatus, Phase, PostgresStatus};

use crate::config::{EnvironmentSpec, ManifestRef, ProjectConfig};
use crate::error::Result;
use crate::postgres::{ConnectionInfo, PostgresController};
use crate::registry::{NetworkingMode, ServiceRegistry};
use crate::runtime::RuntimeClient;
use crate::template::{self, Expansion, VariableSource, VariableStack};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bound on one init manifest's run (apply + wait for exit).
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(300);
/// Bound on applying the deployment manifest.
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(180);

pub struct Orchestrator {
    config: ProjectConfig,
    /// Directory the project file lives in; manifest and migration paths
    /// resolve relative to it.
    work_dir: PathBuf,
    runtime: RuntimeClient,
    cancel: CancellationToken,
    init_timeout: Duration,
    deploy_timeout: Duration,
}

impl Orchestrator {
    pub fn new(config: ProjectConfig, work_dir: PathBuf) -> Self {
        let runtime = RuntimeClient::new(config.runtime.clone());
        Self {
            config,
            work_dir,
            runtime,
            cancel: CancellationToken::new(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn runtime(&self) -> &RuntimeClient {
        &self.runtime
    }

    /// Token checked at every suspension point; cancel it to abort the
    /// in-flight operation with `Error::Cancelled`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel_operations(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn controller_for(&self, env_name: &str, spec: &EnvironmentSpec) -> PostgresController {
        PostgresController::new(
            self.runtime.clone(),
            self.config.project.name.clone(),
            env_name,
            spec.postgres.clone(),
            &self.work_dir,
        )
    }

    pub(crate) fn migrations_dir(&self) -> PathBuf {
        self.work_dir.join(&self.config.migrations)
    }

    /// Merged non-derived variables for an environment (per-environment over
    /// project-wide), used both for networking-mode detection and as the two
    /// lower template layers.
    pub(crate) fn merged_variables(&self, spec: &EnvironmentSpec) -> HashMap<String, String> {
        let mut merged = self.config.variables.clone();
        merged.extend(spec.variables.clone());
        merged
    }

    pub(crate) fn target_mode(&self, spec: &EnvironmentSpec) -> NetworkingMode {
        let merged = self.merged_variables(spec);
        if merged
            .get("NETWORK_MODE")
            .map(|v| v.eq_ignore_ascii_case("host"))
            .unwrap_or(false)
        {
            NetworkingMode::Host
        } else {
            NetworkingMode::Bridge
        }
    }

    /// Assemble the four-layer variable stack for one manifest:
    /// dependency-derived > built-ins > per-environment > project defaults.
    pub(crate) fn variable_stack(
        &self,
        env_name: &str,
        spec: &EnvironmentSpec,
        info: &ConnectionInfo,
        registry: &ServiceRegistry,
        target: &str,
    ) -> Result<VariableStack> {
        let dependencies: Vec<String> = registry
            .services()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        let dependency_vars =
            registry.variables_for(target, &dependencies, self.target_mode(spec))?;

        let mut stack = VariableStack::new();
        stack.push_layer(VariableSource::Dependency, dependency_vars);
        stack.push_layer(VariableSource::BuiltIn, info.builtin_variables(env_name));
        stack.push_layer(VariableSource::Environment, spec.variables.clone());
        stack.push_layer(
            VariableSource::ProjectDefault,
            self.config.variables.clone(),
        );
        Ok(stack)
    }

    /// Build the per-run registry with the database registered.
    pub(crate) fn build_registry(
        &self,
        env_name: &str,
        spec: &EnvironmentSpec,
        info: &ConnectionInfo,
    ) -> ServiceRegistry {
        let mut registry = ServiceRegistry::new(self.config.project.name.clone(), env_name);
        let mut variables = self.merged_variables(spec);
        variables.extend(info.registry_variables());
        registry.register("postgres", "postgres", variables);
        registry
    }

    /// Deterministic sibling path for a rendered manifest, so teardown finds
    /// the same file a later invocation would produce.
    pub(crate) fn rendered_path(manifest: &Path) -> PathBuf {
        let stem = manifest
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("manifest");
        let ext = manifest
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("yml");
        manifest.with_file_name(format!("{}.rendered.{}", stem, ext))
    }

    /// Expand a manifest against the stack and write the rendered sibling.
    /// Returns the rendered path and the audit report.
    pub(crate) fn render_manifest(
        &self,
        manifest: &ManifestRef,
        stack: &VariableStack,
    ) -> Result<(PathBuf, Expansion)> {
        let source = self.work_dir.join(manifest.path());
        let text = std::fs::read_to_string(&source).map_err(|e| {
            crate::error::Error::Config(format!(
                "Failed to read manifest '{}': {}",
                source.display(),
                e
            ))
        })?;
        let expansion = template::expand_report(&text, stack);
        let rendered = Self::rendered_path(&source);
        std::fs::write(&rendered, &expansion.rendered)?;
        Ok((rendered, expansion))
    }

    /// Dry-run preview of every manifest in an environment: rendered text
    /// plus the variable audit, without touching the runtime or writing any
    /// rendered file.
    pub fn preview(&self, env_name: &str) -> Result<Vec<(PathBuf, Expansion)>> {
        let (env_name, spec) = self.config.environment_spec(env_name)?;
        let controller = self.controller_for(env_name, spec);
        let info = controller.connection_info()?;
        let registry = self.build_registry(env_name, spec, &info);

        let mut previews = Vec::new();
        for (index, manifest) in spec.init.iter().enumerate() {
            let stack =
                self.variable_stack(env_name, spec, &info, &registry, &format!("init[{}]", index))?;
            let source = self.work_dir.join(manifest.path());
            let text = std::fs::read_to_string(&source)?;
            previews.push((source, template::expand_report(&text, &stack)));
        }

        let stack = self.variable_stack(env_name, spec, &info, &registry, "deployment")?;
        let source = self.work_dir.join(spec.deployment.path());
        let text = std::fs::read_to_string(&source)?;
        previews.push((source, template::expand_report(&text, &stack)));

        Ok(previews)
    }
}
