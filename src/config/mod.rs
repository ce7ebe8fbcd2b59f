//! The declarative project file (`.poststack.yaml`) and its validation.
//!
//! One document describes the whole project: the current environment, the
//! project identity used in container names, and a map of environments, each
//! with its postgres settings, ordered init manifests, one deployment
//! manifest, and per-environment variables.

mod parser;

pub use parser::Parser;

use crate::error::{Error, Result};
use crate::runtime::ManifestKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Sentinel password value requesting a generated credential.
pub const AUTO_GENERATED: &str = "auto_generated";

/// Default image when the environment doesn't pin one.
pub const DEFAULT_POSTGRES_IMAGE: &str = "docker.io/library/postgres:16-alpine";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Currently selected environment. Must name a key of `environments`.
    pub environment: String,

    pub project: ProjectMeta,

    pub environments: HashMap<String, EnvironmentSpec>,

    /// Directory holding `NNN_slug.sql` migration files.
    #[serde(default = "default_migrations_dir")]
    pub migrations: PathBuf,

    /// Container runtime binary (`docker` or `podman`).
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Project-wide default variables; the lowest-precedence template layer.
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Minutes after which a held migration lock is considered stuck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_stale_minutes: Option<u64>,
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("./migrations")
}

fn default_runtime() -> String {
    "docker".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// Identifier used in container and volume names.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub postgres: PostgresSpec,

    /// Short-lived workloads that must all exit zero before deployment.
    #[serde(default)]
    pub init: Vec<ManifestRef>,

    pub deployment: ManifestRef,

    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSpec {
    pub database: String,
    /// Host port the container maps 5432 to.
    pub port: u16,
    pub user: String,
    /// Literal password, or `auto_generated`.
    pub password: String,
    #[serde(default = "default_db_host")]
    pub host: String,
    /// Image override; defaults to [`DEFAULT_POSTGRES_IMAGE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

impl PostgresSpec {
    pub fn image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_POSTGRES_IMAGE)
    }

    pub fn wants_generated_password(&self) -> bool {
        self.password == AUTO_GENERATED
    }
}

/// Reference to a manifest file: exactly one of `compose` or `pod`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<PathBuf>,
}

impl ManifestRef {
    pub fn kind(&self) -> ManifestKind {
        if self.compose.is_some() {
            ManifestKind::Compose
        } else {
            ManifestKind::Pod
        }
    }

    pub fn path(&self) -> &Path {
        self.compose
            .as_deref()
            .or(self.pod.as_deref())
            .expect("validated manifest ref has a path")
    }

    fn check(&self, context: &str, base_dir: &Path, errors: &mut Vec<String>) {
        match (&self.compose, &self.pod) {
            (Some(_), Some(_)) => {
                errors.push(format!("{}: specify either compose or pod, not both", context));
            }
            (None, None) => {
                errors.push(format!("{}: one of compose or pod is required", context));
            }
            _ => {
                let path = base_dir.join(self.path());
                if !path.exists() {
                    errors.push(format!("{}: manifest '{}' not found", context, path.display()));
                }
            }
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ProjectConfig {
    /// Validate the whole document. Error messages are path-qualified
    /// (`environments.dev.init[0]: …`) so the operator can find the line.
    ///
    /// `base_dir` is the directory the config file lives in; manifest paths
    /// resolve relative to it.
    pub fn validate(&self, base_dir: &Path) -> Result<()> {
        let mut errors = Vec::new();

        if !is_identifier(&self.project.name) {
            errors.push(format!(
                "project.name: '{}' is not a valid identifier",
                self.project.name
            ));
        }

        if self.environments.is_empty() {
            errors.push("environments: at least one environment is required".to_string());
        }

        if !self.environments.contains_key(&self.environment) {
            let mut available: Vec<_> = self.environments.keys().cloned().collect();
            available.sort();
            errors.push(format!(
                "environment: '{}' is not defined (available: {})",
                self.environment,
                available.join(", ")
            ));
        }

        if self.runtime != "docker" && self.runtime != "podman" {
            errors.push(format!(
                "runtime: '{}' is not supported (use docker or podman)",
                self.runtime
            ));
        }

        for (name, env) in &self.environments {
            let prefix = format!("environments.{}", name);

            if !is_identifier(name) {
                errors.push(format!("{}: not a valid environment name", prefix));
            }
            if env.postgres.database.is_empty() {
                errors.push(format!("{}.postgres.database: required", prefix));
            }
            if env.postgres.user.is_empty() {
                errors.push(format!("{}.postgres.user: required", prefix));
            }
            if env.postgres.port == 0 {
                errors.push(format!("{}.postgres.port: must be 1-65535", prefix));
            }

            for (index, init) in env.init.iter().enumerate() {
                init.check(&format!("{}.init[{}]", prefix, index), base_dir, &mut errors);
            }
            env.deployment
                .check(&format!("{}.deployment", prefix), base_dir, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors.join("\n")))
        }
    }

    /// The spec for the currently selected environment.
    pub fn current_environment(&self) -> Result<(&str, &EnvironmentSpec)> {
        self.environment_spec(&self.environment)
    }

    /// The spec for a named environment.
    pub fn environment_spec(&self, name: &str) -> Result<(&str, &EnvironmentSpec)> {
        match self.environments.get_key_value(name) {
            Some((key, spec)) => Ok((key.as_str(), spec)),
            None => {
                let mut available: Vec<_> = self.environments.keys().cloned().collect();
                available.sort();
                Err(Error::Config(format!(
                    "environment '{}' not found (available: {})",
                    name,
                    available.join(", ")
                )))
            }
        }
    }

    pub fn environment_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.environments.keys().cloned().collect();
        names.sort();
        names
    }
}
