//! Thin abstraction over the external container runtime.
//!
//! All runtime CLI interactions go through [`RuntimeClient`], which wraps
//! `docker`/`podman` subprocess invocations with consistent timeout handling
//! and structured [`RuntimeError`] returns. The rest of the crate never
//! constructs a runtime `Command` directly.

mod client;
mod error;

pub use client::RuntimeClient;
pub use error::RuntimeError;

use serde::{Deserialize, Serialize};

/// Observed state of a container, as reported by `inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ContainerState {
    /// Container exists and is running.
    Running,
    /// Container exists and has exited with the given code.
    Exited(i32),
    /// Container exists in some other state (created, paused, restarting, dead).
    Other(String),
    /// No container with that name.
    Absent,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    /// States that can be restarted in place (volume preserved).
    pub fn is_restartable(&self) -> bool {
        matches!(self, ContainerState::Exited(_)) || matches!(self, ContainerState::Other(s) if s == "created")
    }
}

/// Specification for `run_container`.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Environment variables passed with `-e`.
    pub env: Vec<(String, String)>,
    /// Port mappings `(host, container)` passed with `-p`.
    pub ports: Vec<(u16, u16)>,
    /// Named volume mounts `(volume, mountpoint)` passed with `-v`.
    pub volumes: Vec<(String, String)>,
}

/// The two manifest dialects the orchestrator hands to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestKind {
    /// Compose-style service document, applied with `<runtime> compose`.
    Compose,
    /// Pod-style document, applied with `podman play kube`.
    Pod,
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestKind::Compose => write!(f, "compose"),
            ManifestKind::Pod => write!(f, "pod"),
        }
    }
}

/// Extract the pod name from a pod manifest (`metadata.name`).
///
/// This is the only structural parsing the core does on manifests; it is
/// needed to tear a pod down by name after `play kube --down` leaves residue.
pub fn pod_name_from_manifest(text: &str) -> Option<String> {
    let doc: serde_yaml::Value = serde_yaml::from_str(text).ok()?;
    doc.get("metadata")?
        .get("name")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_name_extracted_from_metadata() {
        let manifest = "\
apiVersion: v1
kind: Pod
metadata:
  name: myapp-web-dev
spec:
  containers: []
";
        assert_eq!(
            pod_name_from_manifest(manifest),
            Some("myapp-web-dev".to_string())
        );
    }

    #[test]
    fn pod_name_missing_metadata_is_none() {
        assert_eq!(pod_name_from_manifest("kind: Pod"), None);
        assert_eq!(pod_name_from_manifest(": not yaml :::"), None);
    }

    #[test]
    fn container_state_restartable() {
        assert!(ContainerState::Exited(0).is_restartable());
        assert!(ContainerState::Exited(137).is_restartable());
        assert!(ContainerState::Other("created".into()).is_restartable());
        assert!(!ContainerState::Running.is_restartable());
        assert!(!ContainerState::Other("paused".into()).is_restartable());
        assert!(!ContainerState::Absent.is_restartable());
    }
}
