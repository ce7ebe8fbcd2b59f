use super::{ContainerSpec, ContainerState, ManifestKind, RuntimeError};
use std::path::Path;
use std::process::Output;
use std::time::Duration;

/// Centralized client for container-runtime CLI operations.
///
/// The binary name is configurable (`docker` or `podman`); compose manifests
/// go through `<runtime> compose`, pod manifests always through `podman play
/// kube`. Construct once and thread through the application.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    binary: String,
}

impl RuntimeClient {
    pub fn new(binary: impl Into<String>) -> Self {
        RuntimeClient {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Run a runtime command with a timeout, returning raw Output.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, RuntimeError> {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&self.binary)
                .args(args)
                .output(),
        )
        .await;

        let cmd_str = format!("{} {}", self.binary, args.join(" "));

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RuntimeError::spawn(&self.binary, e)),
            Err(_) => Err(RuntimeError::expired(cmd_str, timeout)),
        }
    }

    /// Run a runtime command with a timeout, returning Output only if exit 0.
    async fn run_success(&self, args: &[&str], timeout: Duration) -> Result<Output, RuntimeError> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let cmd_str = format!("{} {}", self.binary, args.join(" "));
            Err(RuntimeError::exit(&cmd_str, &output))
        }
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Check if an image exists locally.
    pub async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let output = self
            .run(&["image", "inspect", image], Duration::from_secs(10))
            .await?;
        Ok(output.status.success())
    }

    /// Build an image from a context directory. Inherits stdio for build output.
    pub async fn build_image(&self, name: &str, context: &Path) -> Result<(), RuntimeError> {
        let context_str = context.to_string_lossy();
        let cmd_str = format!("{} build -t {} {}", self.binary, name, context_str);
        let status = tokio::process::Command::new(&self.binary)
            .args(["build", "-t", name, context_str.as_ref()])
            .stdin(std::process::Stdio::inherit())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit())
            .status()
            .await
            .map_err(|e| RuntimeError::spawn(&self.binary, e))?;

        if status.success() {
            Ok(())
        } else {
            // Build output already went to the terminal
            Err(RuntimeError::exit_with(
                cmd_str,
                "see build output above",
                status.code(),
            ))
        }
    }

    /// Pull an image from a registry.
    pub async fn pull(&self, image: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let output = self.run(&["pull", image], timeout).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // "up to date" or "already exists" aren't real failures
        if stderr.contains("up to date") || stderr.contains("already exists") {
            return Ok(());
        }
        Err(RuntimeError::exit(format!("{} pull", self.binary), &output))
    }

    // ========================================================================
    // Container lifecycle
    // ========================================================================

    /// Run a container detached. Returns the container ID on success.
    pub async fn run_container(
        &self,
        spec: &ContainerSpec,
        timeout: Duration,
    ) -> Result<String, RuntimeError> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            spec.name.clone(),
        ];
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        for (host, container) in &spec.ports {
            args.push("-p".into());
            args.push(format!("{}:{}", host, container));
        }
        for (volume, mountpoint) in &spec.volumes {
            args.push("-v".into());
            args.push(format!("{}:{}", volume, mountpoint));
        }
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_success(&arg_refs, timeout).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Inspect a container's state. `Absent` when no such container exists.
    pub async fn inspect_container(
        &self,
        container: &str,
        timeout: Duration,
    ) -> Result<ContainerState, RuntimeError> {
        let output = self
            .run(
                &[
                    "inspect",
                    "-f",
                    "{{.State.Status}} {{.State.ExitCode}}",
                    container,
                ],
                timeout,
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such") {
                return Ok(ContainerState::Absent);
            }
            return Err(RuntimeError::exit(
                format!("{} inspect {}", self.binary, container),
                &output,
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Self::parse_inspect_state(stdout.trim()))
    }

    fn parse_inspect_state(line: &str) -> ContainerState {
        let mut parts = line.split_whitespace();
        let status = parts.next().unwrap_or("unknown");
        match status {
            "running" => ContainerState::Running,
            "exited" => {
                let code = parts.next().and_then(|c| c.parse::<i32>().ok()).unwrap_or(-1);
                ContainerState::Exited(code)
            }
            other => ContainerState::Other(other.to_string()),
        }
    }

    /// Start a stopped container in place (preserves volumes).
    pub async fn start_container(
        &self,
        container: &str,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.run_success(&["start", container], timeout).await?;
        Ok(())
    }

    /// Stop a container with a grace period.
    pub async fn stop_container(
        &self,
        container: &str,
        grace_secs: u32,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let grace = grace_secs.to_string();
        let output = self.run(&["stop", "-t", &grace, container], timeout).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Already stopped or gone — not an error for a stop
        if stderr.contains("No such container") || stderr.contains("is not running") {
            return Ok(());
        }
        Err(RuntimeError::exit(format!("{} stop", self.binary), &output))
    }

    /// Remove a container. Returns `Ok(())` if the container doesn't exist.
    pub async fn remove_container(
        &self,
        container: &str,
        force: bool,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(container);
        let output = self.run(&args, timeout).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }
        Err(RuntimeError::exit(format!("{} rm", self.binary), &output))
    }

    /// Block until a container exits; returns its exit code.
    pub async fn wait_exit(&self, container: &str, timeout: Duration) -> Result<i32, RuntimeError> {
        let output = self.run_success(&["wait", container], timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.trim().parse::<i32>().map_err(|_| {
            RuntimeError::garbled(
                format!("{} wait {}", self.binary, container),
                stdout.trim(),
            )
        })
    }

    /// List container names matching a filter.
    pub async fn ps_names(
        &self,
        filter: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, RuntimeError> {
        let output = self
            .run_success(
                &["ps", "-a", "--filter", filter, "--format", "{{.Names}}"],
                timeout,
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// List container `(name, status)` pairs matching a filter.
    pub async fn ps_status(
        &self,
        filter: &str,
        timeout: Duration,
    ) -> Result<Vec<(String, String)>, RuntimeError> {
        let output = self
            .run_success(
                &[
                    "ps",
                    "-a",
                    "--filter",
                    filter,
                    "--format",
                    "{{.Names}}\t{{.Status}}",
                ],
                timeout,
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(2, '\t');
                match (parts.next(), parts.next()) {
                    (Some(name), Some(status)) => {
                        Some((name.trim().to_string(), status.trim().to_string()))
                    }
                    _ => None,
                }
            })
            .collect())
    }

    // ========================================================================
    // Exec / Logs
    // ========================================================================

    /// Run a command inside a running container.
    pub async fn exec(
        &self,
        container: &str,
        cmd: &[&str],
        timeout: Duration,
    ) -> Result<Output, RuntimeError> {
        let mut args = vec!["exec", container];
        args.extend_from_slice(cmd);
        self.run(&args, timeout).await
    }

    /// Fetch the trailing log lines of a container.
    pub async fn logs(
        &self,
        container: &str,
        tail: usize,
        timeout: Duration,
    ) -> Result<String, RuntimeError> {
        let tail_str = tail.to_string();
        let output = self
            .run(&["logs", "--tail", &tail_str, container], timeout)
            .await?;
        // Runtimes interleave logs across stdout/stderr
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    // ========================================================================
    // Manifests
    // ========================================================================

    /// Apply a manifest detached (deployment phase).
    pub async fn apply_manifest(
        &self,
        kind: ManifestKind,
        file: &Path,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let file_str = file.to_string_lossy();
        match kind {
            ManifestKind::Compose => {
                self.run_success(&["compose", "-f", &file_str, "up", "-d"], timeout)
                    .await?;
            }
            ManifestKind::Pod => {
                self.play_kube(&["play", "kube", &file_str], timeout).await?;
            }
        }
        Ok(())
    }

    /// Apply a manifest and block until its containers exit (init phase).
    ///
    /// Returns `(exit_code, combined_logs)`. For compose this relies on
    /// `--abort-on-container-exit`; for pods the manifest is applied and the
    /// caller waits on the pod's containers via [`Self::wait_exit`].
    pub async fn apply_manifest_wait(
        &self,
        kind: ManifestKind,
        file: &Path,
        timeout: Duration,
    ) -> Result<(i32, String), RuntimeError> {
        let file_str = file.to_string_lossy();
        match kind {
            ManifestKind::Compose => {
                let output = self
                    .run(
                        &[
                            "compose",
                            "-f",
                            &file_str,
                            "up",
                            "--abort-on-container-exit",
                        ],
                        timeout,
                    )
                    .await?;
                let mut logs = String::from_utf8_lossy(&output.stdout).to_string();
                logs.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok((output.status.code().unwrap_or(-1), logs))
            }
            ManifestKind::Pod => {
                let output = self
                    .play_kube_raw(&["play", "kube", &file_str], timeout)
                    .await?;
                let mut logs = String::from_utf8_lossy(&output.stdout).to_string();
                logs.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok((output.status.code().unwrap_or(-1), logs))
            }
        }
    }

    /// Tear down a manifest's containers.
    pub async fn down_manifest(
        &self,
        kind: ManifestKind,
        file: &Path,
        pod_name: Option<&str>,
        remove: bool,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let file_str = file.to_string_lossy();
        match kind {
            ManifestKind::Compose => {
                // `compose down` stops and removes; `compose stop` only stops
                let action = if remove { "down" } else { "stop" };
                let output = self
                    .run(&["compose", "-f", &file_str, action], timeout)
                    .await?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    // Nothing to tear down is fine
                    if !stderr.contains("no such") && !stderr.contains("not found") {
                        return Err(RuntimeError::exit(
                            format!("{} compose {}", self.binary, action),
                            &output,
                        ));
                    }
                }
                Ok(())
            }
            ManifestKind::Pod => {
                let _ = self
                    .play_kube_raw(&["play", "kube", "--down", &file_str], timeout)
                    .await;
                if remove {
                    if let Some(name) = pod_name {
                        // play kube --down can leave the pod shell behind
                        let _ = self
                            .play_kube_raw(&["pod", "rm", "--force", name], timeout)
                            .await;
                    }
                }
                Ok(())
            }
        }
    }

    /// List containers belonging to a pod.
    pub async fn pod_container_names(
        &self,
        pod_name: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, RuntimeError> {
        let filter = format!("pod={}", pod_name);
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("podman")
                .args(["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
                .output(),
        )
        .await
        .map_err(|_| RuntimeError::expired(format!("podman ps --filter {}", filter), timeout))
        .and_then(|r| r.map_err(|e| RuntimeError::spawn("podman", e)))?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            // Infra containers hold the pod open; skip them
            .filter(|s| !s.is_empty() && !s.ends_with("-infra"))
            .collect())
    }

    /// Pod manifests always go through `podman`, regardless of the configured
    /// compose runtime.
    async fn play_kube(&self, args: &[&str], timeout: Duration) -> Result<Output, RuntimeError> {
        let output = self.play_kube_raw(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(RuntimeError::exit(
                format!("podman {}", args.join(" ")),
                &output,
            ))
        }
    }

    async fn play_kube_raw(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output, RuntimeError> {
        let cmd_str = format!("podman {}", args.join(" "));
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("podman").args(args).output(),
        )
        .await;
        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RuntimeError::spawn("podman", e)),
            Err(_) => Err(RuntimeError::expired(cmd_str, timeout)),
        }
    }

    // ========================================================================
    // Volumes
    // ========================================================================

    /// Check if a named volume exists.
    pub async fn volume_exists(&self, volume: &str) -> Result<bool, RuntimeError> {
        let output = self
            .run(&["volume", "inspect", volume], Duration::from_secs(10))
            .await?;
        Ok(output.status.success())
    }

    /// Create a named volume (idempotent — existing volumes are fine).
    pub async fn volume_create(&self, volume: &str) -> Result<(), RuntimeError> {
        let output = self
            .run(&["volume", "create", volume], Duration::from_secs(10))
            .await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already exists") {
            return Ok(());
        }
        Err(RuntimeError::exit(
            format!("{} volume create", self.binary),
            &output,
        ))
    }

    // ========================================================================
    // Daemon health
    // ========================================================================

    /// Check if the runtime daemon is responding.
    pub async fn daemon_healthy(&self, timeout: Duration) -> bool {
        match self
            .run(&["info", "--format", "{{.ServerVersion}}"], timeout)
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }
}

impl Default for RuntimeClient {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inspect_state_variants() {
        assert_eq!(
            RuntimeClient::parse_inspect_state("running 0"),
            ContainerState::Running
        );
        assert_eq!(
            RuntimeClient::parse_inspect_state("exited 1"),
            ContainerState::Exited(1)
        );
        assert_eq!(
            RuntimeClient::parse_inspect_state("exited 137"),
            ContainerState::Exited(137)
        );
        assert_eq!(
            RuntimeClient::parse_inspect_state("paused 0"),
            ContainerState::Other("paused".to_string())
        );
    }

    #[test]
    fn parse_inspect_state_handles_garbage() {
        assert_eq!(
            RuntimeClient::parse_inspect_state("exited notanumber"),
            ContainerState::Exited(-1)
        );
        assert_eq!(
            RuntimeClient::parse_inspect_state(""),
            ContainerState::Other("unknown".to_string())
        );
    }

    #[test]
    fn container_spec_defaults_are_empty() {
        let spec = ContainerSpec {
            name: "poststack-postgres-dev".into(),
            image: "postgres:16".into(),
            ..Default::default()
        };
        assert!(spec.env.is_empty());
        assert!(spec.ports.is_empty());
        assert!(spec.volumes.is_empty());
    }
}
