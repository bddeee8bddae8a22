//! Docker container lifecycle for verification runs.
//!
//! One ephemeral container per run: repository mounted read-only at
//! `/workspace`, the run directory read-write at `/artifacts`, fixed
//! resource caps, an idle entrypoint so commands can be exec'd, and an
//! unconditional stop-and-remove at the end.

use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use mend_core::InfraErrorType;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Default CPU cap (number of CPUs).
pub const DEFAULT_CPU_LIMIT: u64 = 4;
/// Default memory cap (8 GiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;
/// Grace period for `stop` before the force removal.
const STOP_GRACE_SECONDS: i64 = 10;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ContainerError {
    pub kind: InfraErrorType,
    pub message: String,
}

impl ContainerError {
    fn new(kind: InfraErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;

/// Classify a bollard error into the infra taxonomy.
pub fn classify_error(error: &bollard::errors::Error) -> InfraErrorType {
    let text = error.to_string().to_lowercase();

    if let bollard::errors::Error::DockerResponseServerError { status_code, .. } = error {
        if *status_code == 404 && (text.contains("image") || text.contains("manifest")) {
            return InfraErrorType::ImagePull;
        }
    }

    if text.contains("oom") || text.contains("memory") || text.contains("killed") {
        return InfraErrorType::ResourceExhaustion;
    }

    if text.contains("connection refused")
        || text.contains("connection")
        || text.contains("refused")
        || text.contains("no such file or directory")
        || text.contains("socket")
    {
        return InfraErrorType::DockerUnavailable;
    }

    if matches!(
        error,
        bollard::errors::Error::DockerResponseServerError { .. }
    ) {
        return InfraErrorType::ContainerCreation;
    }

    InfraErrorType::Unknown
}

/// Configuration for a verification container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    /// Mounted read-only at `/workspace`.
    pub repo_path: PathBuf,
    /// Mounted read-write at `/artifacts`.
    pub run_dir: PathBuf,
    pub cpu_limit: u64,
    pub memory_bytes: u64,
    pub working_dir: String,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>, repo_path: &Path, run_dir: &Path) -> Self {
        Self {
            image: image.into(),
            repo_path: repo_path.to_path_buf(),
            run_dir: run_dir.to_path_buf(),
            cpu_limit: DEFAULT_CPU_LIMIT,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            working_dir: "/workspace".to_string(),
        }
    }
}

/// Manages the container lifecycle against the local Docker daemon.
#[derive(Debug, Clone)]
pub struct ContainerManager {
    docker: Docker,
}

impl ContainerManager {
    /// Connect with local defaults (unix socket / npipe).
    ///
    /// The connection is lazy; `ping` performs the first real round trip.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            ContainerError::new(
                InfraErrorType::DockerUnavailable,
                format!("Failed to connect to Docker: {e}"),
            )
        })?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check daemon reachability.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map(|_| ()).map_err(|e| {
            ContainerError::new(
                InfraErrorType::DockerUnavailable,
                format!("Docker daemon is not running or not accessible: {e}"),
            )
        })
    }

    /// Whether the image is present locally.
    pub async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    /// Pull the image if it is not already present.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await {
            return Ok(());
        }

        debug!(image, "pulling container image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| {
                ContainerError::new(
                    InfraErrorType::ImagePull,
                    format!("Failed to pull image {image}: {e}"),
                )
            })?;
        }
        Ok(())
    }

    /// Create a stopped container with the two bind mounts and resource caps.
    pub async fn create(&self, config: &ContainerConfig) -> Result<String> {
        let binds = vec![
            format!("{}:/workspace:ro", config.repo_path.display()),
            format!("{}:/artifacts:rw", config.run_dir.display()),
        ];

        let host_config = HostConfig {
            binds: Some(binds),
            nano_cpus: Some((config.cpu_limit * 1_000_000_000) as i64),
            memory: Some(config.memory_bytes as i64),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            working_dir: Some(config.working_dir.clone()),
            // Idle entrypoint keeps the container alive for exec calls.
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config)
            .await
            .map_err(|e| {
                ContainerError::new(
                    classify_create_error(&e),
                    format!("Failed to create container: {e}"),
                )
            })?;

        debug!(container_id = %response.id, image = %config.image, "container created");
        Ok(response.id)
    }

    /// Start a created container.
    pub async fn start(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                ContainerError::new(
                    InfraErrorType::ContainerCreation,
                    format!("Failed to start container: {e}"),
                )
            })
    }

    /// Execute a shell command, returning the exit code and the combined
    /// stdout/stderr text.
    pub async fn exec(
        &self,
        container_id: &str,
        command: &str,
        env_vars: &HashMap<String, String>,
    ) -> Result<(i32, String)> {
        let env: Vec<String> = env_vars.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let options = CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            env: Some(env),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some("/workspace".to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(|e| {
                ContainerError::new(
                    classify_error(&e),
                    format!("Failed to execute command: {e}"),
                )
            })?;

        let mut output = String::new();
        match self.docker.start_exec(&exec.id, None).await.map_err(|e| {
            ContainerError::new(
                classify_error(&e),
                format!("Failed to execute command: {e}"),
            )
        })? {
            StartExecResults::Attached {
                output: mut stream, ..
            } => {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| {
                        ContainerError::new(
                            classify_error(&e),
                            format!("Failed reading command output: {e}"),
                        )
                    })?;
                    output.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.map_err(|e| {
            ContainerError::new(
                classify_error(&e),
                format!("Failed to inspect command result: {e}"),
            )
        })?;
        let exit_code = inspect.exit_code.unwrap_or(-1) as i32;

        Ok((exit_code, output))
    }

    /// Stop (10-second grace) then force-remove.
    ///
    /// Idempotent: already-stopped or already-removed containers are fine.
    pub async fn destroy(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: STOP_GRACE_SECONDS,
                }),
            )
            .await
        {
            debug!(container_id, error = %e, "stop_container ignored error");
        }

        if let Err(e) = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(container_id, error = %e, "remove_container ignored error");
        }
    }
}

/// Creation failures get the generic classification unless the message
/// carries an OOM-style signature.
fn classify_create_error(error: &bollard::errors::Error) -> InfraErrorType {
    match classify_error(error) {
        InfraErrorType::ResourceExhaustion => InfraErrorType::ResourceExhaustion,
        InfraErrorType::DockerUnavailable => InfraErrorType::DockerUnavailable,
        _ => InfraErrorType::ContainerCreation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16, message: &str) -> bollard::errors::Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn image_not_found_classifies_as_image_pull() {
        let error = server_error(404, "no such image: ghcr.io/acme/builder:latest");
        assert_eq!(classify_error(&error), InfraErrorType::ImagePull);
    }

    #[test]
    fn oom_signature_classifies_as_resource_exhaustion() {
        let error = server_error(500, "container killed due to OOM");
        assert_eq!(classify_error(&error), InfraErrorType::ResourceExhaustion);

        let error = server_error(500, "cannot allocate memory");
        assert_eq!(classify_error(&error), InfraErrorType::ResourceExhaustion);
    }

    #[test]
    fn connection_refused_classifies_as_docker_unavailable() {
        let error = server_error(500, "connection refused");
        assert_eq!(classify_error(&error), InfraErrorType::DockerUnavailable);
    }

    #[test]
    fn generic_api_error_classifies_as_container_creation() {
        let error = server_error(500, "invalid mount spec");
        assert_eq!(classify_error(&error), InfraErrorType::ContainerCreation);
    }

    #[test]
    fn create_error_never_downgrades_to_unknown() {
        let error = server_error(400, "bad parameter");
        assert_eq!(
            classify_create_error(&error),
            InfraErrorType::ContainerCreation
        );
    }

    #[test]
    fn container_config_defaults() {
        let config = ContainerConfig::new(
            "node:20-slim",
            Path::new("/repo"),
            Path::new("/artifacts/runs/run_x"),
        );
        assert_eq!(config.cpu_limit, DEFAULT_CPU_LIMIT);
        assert_eq!(config.memory_bytes, 8 * 1024 * 1024 * 1024);
        assert_eq!(config.working_dir, "/workspace");
    }

    // Lifecycle tests against a live daemon belong in an integration
    // suite gated on Docker availability; unit coverage here sticks to
    // classification and configuration.
}
