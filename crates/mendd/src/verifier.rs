//! Verifier: glue between the artifact store, the container manager, and
//! the verification pipeline. One call in, one tri-valued response out.

use crate::container::{ContainerConfig, ContainerManager};
use crate::pipeline::{PipelineError, PipelineExecutor, StepResult};
use async_trait::async_trait;
use mend_core::artifacts::{
    combined_log_path, create_run_dir, list_artifact_paths, logs_dir, DEFAULT_TAIL_LINES,
};
use mend_core::artifacts::extract_tail_log;
use mend_core::manifest::{
    current_commit_sha, read_manifest, utc_timestamp, write_manifest, CommandRecord, Manifest,
    PlatformInfo, MANIFEST_FILENAME,
};
use mend_core::{AgentConfig, InfraErrorType, VerifierResponse};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

/// The verification seam consumed by the orchestrator and runner.
#[async_trait]
pub trait Verify: Send + Sync {
    async fn verify(
        &self,
        repo_path: &Path,
        config: &AgentConfig,
        artifact_root: &Path,
    ) -> VerifierResponse;
}

/// Production verifier backed by the local Docker daemon.
#[derive(Debug, Default)]
pub struct DockerVerifier;

impl DockerVerifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Verify for DockerVerifier {
    async fn verify(
        &self,
        repo_path: &Path,
        config: &AgentConfig,
        artifact_root: &Path,
    ) -> VerifierResponse {
        // The run directory exists before the container starts; even infra
        // errors past this point can reference it.
        let (run_id, run_dir) = match create_run_dir(artifact_root) {
            Ok(allocated) => allocated,
            Err(e) => {
                return VerifierResponse::infra_error(
                    InfraErrorType::Unknown,
                    format!("Failed to allocate run directory: {e}"),
                );
            }
        };

        let timestamp_start = utc_timestamp();

        let manager = match ContainerManager::new() {
            Ok(manager) => manager,
            Err(e) => {
                return VerifierResponse::infra_error(e.kind, e.message).with_run_id(run_id);
            }
        };

        if let Err(e) = manager.ping().await {
            return VerifierResponse::infra_error(InfraErrorType::DockerUnavailable, e.message)
                .with_run_id(run_id);
        }

        let image = &config.verification.container_image;
        if let Err(e) = manager.ensure_image(image).await {
            return VerifierResponse::infra_error(InfraErrorType::ImagePull, e.message)
                .with_run_id(run_id);
        }

        let container_config = ContainerConfig::new(image, repo_path, &run_dir);
        let container_id = match manager.create(&container_config).await {
            Ok(id) => id,
            Err(e) => {
                return VerifierResponse::infra_error(e.kind, e.message).with_run_id(run_id);
            }
        };

        // Everything past creation runs under an unconditional destroy.
        let response = run_verification(
            &manager,
            &container_id,
            repo_path,
            config,
            &run_id,
            &run_dir,
            timestamp_start,
        )
        .await;

        manager.destroy(&container_id).await;

        response
    }
}

async fn run_verification(
    manager: &ContainerManager,
    container_id: &str,
    repo_path: &Path,
    config: &AgentConfig,
    run_id: &str,
    run_dir: &Path,
    timestamp_start: String,
) -> VerifierResponse {
    if let Err(e) = manager.start(container_id).await {
        return VerifierResponse::infra_error(InfraErrorType::ContainerCreation, e.message)
            .with_run_id(run_id);
    }

    // Test writes are redirected into the run directory.
    let env_vars: HashMap<String, String> = HashMap::from([
        ("TMPDIR".to_string(), "/artifacts/tmp".to_string()),
        ("TEST_DB_PATH".to_string(), "/artifacts/db".to_string()),
    ]);

    let logs = logs_dir(run_dir);
    let step_timeout = Duration::from_millis(config.timeouts.verification_step);
    let pipeline = PipelineExecutor::new(manager, container_id, &logs, step_timeout);

    let (results, all_passed) = match pipeline.execute(&config.verification.steps, &env_vars).await
    {
        Ok(outcome) => outcome,
        Err(PipelineError::ResourceExhaustion { step, .. }) => {
            error!(run_id, step = %step, "verification hit resource exhaustion");
            return VerifierResponse::infra_error(
                InfraErrorType::ResourceExhaustion,
                format!("Container killed due to resource exhaustion in step '{step}'"),
            )
            .with_run_id(run_id)
            .with_tail_log(extract_tail_log(
                &combined_log_path(run_dir),
                DEFAULT_TAIL_LINES,
            ))
            .with_artifact_paths(list_artifact_paths(run_dir));
        }
        Err(PipelineError::Container(e)) => {
            return VerifierResponse::infra_error(e.kind, e.message)
                .with_run_id(run_id)
                .with_tail_log(extract_tail_log(
                    &combined_log_path(run_dir),
                    DEFAULT_TAIL_LINES,
                ))
                .with_artifact_paths(list_artifact_paths(run_dir));
        }
        Err(PipelineError::Io(e)) => {
            return VerifierResponse::infra_error(
                InfraErrorType::Unknown,
                format!("Failed writing verification logs: {e}"),
            )
            .with_run_id(run_id);
        }
    };

    let timestamp_end = utc_timestamp();
    let status = if all_passed { "PASS" } else { "FAIL" };

    let manifest = Manifest {
        run_id: run_id.to_string(),
        timestamp_start,
        timestamp_end,
        commit_sha: current_commit_sha(repo_path),
        status: status.to_string(),
        commands_executed: results.iter().map(command_record).collect(),
        platform: PlatformInfo::current(&config.verification.container_image),
    };

    if let Err(e) = write_manifest(run_dir, &manifest) {
        return VerifierResponse::infra_error(
            InfraErrorType::Unknown,
            format!("Failed to write manifest: {e}"),
        )
        .with_run_id(run_id);
    }

    let tail_log = extract_tail_log(&combined_log_path(run_dir), DEFAULT_TAIL_LINES);
    let artifact_paths = list_artifact_paths(run_dir);
    let manifest = read_manifest(&run_dir.join(MANIFEST_FILENAME)).ok();

    info!(run_id, status, steps = artifact_paths.len(), "verification complete");

    if all_passed {
        VerifierResponse::pass(run_id, tail_log, artifact_paths, manifest)
    } else {
        VerifierResponse::fail(run_id, tail_log, artifact_paths, manifest)
    }
}

fn command_record(result: &StepResult) -> CommandRecord {
    CommandRecord {
        name: result.name.clone(),
        command: result.command.clone(),
        exit_code: result.exit_code,
        duration_ms: result.duration_ms,
    }
}
