//! Core data model: tasks, verifier outcomes, infra error classification.

use crate::ids::generate_task_id;
use crate::manifest::Manifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Task lifecycle states.
///
/// `QUEUED → RUNNING → {SUCCESS | CANCELLED | STUCK | INFRA_ERROR}`.
/// Transitions out of a terminal state are disallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Cancelled,
    Stuck,
    InfraError,
}

/// The terminal task states.
pub const TERMINAL_STATES: [TaskState; 4] = [
    TaskState::Success,
    TaskState::Cancelled,
    TaskState::Stuck,
    TaskState::InfraError,
];

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Cancelled => "CANCELLED",
            Self::Stuck => "STUCK",
            Self::InfraError => "INFRA_ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATES.contains(self)
    }
}

#[derive(Debug, Error)]
pub enum TaskStateError {
    #[error("task {task_id} is in terminal state {state}, cannot transition to {requested}")]
    TerminalState {
        task_id: String,
        state: &'static str,
        requested: &'static str,
    },
}

/// A submitted task.
///
/// Created by the runner at submission time; mutated only through
/// [`Task::transition_to`]; archived into the bounded completed history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier of the form `task_<yyyymmdd>_<hhmmss>_<6 random>`.
    pub id: String,
    /// Raw user-supplied description.
    pub description: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub verbose: bool,
    /// Run ids accumulated across verification attempts, in execution order.
    pub run_ids: Vec<String>,
    pub current_attempt: u32,
    /// Final success summary (markdown), if the task succeeded.
    pub summary: Option<String>,
    /// Final error message, if the task failed.
    pub error_message: Option<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: generate_task_id(),
            description: description.into(),
            state: TaskState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            dry_run: false,
            verbose: false,
            run_ids: Vec::new(),
            current_attempt: 0,
            summary: None,
            error_message: None,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Guarded state transition. Leaving a terminal state is refused.
    pub fn transition_to(&mut self, state: TaskState) -> Result<(), TaskStateError> {
        if self.state.is_terminal() {
            return Err(TaskStateError::TerminalState {
                task_id: self.id.clone(),
                state: self.state.as_str(),
                requested: state.as_str(),
            });
        }
        self.state = state;
        Ok(())
    }

    pub fn record_run_id(&mut self, run_id: impl Into<String>) {
        self.run_ids.push(run_id.into());
    }
}

/// Tri-valued verification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifierStatus {
    Pass,
    Fail,
    InfraError,
}

impl VerifierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::InfraError => "INFRA_ERROR",
        }
    }
}

/// Classified cause of an infrastructure error (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfraErrorType {
    DockerUnavailable,
    ImagePull,
    ContainerCreation,
    ResourceExhaustion,
    Unknown,
}

impl InfraErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DockerUnavailable => "DOCKER_UNAVAILABLE",
            Self::ImagePull => "IMAGE_PULL",
            Self::ContainerCreation => "CONTAINER_CREATION",
            Self::ResourceExhaustion => "RESOURCE_EXHAUSTION",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Response from a single verification attempt.
///
/// `error_type` and `error_message` are populated only when
/// `status == INFRA_ERROR`. An infra-error response may still carry the
/// run id, tail log, and partial artifact paths produced before the error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierResponse {
    pub status: VerifierStatus,
    pub run_id: Option<String>,
    /// Last lines (≤ 200) of the combined log.
    pub tail_log: Option<String>,
    pub artifact_paths: Option<Vec<PathBuf>>,
    pub manifest: Option<Manifest>,
    pub error_type: Option<InfraErrorType>,
    pub error_message: Option<String>,
}

impl VerifierResponse {
    pub fn pass(
        run_id: impl Into<String>,
        tail_log: String,
        artifact_paths: Vec<PathBuf>,
        manifest: Option<Manifest>,
    ) -> Self {
        Self {
            status: VerifierStatus::Pass,
            run_id: Some(run_id.into()),
            tail_log: Some(tail_log),
            artifact_paths: Some(artifact_paths),
            manifest,
            error_type: None,
            error_message: None,
        }
    }

    pub fn fail(
        run_id: impl Into<String>,
        tail_log: String,
        artifact_paths: Vec<PathBuf>,
        manifest: Option<Manifest>,
    ) -> Self {
        Self {
            status: VerifierStatus::Fail,
            run_id: Some(run_id.into()),
            tail_log: Some(tail_log),
            artifact_paths: Some(artifact_paths),
            manifest,
            error_type: None,
            error_message: None,
        }
    }

    pub fn infra_error(error_type: InfraErrorType, error_message: impl Into<String>) -> Self {
        Self {
            status: VerifierStatus::InfraError,
            run_id: None,
            tail_log: None,
            artifact_paths: None,
            manifest: None,
            error_type: Some(error_type),
            error_message: Some(error_message.into()),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_tail_log(mut self, tail_log: String) -> Self {
        self.tail_log = Some(tail_log);
        self
    }

    pub fn with_artifact_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.artifact_paths = Some(paths);
        self
    }

    pub fn passed(&self) -> bool {
        self.status == VerifierStatus::Pass
    }
}
