//! Top-level task state machine.
//!
//! The orchestrator owns the parsed task, the scout results, the debug
//! loop, and the agent-directory outputs. It consumes verifier responses
//! and decides what happens next; the runner drives it and performs the
//! actual waiting.

use crate::dry_run::DryRunManager;
use crate::scouts::{CoordinatorError, InfrastructureError, ScoutCoordinator, ScoutResults};
use mend_core::boundaries::{BoundaryError, WriteBoundaryEnforcer};
use mend_core::context::{
    write_context_snapshot, ContextError, EditorState, Milestone,
};
use mend_core::debug_loop::{DebugLoop, LoopAction, TOTAL_VERIFY_LOOP_THRESHOLD};
use mend_core::outputs::{
    generate_stuck_report, generate_success_summary, has_stuck_report, write_stuck_report,
    OutputError, StuckReport, SuccessSummary,
};
use mend_core::task::{parse_task, ParsedTask, TaskParseError};
use mend_core::{VerifierResponse, VerifierStatus};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Orchestrator workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Analyzing,
    Implementing,
    Verifying,
    Debugging,
    Replanning,
    Completed,
    Stuck,
    InfraError,
    Cancelled,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Implementing => "implementing",
            Self::Verifying => "verifying",
            Self::Debugging => "debugging",
            Self::Replanning => "replanning",
            Self::Completed => "completed",
            Self::Stuck => "stuck",
            Self::InfraError => "infra_error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Stuck | Self::InfraError | Self::Cancelled
        )
    }
}

/// Raised when the debug loop hits the total-attempt threshold.
#[derive(Debug, Clone, Error)]
#[error("Hard stop after {total_attempts} verification attempts")]
pub struct HardStopError {
    pub total_attempts: u32,
    pub run_ids: Vec<String>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no task started")]
    NoTask,
    #[error(transparent)]
    Parse(#[from] TaskParseError),
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
    #[error("scout coordination error from {scout_name}: {message}")]
    ScoutCoordination { scout_name: String, message: String },
    #[error(transparent)]
    HardStop(#[from] HardStopError),
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("invalid operation: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Mutable per-task context.
#[derive(Debug, Default)]
pub struct TaskContext {
    pub task: Option<ParsedTask>,
    pub scout_results: Option<ScoutResults>,
    /// Repository-relative modified paths, deduplicated, insertion order.
    pub files_modified: Vec<String>,
    pub current_hypothesis: String,
    pub last_verification: Option<VerifierResponse>,
    pub dry_run_mode: bool,
}

/// The task-lifecycle state machine.
pub struct Orchestrator {
    coordinator: ScoutCoordinator,
    debug_loop: DebugLoop,
    dry_run: DryRunManager,
    enforcer: WriteBoundaryEnforcer,
    agent_dir: PathBuf,
    state: WorkflowState,
    context: TaskContext,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("agent_dir", &self.agent_dir)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        repo_root: &Path,
        artifact_dir: Option<&Path>,
        coordinator: ScoutCoordinator,
    ) -> Result<Self> {
        let enforcer = WriteBoundaryEnforcer::new(repo_root, artifact_dir)?;
        let agent_dir = enforcer.agent_dir();
        let dry_run = DryRunManager::new(enforcer.repo_root());
        Ok(Self {
            coordinator,
            debug_loop: DebugLoop::new(),
            dry_run,
            enforcer,
            agent_dir,
            state: WorkflowState::Idle,
            context: TaskContext::default(),
        })
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn debug_loop(&self) -> &DebugLoop {
        &self.debug_loop
    }

    pub fn dry_run_manager(&mut self) -> &mut DryRunManager {
        &mut self.dry_run
    }

    pub fn boundary_enforcer(&self) -> &WriteBoundaryEnforcer {
        &self.enforcer
    }

    pub fn agent_dir(&self) -> &Path {
        &self.agent_dir
    }

    /// Reset all per-task state.
    pub fn reset(&mut self) {
        self.state = WorkflowState::Idle;
        self.context = TaskContext::default();
        self.debug_loop.reset();
        self.coordinator.reset();
        self.dry_run.reset();
    }

    /// Begin a new task: parse it, pick up a prior stuck report, write the
    /// TASK_START snapshot, and arm dry-run collection if requested.
    pub fn start_task(&mut self, description: &str, dry_run: bool) -> Result<&ParsedTask> {
        self.reset();
        self.state = WorkflowState::Analyzing;
        self.context.dry_run_mode = dry_run;
        if dry_run {
            self.dry_run.arm();
        }

        let task = parse_task(description)?;
        self.context.task = Some(task);

        // A prior stuck report informs the fresh attempt; only the report
        // is consulted, never the full context history.
        if has_stuck_report(&self.agent_dir) {
            info!("prior stuck report found; noting it for this attempt");
            self.context.current_hypothesis =
                "Resuming from stuck state. Previous stuck report available for reference."
                    .to_string();
        }

        self.write_snapshot(Milestone::TaskStart)?;

        Ok(self.context.task.as_ref().expect("task just set"))
    }

    /// Initial codebase analysis: both scouts in parallel.
    pub async fn analyze_codebase(&mut self) -> Result<&ScoutResults> {
        let objective = self
            .context
            .task
            .as_ref()
            .ok_or(OrchestratorError::NoTask)?
            .main_objective
            .clone();

        self.state = WorkflowState::Analyzing;

        match self.coordinator.initial_analysis(&objective).await {
            Ok(results) => {
                self.context.scout_results = Some(results);
                Ok(self.context.scout_results.as_ref().expect("just set"))
            }
            Err(CoordinatorError::Infrastructure(infra)) => {
                self.state = WorkflowState::InfraError;
                Err(infra.into())
            }
            Err(CoordinatorError::Coordination {
                scout_name,
                message,
            }) => {
                self.state = WorkflowState::InfraError;
                Err(OrchestratorError::ScoutCoordination {
                    scout_name,
                    message,
                })
            }
        }
    }

    /// Validate a write path against the boundary enforcer.
    pub fn validate_write_path(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.enforcer.validate(path)?)
    }

    /// Record a modified file (repository-relative, deduplicated).
    pub fn record_file_modification(&mut self, path: &Path) {
        let relative = self
            .enforcer
            .relative_path(path)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string_lossy().to_string());

        if !self.context.files_modified.contains(&relative) {
            self.context.files_modified.push(relative);
        }
    }

    pub fn set_hypothesis(&mut self, hypothesis: impl Into<String>) {
        let hypothesis = hypothesis.into();
        self.context.current_hypothesis = hypothesis.clone();
        self.debug_loop.set_hypothesis(hypothesis);
    }

    /// Mark the point where changes are being applied.
    pub fn begin_implementation(&mut self) {
        self.state = WorkflowState::Implementing;
    }

    /// Mark the point where a verification is in flight.
    pub fn begin_verification(&mut self) {
        self.state = WorkflowState::Verifying;
    }

    /// Consume a verifier response and decide the next action.
    ///
    /// Infra errors transition straight to INFRA_ERROR without touching the
    /// debug-loop counters. A hard stop transitions to STUCK and raises.
    pub fn handle_verification_result(&mut self, response: &VerifierResponse) -> Result<LoopAction> {
        self.context.last_verification = Some(response.clone());

        if response.status == VerifierStatus::InfraError {
            self.state = WorkflowState::InfraError;
            return Err(InfrastructureError::new(
                "verifier",
                response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Verifier infrastructure error".to_string()),
            )
            .into());
        }

        let run_id = response.run_id.clone().unwrap_or_else(|| "unknown".to_string());

        if response.status == VerifierStatus::Pass {
            let action = self.debug_loop.record_success(&run_id);
            self.state = WorkflowState::Completed;
            return Ok(action);
        }

        // Brief failure summary: last tail-log line, truncated.
        let failure_summary = response
            .tail_log
            .as_deref()
            .and_then(|tail| tail.trim().lines().next_back())
            .map(|line| line.chars().take(100).collect::<String>())
            .unwrap_or_else(|| "Unknown failure".to_string());

        let action = self.debug_loop.record_failure(&run_id, failure_summary);

        match action {
            LoopAction::HardStop => {
                self.state = WorkflowState::Stuck;
                Err(HardStopError {
                    total_attempts: self.debug_loop.total_verify_loops(),
                    run_ids: self.debug_loop.state().all_run_ids(),
                }
                .into())
            }
            LoopAction::Replan => {
                self.state = WorkflowState::Replanning;
                Ok(action)
            }
            _ => {
                self.state = WorkflowState::Debugging;
                Ok(action)
            }
        }
    }

    /// Apply a REPLAN: reset the consecutive counter, snapshot, and
    /// optionally re-query the scouts.
    pub async fn trigger_replan(
        &mut self,
        new_strategy: &str,
        requery_scouts: bool,
    ) -> Result<Option<&ScoutResults>> {
        self.debug_loop.trigger_replan(new_strategy);
        self.context.current_hypothesis = new_strategy.to_string();

        self.write_snapshot(Milestone::Replan)?;

        if requery_scouts && self.context.task.is_some() {
            self.analyze_codebase().await.map(Some)
        } else {
            self.state = WorkflowState::Analyzing;
            Ok(None)
        }
    }

    /// Emit the success summary (writes the TASK_SUCCESS snapshot).
    pub fn generate_success_summary(&mut self) -> Result<SuccessSummary> {
        let task = self.context.task.as_ref().ok_or(OrchestratorError::NoTask)?;

        let verification = self
            .context
            .last_verification
            .as_ref()
            .filter(|v| v.status == VerifierStatus::Pass)
            .ok_or_else(|| {
                OrchestratorError::InvalidState(
                    "no passing verification available".to_string(),
                )
            })?;

        let run_id = verification
            .run_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let what_changed = if self.context.current_hypothesis.is_empty() {
            "Changes implemented".to_string()
        } else {
            self.context.current_hypothesis.clone()
        };

        let summary = generate_success_summary(
            task,
            what_changed,
            run_id,
            self.context.files_modified.clone(),
        );

        self.write_snapshot(Milestone::TaskSuccess)?;
        Ok(summary)
    }

    /// Emit and persist the stuck report (hard stop or infra failure).
    pub fn generate_stuck_report(
        &mut self,
        infra_error: Option<(String, String)>,
    ) -> Result<StuckReport> {
        let task = self.context.task.as_ref().ok_or(OrchestratorError::NoTask)?;

        let report = generate_stuck_report(
            task,
            self.debug_loop.state(),
            self.context.files_modified.clone(),
            infra_error,
        );
        write_stuck_report(&self.agent_dir, &report)?;

        Ok(report)
    }

    /// Cooperative cancellation: terminal, but forensically friendly. Files
    /// modified, debug-loop state, and snapshots are all preserved.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = WorkflowState::Cancelled;
        }
    }

    /// Human-readable state line.
    pub fn status_message(&self) -> String {
        match self.state {
            WorkflowState::Idle => "Idle".to_string(),
            WorkflowState::Analyzing => "Analyzing codebase...".to_string(),
            WorkflowState::Implementing => "Implementing changes...".to_string(),
            WorkflowState::Verifying => "Running verification...".to_string(),
            WorkflowState::Debugging => {
                format!("Debugging... {}", self.debug_loop.attempt_display())
            }
            WorkflowState::Replanning => "Replanning strategy...".to_string(),
            WorkflowState::Completed => "Task completed successfully".to_string(),
            WorkflowState::Stuck => "Task stuck - hard stop reached".to_string(),
            WorkflowState::InfraError => "Infrastructure error occurred".to_string(),
            WorkflowState::Cancelled => "Task cancelled".to_string(),
        }
    }

    fn write_snapshot(&self, milestone: Milestone) -> Result<()> {
        let editor_state = EditorState {
            hypothesis: self.context.current_hypothesis.clone(),
            files_modified: self.context.files_modified.clone(),
            verify_attempts: self.debug_loop.total_verify_loops(),
            consecutive_failures: self.debug_loop.consecutive_failures(),
            total_verify_loops: self.debug_loop.total_verify_loops(),
        };

        let (scout_a_raw, scout_b_raw) = match &self.context.scout_results {
            Some(results) => (results.scout_a_raw.clone(), results.scout_b_raw.clone()),
            None => (None, None),
        };

        write_context_snapshot(
            &self.agent_dir,
            milestone,
            scout_a_raw,
            scout_b_raw,
            Some(editor_state),
        )?;
        Ok(())
    }
}

/// Hard-stop threshold surfaced alongside the error for display layers.
pub const HARD_STOP_THRESHOLD: u32 = TOTAL_VERIFY_LOOP_THRESHOLD;
