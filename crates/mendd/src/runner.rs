//! Task runner: drives the orchestrator through the full lifecycle.
//!
//! One task runs at a time; submissions queue FIFO behind it. Cancellation
//! is cooperative, checked at the analysis, pre-verify, and post-verify
//! checkpoints. Milestones go to the status sink, counters to metrics.

use crate::engine::ChangeEngine;
use crate::metrics::Metrics;
use crate::orchestrator::{HardStopError, Orchestrator, OrchestratorError};
use crate::queue::{cancel_task, TaskQueue};
use crate::status::{StatusSink, TaskMilestone};
use crate::verifier::Verify;
use mend_core::debug_loop::LoopAction;
use mend_core::outputs::clear_stuck_report;
use mend_core::validation::validate_task_input;
use mend_core::{AgentConfig, Task, TaskState};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Collaborators injected into the runner (no global singletons).
#[derive(Clone)]
pub struct Services {
    pub metrics: Arc<dyn Metrics>,
    pub status: Arc<dyn StatusSink>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Services")
    }
}

/// Final outcome of one task execution.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: Task,
    pub success: bool,
    pub summary: Option<String>,
    pub stuck_report_path: Option<PathBuf>,
    pub error_message: Option<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("task rejected: {0}")]
    Invalid(String),
}

type CompletionCallback = Box<dyn Fn(&TaskResult) + Send + Sync>;

/// Internal workflow failure modes.
#[derive(Debug)]
enum WorkflowError {
    Cancelled,
    HardStop(HardStopError),
    Infrastructure { source: String, message: String },
    Fatal(String),
}

impl From<OrchestratorError> for WorkflowError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::Infrastructure(infra) => Self::Infrastructure {
                source: infra.source_name,
                message: infra.message,
            },
            OrchestratorError::ScoutCoordination {
                scout_name,
                message,
            } => Self::Infrastructure {
                source: scout_name,
                message,
            },
            OrchestratorError::HardStop(hard_stop) => Self::HardStop(hard_stop),
            OrchestratorError::Boundary(boundary) => Self::Infrastructure {
                source: "boundary".to_string(),
                message: boundary.to_string(),
            },
            other => Self::Fatal(other.to_string()),
        }
    }
}

/// Owns the active task and drives it to a terminal state.
pub struct TaskRunner {
    queue: Arc<TaskQueue>,
    services: Services,
    repo_path: PathBuf,
    config: AgentConfig,
    artifact_root: PathBuf,
    orchestrator: tokio::sync::Mutex<Orchestrator>,
    verifier: Arc<dyn Verify>,
    engine: Arc<dyn ChangeEngine>,
    cancel: Mutex<CancellationToken>,
    callbacks: Mutex<Vec<CompletionCallback>>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("repo_path", &self.repo_path)
            .field("artifact_root", &self.artifact_root)
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    pub fn new(
        repo_path: &Path,
        config: AgentConfig,
        artifact_root: &Path,
        orchestrator: Orchestrator,
        verifier: Arc<dyn Verify>,
        engine: Arc<dyn ChangeEngine>,
        services: Services,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::new(TaskQueue::new()),
            services,
            repo_path: repo_path.to_path_buf(),
            config,
            artifact_root: artifact_root.to_path_buf(),
            orchestrator: tokio::sync::Mutex::new(orchestrator),
            verifier,
            engine,
            cancel: Mutex::new(CancellationToken::new()),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Register a completion hook. Hooks are guarded: a panicking hook
    /// never takes down the runner.
    pub fn add_completion_callback<F>(&self, callback: F)
    where
        F: Fn(&TaskResult) + Send + Sync + 'static,
    {
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// Submit a task. Returns 0 when it starts immediately, otherwise its
    /// queue position. Invalid descriptions are refused before queueing.
    pub fn submit(self: &Arc<Self>, task: Task) -> Result<usize, SubmitError> {
        let validation = validate_task_input(&task.description);
        if !validation.is_valid() {
            return Err(SubmitError::Invalid(validation.errors.join("; ")));
        }

        let position = self.queue.add(task);
        if self.queue.has_running_task() {
            info!(position, "task queued behind running task");
            Ok(position)
        } else {
            self.start_next();
            Ok(0)
        }
    }

    /// Cancel the in-flight task at its next cooperative checkpoint.
    pub fn cancel_current(&self) -> bool {
        if !self.queue.has_running_task() {
            return false;
        }
        self.cancel.lock().unwrap().cancel();
        true
    }

    /// Cancel a still-queued task by its 1-based position.
    pub fn cancel_queued(&self, position: usize) -> Option<Task> {
        let task = self.queue.remove_by_position(position)?;
        let cancelled = cancel_task(task);
        self.queue.mark_completed(cancelled.clone());
        Some(cancelled)
    }

    /// Cancel by id: the running task cooperatively, a queued one directly.
    pub fn cancel_by_id(&self, task_id: &str) -> bool {
        if let Some(current) = self.queue.current() {
            if current.id == task_id {
                return self.cancel_current();
            }
        }
        match self.queue.remove_by_id(task_id) {
            Some(task) => {
                let cancelled = cancel_task(task);
                self.queue.mark_completed(cancelled);
                true
            }
            None => false,
        }
    }

    /// Wait until no task is running and the queue is drained.
    pub async fn wait_until_idle(&self) {
        loop {
            if !self.queue.has_running_task() && self.queue.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    fn start_next(self: &Arc<Self>) {
        let Some(mut task) = self.queue.dequeue() else {
            return;
        };

        // Fresh cancellation scope per task.
        *self.cancel.lock().unwrap() = CancellationToken::new();

        if task.transition_to(TaskState::Running).is_err() {
            warn!(task_id = %task.id, "dequeued task was already terminal");
            return;
        }
        task.started_at = Some(chrono::Utc::now());
        self.queue.set_current(Some(task.clone()));

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.execute(task).await;
        });
    }

    async fn execute(self: Arc<Self>, mut task: Task) {
        self.services
            .status
            .emit(TaskMilestone::TaskStarted, Some(&task.id));
        self.services.metrics.start_task(&task.id);

        let cancel = self.cancel.lock().unwrap().clone();
        let outcome = self.run_workflow(&mut task, &cancel).await;

        let result = self.finalize(task, outcome).await;

        self.services
            .metrics
            .end_task(&result.task.id, result.task.state);
        self.queue.mark_completed(result.task.clone());

        for callback in self.callbacks.lock().unwrap().iter() {
            // Guarded: user-supplied hooks must not break execution.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(&result);
            }));
            if outcome.is_err() {
                warn!("completion callback panicked");
            }
        }

        if !self.queue.is_empty() {
            self.start_next();
        }
    }

    async fn run_workflow(
        &self,
        task: &mut Task,
        cancel: &CancellationToken,
    ) -> Result<String, WorkflowError> {
        let status = &self.services.status;
        let metrics = &self.services.metrics;
        let mut orchestrator = self.orchestrator.lock().await;

        orchestrator
            .start_task(&task.description, task.dry_run)
            .map_err(WorkflowError::from)?;

        // Checkpoint: analysis start.
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        status.emit(TaskMilestone::AnalyzingCodebase, None);
        status.emit(TaskMilestone::QueryingScoutA, None);
        status.emit(TaskMilestone::QueryingScoutB, None);
        orchestrator.analyze_codebase().await?;
        status.emit(TaskMilestone::AnalysisComplete, None);

        if task.dry_run {
            return self.run_dry_run(&mut orchestrator, status).await;
        }

        loop {
            // Checkpoint: iteration start.
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            status.emit(TaskMilestone::ImplementingChanges, None);
            orchestrator.begin_implementation();
            self.apply_changes(&mut orchestrator, task.current_attempt + 1)
                .await?;
            status.emit(TaskMilestone::ChangesApplied, None);

            // Checkpoint: before verify.
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            task.current_attempt += 1;
            status.emit(
                TaskMilestone::RunningVerification,
                Some(&format!("attempt {}", task.current_attempt)),
            );
            orchestrator.begin_verification();

            let started = Instant::now();
            let response = self
                .verifier
                .verify(&self.repo_path, &self.config, &self.artifact_root)
                .await;
            metrics.record_verifier_execution(started.elapsed().as_millis() as u64);
            metrics.record_verification_attempt();

            if let Some(run_id) = &response.run_id {
                task.record_run_id(run_id.clone());
            }

            let action = orchestrator.handle_verification_result(&response)?;

            // Checkpoint: after verify.
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            match action {
                LoopAction::Success => {
                    status.emit(TaskMilestone::VerificationPassed, None);
                    let summary = orchestrator
                        .generate_success_summary()
                        .map_err(WorkflowError::from)?;
                    // A successful task clears any stale stuck report.
                    let _ = clear_stuck_report(orchestrator.agent_dir());
                    status.emit(TaskMilestone::TaskSuccess, None);
                    return Ok(summary.to_markdown());
                }
                LoopAction::Continue => {
                    status.emit(TaskMilestone::VerificationFailed, None);
                }
                LoopAction::Replan => {
                    status.emit(TaskMilestone::VerificationFailed, None);
                    status.emit(TaskMilestone::Replanning, None);
                    metrics.record_replan();

                    let failure_pattern = response.tail_log.clone().unwrap_or_default();
                    let requery = orchestrator
                        .debug_loop()
                        .should_requery_scouts(&failure_pattern);
                    let strategy = format!(
                        "Revised strategy after {} failed verification attempts",
                        orchestrator.debug_loop().total_verify_loops()
                    );
                    if requery {
                        status.emit(TaskMilestone::QueryingScoutA, None);
                        status.emit(TaskMilestone::QueryingScoutB, None);
                    }
                    orchestrator.trigger_replan(&strategy, requery).await?;
                }
                LoopAction::HardStop => {
                    unreachable!("hard stop surfaces as an error from handle_verification_result")
                }
            }
        }
    }

    /// Dry-run path: collect proposed changes, write the proposal artifact,
    /// skip verification entirely.
    async fn run_dry_run(
        &self,
        orchestrator: &mut Orchestrator,
        status: &Arc<dyn StatusSink>,
    ) -> Result<String, WorkflowError> {
        status.emit(TaskMilestone::ImplementingChanges, None);

        let changes = {
            let context = orchestrator.context();
            let task = context.task.as_ref().cloned().ok_or_else(|| {
                WorkflowError::Fatal("dry-run started without a parsed task".to_string())
            })?;
            self.engine
                .propose_changes(
                    &task,
                    context.scout_results.as_ref(),
                    &context.current_hypothesis,
                    1,
                )
                .await
                .map_err(|e| WorkflowError::Fatal(e.to_string()))?
        };

        for change in &changes {
            // Boundary checks still apply to intended writes.
            orchestrator
                .validate_write_path(Path::new(&change.path))
                .map_err(WorkflowError::from)?;
            orchestrator
                .dry_run_manager()
                .record_write(&change.path, &change.contents)
                .map_err(|e| WorkflowError::Fatal(e.to_string()))?;
        }
        status.emit(TaskMilestone::ChangesApplied, None);

        let proposal_markdown = orchestrator.dry_run_manager().proposal().to_markdown();
        let proposal_path = orchestrator.agent_dir().join("dry_run_proposal.md");
        if let Some(parent) = proposal_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(&proposal_path, &proposal_markdown)
            .map_err(|e| WorkflowError::Fatal(format!("failed writing proposal: {e}")))?;

        status.emit(TaskMilestone::TaskSuccess, None);
        Ok(format!(
            "Dry-run completed. Review proposed changes in {}",
            proposal_path.display()
        ))
    }

    /// Ask the engine for changes and write them through the boundary.
    async fn apply_changes(
        &self,
        orchestrator: &mut Orchestrator,
        attempt: u32,
    ) -> Result<(), WorkflowError> {
        let changes = {
            let context = orchestrator.context();
            let task = context.task.as_ref().cloned().ok_or_else(|| {
                WorkflowError::Fatal("workflow running without a parsed task".to_string())
            })?;
            self.engine
                .propose_changes(
                    &task,
                    context.scout_results.as_ref(),
                    &context.current_hypothesis,
                    attempt,
                )
                .await
                .map_err(|e| WorkflowError::Fatal(e.to_string()))?
        };

        for change in &changes {
            let absolute = orchestrator
                .validate_write_path(Path::new(&change.path))
                .map_err(WorkflowError::from)?;
            if let Some(parent) = absolute.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| WorkflowError::Fatal(format!("create dir failed: {e}")))?;
            }
            std::fs::write(&absolute, &change.contents)
                .map_err(|e| WorkflowError::Fatal(format!("write failed: {e}")))?;
            orchestrator.record_file_modification(&absolute);
        }
        Ok(())
    }

    async fn finalize(
        &self,
        mut task: Task,
        outcome: Result<String, WorkflowError>,
    ) -> TaskResult {
        task.completed_at = Some(chrono::Utc::now());
        let status = &self.services.status;

        match outcome {
            Ok(summary) => {
                let _ = task.transition_to(TaskState::Success);
                task.summary = Some(summary.clone());
                TaskResult {
                    task,
                    success: true,
                    summary: Some(summary),
                    stuck_report_path: None,
                    error_message: None,
                }
            }
            Err(WorkflowError::Cancelled) => {
                let _ = task.transition_to(TaskState::Cancelled);
                task.error_message = Some("Cancelled by user".to_string());
                let mut orchestrator = self.orchestrator.lock().await;
                orchestrator.cancel();
                status.emit(TaskMilestone::TaskCancelled, None);
                TaskResult {
                    task,
                    success: false,
                    summary: None,
                    stuck_report_path: None,
                    error_message: Some("Cancelled by user".to_string()),
                }
            }
            Err(WorkflowError::HardStop(hard_stop)) => {
                let _ = task.transition_to(TaskState::Stuck);
                task.error_message = Some(hard_stop.to_string());
                let report_path = self.write_stuck_report(None).await;
                status.emit(TaskMilestone::TaskStuck, None);
                TaskResult {
                    task,
                    success: false,
                    summary: None,
                    stuck_report_path: report_path,
                    error_message: Some(hard_stop.to_string()),
                }
            }
            Err(WorkflowError::Infrastructure { source, message }) => {
                let _ = task.transition_to(TaskState::InfraError);
                task.error_message = Some(message.clone());
                let report_path = self
                    .write_stuck_report(Some((source.clone(), message.clone())))
                    .await;
                status.emit(TaskMilestone::TaskInfraError, Some(&message));
                TaskResult {
                    task,
                    success: false,
                    summary: None,
                    stuck_report_path: report_path,
                    error_message: Some(message),
                }
            }
            Err(WorkflowError::Fatal(message)) => {
                error!(error = %message, "task failed with unexpected error");
                let _ = task.transition_to(TaskState::InfraError);
                task.error_message = Some(message.clone());
                let report_path = self
                    .write_stuck_report(Some(("runner".to_string(), message.clone())))
                    .await;
                status.emit(TaskMilestone::TaskInfraError, Some(&message));
                TaskResult {
                    task,
                    success: false,
                    summary: None,
                    stuck_report_path: report_path,
                    error_message: Some(message),
                }
            }
        }
    }

    async fn write_stuck_report(&self, infra: Option<(String, String)>) -> Option<PathBuf> {
        let mut orchestrator = self.orchestrator.lock().await;
        match orchestrator.generate_stuck_report(infra) {
            Ok(_) => Some(orchestrator.agent_dir().join("stuck_report.md")),
            Err(e) => {
                warn!(error = %e, "could not write stuck report");
                None
            }
        }
    }
}
