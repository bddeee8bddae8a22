//! End-to-end task lifecycle tests with scripted collaborators.
//!
//! The scouts, verifier, and change engine are all stubs; the queue,
//! runner, orchestrator, debug loop, snapshots, and reports are real.

use async_trait::async_trait;
use mend_core::config::parse_config;
use mend_core::context::snapshot_count;
use mend_core::outputs::{has_stuck_report, read_stuck_report};
use mend_core::{AgentConfig, InfraErrorType, ParsedTask, Task, TaskState, VerifierResponse};
use mendd::engine::{ChangeEngine, ChangeRequest, EngineError};
use mendd::metrics::InMemoryMetrics;
use mendd::scouts::testing::{ScriptedClient, ScriptedReply};
use mendd::scouts::{LlmClient, LlmError, RetryPolicy, ScoutA, ScoutB, ScoutCoordinator};
use mendd::status::RecordingStatus;
use mendd::{
    Metrics, Orchestrator, ScoutResults, Services, StatusSink, TaskMilestone, TaskRunner, Verify,
};
use serde_json::json;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

fn test_config() -> AgentConfig {
    parse_config(
        "verification:\n  container_image: node:20-slim\n  steps:\n    - name: test\n      command: npm test\n",
    )
    .unwrap()
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        ..RetryPolicy::default()
    }
}

fn healthy_scouts() -> ScoutCoordinator {
    scouts_with(
        Arc::new(ScriptedClient::always(ScriptedReply::Json(
            json!({"summary": "mapped the code"}),
        ))),
        Arc::new(ScriptedClient::always(ScriptedReply::Json(
            json!({"build_system": "npm"}),
        ))),
    )
}

fn scouts_with(a: Arc<ScriptedClient>, b: Arc<ScriptedClient>) -> ScoutCoordinator {
    ScoutCoordinator::new(
        ScoutA::new(a as Arc<dyn LlmClient>, fast_policy()),
        ScoutB::new(b as Arc<dyn LlmClient>, fast_policy()),
        Arc::new(InMemoryMetrics::default()) as Arc<dyn Metrics>,
    )
}

fn run_id(attempt: usize) -> String {
    format!("run_20240115_1432{:02}_abc{:03}", attempt % 60, attempt % 1000)
}

fn pass_response(attempt: usize) -> VerifierResponse {
    VerifierResponse::pass(run_id(attempt), "all tests passed".to_string(), Vec::new(), None)
}

fn fail_response(attempt: usize, tail: &str) -> VerifierResponse {
    VerifierResponse::fail(run_id(attempt), tail.to_string(), Vec::new(), None)
}

/// Verifier that serves scripted responses, optionally holding one call
/// open until the test releases it.
struct ScriptedVerifier {
    responses: Mutex<VecDeque<VerifierResponse>>,
    calls: AtomicUsize,
    gate_on_call: Option<usize>,
    gate_reached: Notify,
    gate_release: Notify,
}

impl ScriptedVerifier {
    fn new(responses: Vec<VerifierResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            gate_on_call: None,
            gate_reached: Notify::new(),
            gate_release: Notify::new(),
        })
    }

    fn gated(responses: Vec<VerifierResponse>, gate_on_call: usize) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            gate_on_call: Some(gate_on_call),
            gate_reached: Notify::new(),
            gate_release: Notify::new(),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verify for ScriptedVerifier {
    async fn verify(
        &self,
        _repo_path: &Path,
        _config: &AgentConfig,
        _artifact_root: &Path,
    ) -> VerifierResponse {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.gate_on_call == Some(call) {
            self.gate_reached.notify_one();
            self.gate_release.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                VerifierResponse::infra_error(InfraErrorType::Unknown, "verifier script exhausted")
            })
    }
}

/// Engine that proposes the same fixed writes on every attempt.
struct TouchEngine {
    files: Vec<(String, String)>,
}

impl TouchEngine {
    fn new(files: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl ChangeEngine for TouchEngine {
    async fn propose_changes(
        &self,
        _task: &ParsedTask,
        _scout_results: Option<&ScoutResults>,
        _hypothesis: &str,
        _attempt: u32,
    ) -> Result<Vec<ChangeRequest>, EngineError> {
        Ok(self
            .files
            .iter()
            .map(|(path, contents)| ChangeRequest {
                path: path.clone(),
                contents: contents.clone(),
            })
            .collect())
    }
}

struct Harness {
    repo: TempDir,
    _artifacts: TempDir,
    runner: Arc<TaskRunner>,
    status: Arc<RecordingStatus>,
    metrics: Arc<InMemoryMetrics>,
}

impl Harness {
    fn new(coordinator: ScoutCoordinator, verifier: Arc<dyn Verify>) -> Self {
        Self::with_engine(
            coordinator,
            verifier,
            TouchEngine::new(&[("src/fix.rs", "pub fn fixed() {}\n")]),
        )
    }

    fn with_engine(
        coordinator: ScoutCoordinator,
        verifier: Arc<dyn Verify>,
        engine: Arc<dyn ChangeEngine>,
    ) -> Self {
        let repo = TempDir::new().unwrap();
        let artifacts = TempDir::new().unwrap();
        let status = Arc::new(RecordingStatus::default());
        let metrics = Arc::new(InMemoryMetrics::default());

        let orchestrator =
            Orchestrator::new(repo.path(), Some(artifacts.path()), coordinator).unwrap();
        let services = Services {
            metrics: Arc::clone(&metrics) as Arc<dyn Metrics>,
            status: Arc::clone(&status) as Arc<dyn StatusSink>,
        };
        let runner = TaskRunner::new(
            repo.path(),
            test_config(),
            artifacts.path(),
            orchestrator,
            verifier,
            engine,
            services,
        );

        Self {
            repo,
            _artifacts: artifacts,
            runner,
            status,
            metrics,
        }
    }

    fn agent_dir(&self) -> PathBuf {
        // The enforcer canonicalizes the repo root; do the same here so
        // paths agree on platforms where tempdirs involve symlinks.
        std::fs::canonicalize(self.repo.path()).unwrap().join("agent")
    }

    async fn run_task(&self, description: &str) -> Task {
        let task = Task::new(description);
        self.runner.submit(task).unwrap();
        self.runner.wait_until_idle().await;
        self.runner.queue().completed(1).into_iter().next().unwrap()
    }

    fn milestones(&self) -> Vec<TaskMilestone> {
        self.status.milestones()
    }
}

// S1: happy path. First verification passes; summary references the run.
#[tokio::test]
async fn happy_path_first_attempt_passes() {
    let harness = Harness::new(healthy_scouts(), ScriptedVerifier::new(vec![pass_response(1)]));

    let task = harness.run_task("Fix the login timeout bug").await;

    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.run_ids, vec![run_id(1)]);
    let summary = task.summary.unwrap();
    assert!(summary.contains(&run_id(1)));
    assert!(summary.contains("src/fix.rs"));

    // Two snapshots: TASK_START and TASK_SUCCESS.
    assert_eq!(snapshot_count(&harness.agent_dir()), 2);
    assert!(!has_stuck_report(&harness.agent_dir()));

    // Engine writes landed inside the repo.
    assert!(harness.repo.path().join("src/fix.rs").exists());

    let milestones = harness.milestones();
    assert!(milestones.contains(&TaskMilestone::TaskStarted));
    assert!(milestones.contains(&TaskMilestone::AnalyzingCodebase));
    assert!(milestones.contains(&TaskMilestone::VerificationPassed));
    assert_eq!(*milestones.last().unwrap(), TaskMilestone::TaskSuccess);
    assert_eq!(harness.metrics.snapshot().verification_attempts, 1);
}

// S2: three failures trigger a REPLAN, then the fourth attempt passes.
#[tokio::test]
async fn replan_after_three_failures_then_success() {
    let verifier = ScriptedVerifier::new(vec![
        fail_response(1, "assertion failed"),
        fail_response(2, "assertion failed"),
        fail_response(3, "assertion failed"),
        pass_response(4),
    ]);
    let harness = Harness::new(healthy_scouts(), verifier);

    let task = harness.run_task("Fix the flaky assertion").await;

    assert_eq!(task.state, TaskState::Success);
    assert_eq!(task.run_ids.len(), 4);
    assert_eq!(harness.metrics.snapshot().replans, 1);

    // TASK_START, REPLAN, TASK_SUCCESS.
    assert_eq!(snapshot_count(&harness.agent_dir()), 3);

    let milestones = harness.milestones();
    assert_eq!(
        milestones
            .iter()
            .filter(|m| **m == TaskMilestone::Replanning)
            .count(),
        1
    );
    assert_eq!(
        milestones
            .iter()
            .filter(|m| **m == TaskMilestone::VerificationFailed)
            .count(),
        3
    );
}

// S3: twelve failures hit the hard stop with REPLANs at 3, 6, and 9.
#[tokio::test]
async fn hard_stop_after_twelve_failures() {
    let responses: Vec<VerifierResponse> = (1..=12)
        .map(|i| fail_response(i, "tests exploded"))
        .collect();
    let verifier = ScriptedVerifier::new(responses);
    let harness = Harness::new(healthy_scouts(), Arc::clone(&verifier) as Arc<dyn Verify>);

    let task = harness.run_task("Fix the unfixable").await;

    assert_eq!(task.state, TaskState::Stuck);
    assert_eq!(task.run_ids.len(), 12);
    assert_eq!(verifier.call_count(), 12);
    assert_eq!(harness.metrics.snapshot().replans, 3);
    assert!(task.error_message.unwrap().contains("Hard stop after 12"));

    let report = read_stuck_report(&harness.agent_dir()).unwrap();
    assert!(report.contains("Hard stop reached after 12 verification attempts."));
    assert!(report.contains("| Run | Status | Primary Failure |"));
    assert!(report.contains("## Hypotheses"));
    for attempt in 1..=12 {
        assert!(report.contains(&run_id(attempt)), "missing {}", run_id(attempt));
    }

    assert_eq!(*harness.milestones().last().unwrap(), TaskMilestone::TaskStuck);
}

// S4: an infra error mid-loop preserves the debug-loop progress and writes
// the infrastructure block.
#[tokio::test]
async fn verifier_infra_error_mid_loop() {
    let verifier = ScriptedVerifier::new(vec![
        fail_response(1, "boom"),
        fail_response(2, "boom"),
        VerifierResponse::infra_error(
            InfraErrorType::DockerUnavailable,
            "Docker daemon is not running or not accessible",
        ),
    ]);
    let harness = Harness::new(healthy_scouts(), verifier);

    let task = harness.run_task("Fix something under a broken daemon").await;

    assert_eq!(task.state, TaskState::InfraError);
    // The infra attempt allocated no run id; only the two failures did.
    assert_eq!(task.run_ids.len(), 2);

    let report = read_stuck_report(&harness.agent_dir()).unwrap();
    assert!(report.contains("## Infrastructure Error"));
    assert!(report.contains("**Source:** verifier"));
    assert!(report.contains("Docker daemon is not running"));
    assert!(report.contains("- Check if Docker is running (for Verifier errors)"));
    // Two recorded attempts in the history table.
    assert_eq!(report.matches("| FAIL |").count(), 2);

    // Modified files survived the failure.
    assert!(harness.repo.path().join("src/fix.rs").exists());
    assert_eq!(
        *harness.milestones().last().unwrap(),
        TaskMilestone::TaskInfraError
    );
}

// S5: scout retry exhaustion surfaces as an infra error before any
// verification; a fresh task can be submitted afterwards.
#[tokio::test]
async fn scout_infra_error_then_fresh_task() {
    let failing_scout_a = Arc::new(ScriptedClient::new(vec![
        ScriptedReply::Fail(LlmError::Timeout("no answer".into())),
        ScriptedReply::Fail(LlmError::Timeout("no answer".into())),
        ScriptedReply::Fail(LlmError::Timeout("no answer".into())),
    ]));
    let healthy_b = Arc::new(ScriptedClient::always(ScriptedReply::Json(json!({}))));
    let verifier = ScriptedVerifier::new(vec![pass_response(1)]);
    let harness = Harness::new(
        scouts_with(failing_scout_a, healthy_b),
        Arc::clone(&verifier) as Arc<dyn Verify>,
    );

    let task = harness.run_task("Map the unreachable codebase").await;

    assert_eq!(task.state, TaskState::InfraError);
    assert_eq!(verifier.call_count(), 0, "no verification may run");

    let report = read_stuck_report(&harness.agent_dir()).unwrap();
    assert!(report.contains("Infrastructure failure from scout_a"));
    assert!(report.contains("Map the unreachable codebase"));

    // Retrying from scratch is a new task with a new id; the scouts now
    // answer (the script is exhausted, so scout A serves no more timeouts
    // and the fallback-less client fails permanently -> still infra).
    let second = harness.run_task("Map the unreachable codebase again").await;
    assert_ne!(second.id, task.id);
}

// S6: cooperative cancellation after one failed attempt preserves state
// and produces no stuck report.
#[tokio::test]
async fn cancellation_preserves_partial_state() {
    let verifier = ScriptedVerifier::gated(
        vec![fail_response(1, "boom"), fail_response(2, "boom")],
        2,
    );
    let engine = TouchEngine::new(&[
        ("src/a.rs", "pub fn a() {}\n"),
        ("src/b.rs", "pub fn b() {}\n"),
    ]);
    let harness = Harness::with_engine(
        healthy_scouts(),
        Arc::clone(&verifier) as Arc<dyn Verify>,
        engine,
    );

    let task = Task::new("Fix the thing, slowly");
    harness.runner.submit(task).unwrap();

    // Wait for the second verification to start, then cancel.
    verifier.gate_reached.notified().await;
    assert!(harness.runner.cancel_current());
    verifier.gate_release.notify_one();

    harness.runner.wait_until_idle().await;
    let task = harness.runner.queue().completed(1).into_iter().next().unwrap();

    assert_eq!(task.state, TaskState::Cancelled);
    assert_eq!(task.error_message.as_deref(), Some("Cancelled by user"));
    // No report for a cancelled task; snapshots so far are preserved.
    assert!(!has_stuck_report(&harness.agent_dir()));
    assert_eq!(snapshot_count(&harness.agent_dir()), 1);
    // Applied modifications survive cancellation.
    assert!(harness.repo.path().join("src/a.rs").exists());
    assert!(harness.repo.path().join("src/b.rs").exists());
    assert_eq!(
        *harness.milestones().last().unwrap(),
        TaskMilestone::TaskCancelled
    );
    assert!(!harness.runner.queue().has_running_task());
}

// FIFO ordering: two queued tasks run in submission order.
#[tokio::test]
async fn queued_tasks_run_in_fifo_order() {
    let verifier = ScriptedVerifier::new(vec![pass_response(1), pass_response(2)]);
    let harness = Harness::new(healthy_scouts(), verifier);

    let first = Task::new("First queued task");
    let second = Task::new("Second queued task");
    let first_id = first.id.clone();
    let second_id = second.id.clone();

    harness.runner.submit(first).unwrap();
    harness.runner.submit(second).unwrap();
    harness.runner.wait_until_idle().await;

    let completed = harness.runner.queue().completed(10);
    assert_eq!(completed.len(), 2);
    // Newest first: the second task finished last.
    assert_eq!(completed[0].id, second_id);
    assert_eq!(completed[1].id, first_id);
    assert!(completed.iter().all(|t| t.state == TaskState::Success));
}

// Submission refuses empty descriptions before queueing.
#[tokio::test]
async fn empty_description_is_refused_at_submission() {
    let harness = Harness::new(healthy_scouts(), ScriptedVerifier::new(vec![]));

    let err = harness.runner.submit(Task::new("   ")).unwrap_err();
    assert!(err.to_string().contains("task rejected"));
    assert!(harness.runner.queue().is_empty());
    assert!(!harness.runner.queue().has_running_task());
}

// Dry run: analysis happens, no verification, proposal artifact written.
#[tokio::test]
async fn dry_run_completes_without_verification() {
    let verifier = ScriptedVerifier::new(vec![]);
    let harness = Harness::new(healthy_scouts(), Arc::clone(&verifier) as Arc<dyn Verify>);

    let task = Task::new("Propose a fix for the bug").with_dry_run(true);
    harness.runner.submit(task).unwrap();
    harness.runner.wait_until_idle().await;

    let task = harness.runner.queue().completed(1).into_iter().next().unwrap();
    assert_eq!(task.state, TaskState::Success);
    assert_eq!(verifier.call_count(), 0);

    let proposal_path = harness.agent_dir().join("dry_run_proposal.md");
    assert!(proposal_path.exists());
    let proposal = std::fs::read_to_string(proposal_path).unwrap();
    assert!(proposal.contains("# Dry-Run Proposal"));
    assert!(proposal.contains("src/fix.rs"));
    // The tree itself is untouched.
    assert!(!harness.repo.path().join("src/fix.rs").exists());
}
