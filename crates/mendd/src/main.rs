//! mendd - autonomous code-modification agent daemon.
//!
//! Loads `agent.yaml` from the target repository, wires the production
//! collaborators, submits a single task, and waits for it to finish.

use clap::Parser;
use mend_core::config::load_config;
use mend_core::validation::validate_all_inputs;
use mend_core::{EnvConfig, Task};
use mendd::scouts::{RetryPolicy, ScoutA, ScoutB, ScoutCoordinator};
use mendd::{
    DockerVerifier, InMemoryMetrics, NoopEngine, Orchestrator, Services, TaskRunner,
    TracingStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "mendd", about = "Autonomous code-modification agent")]
struct Args {
    /// Target repository root.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Free-form task description.
    task: String,

    /// Capture intended changes as a proposal without writing them.
    #[arg(long)]
    dry_run: bool,

    /// Override the artifact root (default from AGENT_ARTIFACT_DIR or
    /// ~/.agent-artifacts).
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Verbose progress output.
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> eyre::Result<()> {
    let env = EnvConfig::from_env();
    let artifact_root = args.artifact_dir.unwrap_or_else(|| env.artifact_dir.clone());

    let validation = validate_all_inputs(&args.task, &args.repo);
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    if !validation.is_valid() {
        eyre::bail!("invalid input: {}", validation.errors.join("; "));
    }

    let config = load_config(&args.repo.join("agent.yaml"))?;

    let llm = env
        .llm
        .ok_or_else(|| eyre::eyre!("no LLM backend configured; set ANTHROPIC_API_KEY, OPENAI_API_KEY, or AGENT_LLM_BASE_URL"))?;
    let client = mendd_llm::build_client(&llm)?;

    let policy = RetryPolicy::default();
    let metrics = Arc::new(InMemoryMetrics::default());
    let services = Services {
        metrics: Arc::clone(&metrics) as Arc<dyn mendd::Metrics>,
        status: Arc::new(TracingStatus) as Arc<dyn mendd::StatusSink>,
    };

    let coordinator = ScoutCoordinator::new(
        ScoutA::new(Arc::clone(&client), policy),
        ScoutB::new(client, policy),
        Arc::clone(&metrics) as Arc<dyn mendd::Metrics>,
    );

    let orchestrator = Orchestrator::new(&args.repo, Some(&artifact_root), coordinator)?;
    let runner = TaskRunner::new(
        &args.repo,
        config,
        &artifact_root,
        orchestrator,
        Arc::new(DockerVerifier::new()),
        Arc::new(NoopEngine),
        services,
    );

    let task = Task::new(&args.task)
        .with_dry_run(args.dry_run)
        .with_verbose(args.verbose);
    let task_id = task.id.clone();

    runner.submit(task)?;
    runner.wait_until_idle().await;

    let completed = runner.queue().completed(1);
    if let Some(finished) = completed.first() {
        info!(task_id = %task_id, state = finished.state.as_str(), "task finished");
        if let Some(summary) = &finished.summary {
            println!("{summary}");
        }
        if let Some(error) = &finished.error_message {
            eyre::bail!("task did not succeed: {error}");
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        verification_attempts = snapshot.verification_attempts,
        replans = snapshot.replans,
        scout_queries = snapshot.scout_queries,
        "run metrics"
    );

    Ok(())
}

/// LLM backend wiring. The concrete clients live outside this crate; the
/// daemon only needs something that satisfies [`mendd::scouts::LlmClient`].
mod mendd_llm {
    use mend_core::config::LlmConfig;
    use mendd::scouts::{LlmClient, LlmError, Message};
    use serde_json::Value;
    use std::sync::Arc;

    /// Placeholder adapter: reports the backend as unavailable. Deployments
    /// link a real client crate and swap it in here.
    #[derive(Debug)]
    struct UnconfiguredClient {
        backend: String,
    }

    #[async_trait::async_trait]
    impl LlmClient for UnconfiguredClient {
        async fn query(
            &self,
            _messages: &[Message],
            _system_prompt: Option<&str>,
        ) -> Result<String, LlmError> {
            Err(LlmError::Unavailable(format!(
                "no client linked for backend '{}'",
                self.backend
            )))
        }

        async fn query_json(
            &self,
            _messages: &[Message],
            _system_prompt: Option<&str>,
        ) -> Result<Value, LlmError> {
            Err(LlmError::Unavailable(format!(
                "no client linked for backend '{}'",
                self.backend
            )))
        }
    }

    pub fn build_client(config: &LlmConfig) -> eyre::Result<Arc<dyn LlmClient>> {
        let backend = match &config.backend {
            mend_core::config::LlmBackend::Custom { base_url } => format!("custom:{base_url}"),
            mend_core::config::LlmBackend::Anthropic => "anthropic".to_string(),
            mend_core::config::LlmBackend::OpenAi => "openai".to_string(),
        };
        Ok(Arc::new(UnconfiguredClient { backend }))
    }
}
