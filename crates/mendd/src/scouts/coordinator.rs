//! Scout coordination: a pull-based query facade over Scout A and Scout B.
//!
//! The orchestrator initiates every query; the scouts never push. Initial
//! analysis fans out to both scouts in parallel. Retry exhaustion inside
//! an adapter surfaces as an infrastructure error; any other scout failure
//! becomes a coordination error that still names the scout.

use crate::metrics::Metrics;
use crate::scouts::scout_a::{ScoutA, ScoutAResponse};
use crate::scouts::scout_b::{ScoutB, ScoutBResponse};
use crate::scouts::ScoutError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Unrecoverable collaborator failure; the task transitions to INFRA_ERROR.
#[derive(Debug, Clone, Error)]
#[error("infrastructure error from {source_name}: {message}")]
pub struct InfrastructureError {
    /// `scout_a`, `scout_b`, `verifier`, or `boundary`.
    pub source_name: String,
    pub message: String,
}

impl InfrastructureError {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
    #[error("scout coordination error from {scout_name}: {message}")]
    Coordination { scout_name: String, message: String },
}

/// Results of the most recent scout queries.
#[derive(Debug, Default)]
pub struct ScoutResults {
    pub scout_a: Option<ScoutAResponse>,
    pub scout_b: Option<ScoutBResponse>,
    /// Raw JSON payloads, kept for context snapshots.
    pub scout_a_raw: Option<Value>,
    pub scout_b_raw: Option<Value>,
    pub conflict_resolution: Option<String>,
}

impl ScoutResults {
    pub fn has_scout_a(&self) -> bool {
        self.scout_a.is_some()
    }

    pub fn has_scout_b(&self) -> bool {
        self.scout_b.is_some()
    }
}

/// Coordinates queries to Scout A and Scout B.
pub struct ScoutCoordinator {
    scout_a: ScoutA,
    scout_b: ScoutB,
    metrics: Arc<dyn Metrics>,
}

impl std::fmt::Debug for ScoutCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutCoordinator")
            .field("scout_a", &self.scout_a)
            .field("scout_b", &self.scout_b)
            .finish_non_exhaustive()
    }
}

fn scout_a_error(error: ScoutError) -> CoordinatorError {
    match error {
        ScoutError::RetryExhausted(exhausted) => {
            InfrastructureError::new("scout_a", format!("Scout A failed after retries: {exhausted}"))
                .into()
        }
        other => CoordinatorError::Coordination {
            scout_name: "Scout A".to_string(),
            message: other.to_string(),
        },
    }
}

fn scout_b_error(error: ScoutError) -> CoordinatorError {
    match error {
        ScoutError::RetryExhausted(exhausted) => {
            InfrastructureError::new("scout_b", format!("Scout B failed after retries: {exhausted}"))
                .into()
        }
        other => CoordinatorError::Coordination {
            scout_name: "Scout B".to_string(),
            message: other.to_string(),
        },
    }
}

impl ScoutCoordinator {
    pub fn new(scout_a: ScoutA, scout_b: ScoutB, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            scout_a,
            scout_b,
            metrics,
        }
    }

    /// Clear per-scout conversation contexts between tasks.
    pub fn reset(&mut self) {
        self.scout_a.reset_context();
        self.scout_b.reset_context();
    }

    /// Initial analysis for a new task: both scouts, in parallel.
    pub async fn initial_analysis(
        &mut self,
        task_description: &str,
    ) -> Result<ScoutResults, CoordinatorError> {
        let scout_a_question = format!(
            "Analyze this task and identify all relevant files:\n\n\
             Task: {task_description}\n\n\
             Provide:\n\
             1. All files that need to be modified (primary relevance)\n\
             2. Files that provide context but don't need changes\n\
             3. Entry points that would be affected\n\
             4. Risk zones that need careful handling\n\
             5. Safe slices for implementing this task in stages\n\
             6. Coding conventions used in the codebase"
        );
        let scout_b_question = "\
Analyze the build and test infrastructure:

1. Detect the build system and provide build commands
2. Detect the test framework and provide test commands
3. List any prerequisites or environment setup needed
4. Note any potential environment issues";

        let start = Instant::now();
        let (scout_a, scout_b) = {
            let metrics = Arc::clone(&self.metrics);
            let scout_a_fut = self.scout_a.query(&scout_a_question);
            let scout_b_fut = self.scout_b.query(scout_b_question, None);
            let (a, b) = tokio::join!(scout_a_fut, scout_b_fut);
            let elapsed = start.elapsed().as_millis() as u64;
            metrics.record_scout_query("scout_a", elapsed);
            metrics.record_scout_query("scout_b", elapsed);
            (a.map_err(scout_a_error)?, b.map_err(scout_b_error)?)
        };

        info!("initial scout analysis complete");
        Ok(ScoutResults {
            scout_a_raw: self.scout_a.raw_response().cloned(),
            scout_b_raw: self.scout_b.raw_response().cloned(),
            scout_a: Some(scout_a),
            scout_b: Some(scout_b),
            conflict_resolution: None,
        })
    }

    /// Single Scout A query, optionally with inlined file bodies.
    pub async fn query_scout_a(
        &mut self,
        question: &str,
        file_contents: Option<&BTreeMap<String, String>>,
    ) -> Result<ScoutResults, CoordinatorError> {
        let start = Instant::now();
        let response = match file_contents {
            Some(files) => self.scout_a.analyze_files(question, files).await,
            None => self.scout_a.query(question).await,
        }
        .map_err(scout_a_error)?;
        self.metrics
            .record_scout_query("scout_a", start.elapsed().as_millis() as u64);

        Ok(ScoutResults {
            scout_a_raw: self.scout_a.raw_response().cloned(),
            scout_a: Some(response),
            ..ScoutResults::default()
        })
    }

    /// Single Scout B query, optionally with log content for diagnosis.
    pub async fn query_scout_b(
        &mut self,
        question: &str,
        log_content: Option<&str>,
    ) -> Result<ScoutResults, CoordinatorError> {
        let start = Instant::now();
        let response = self
            .scout_b
            .query(question, log_content)
            .await
            .map_err(scout_b_error)?;
        self.metrics
            .record_scout_query("scout_b", start.elapsed().as_millis() as u64);

        Ok(ScoutResults {
            scout_b_raw: self.scout_b.raw_response().cloned(),
            scout_b: Some(response),
            ..ScoutResults::default()
        })
    }

    /// Structured Scout B analysis of a verification failure.
    pub async fn analyze_failure(
        &mut self,
        log_content: &str,
    ) -> Result<ScoutResults, CoordinatorError> {
        let start = Instant::now();
        let response = self
            .scout_b
            .analyze_failure(log_content)
            .await
            .map_err(scout_b_error)?;
        self.metrics
            .record_scout_query("scout_b", start.elapsed().as_millis() as u64);

        Ok(ScoutResults {
            scout_b_raw: self.scout_b.raw_response().cloned(),
            scout_b: Some(response),
            ..ScoutResults::default()
        })
    }

    /// Resolve a disagreement between the scouts.
    ///
    /// Autonomous tie-break on the context string: build/test contexts pick
    /// Scout B, everything else picks Scout A. Never a user prompt.
    pub fn resolve_conflict(
        &self,
        scout_a_suggestion: &str,
        scout_b_suggestion: &str,
        context: &str,
    ) -> String {
        let lower = context.to_lowercase();
        let (decision, rationale) = if lower.contains("test") || lower.contains("build") {
            (
                scout_b_suggestion,
                "Chose Scout B's suggestion as context relates to build/test \
                 infrastructure where Scout B has specialized knowledge.",
            )
        } else {
            (
                scout_a_suggestion,
                "Chose Scout A's suggestion as context relates to codebase \
                 structure where Scout A has specialized knowledge.",
            )
        };

        format!("{decision}\n\nRationale: {rationale}")
    }
}
