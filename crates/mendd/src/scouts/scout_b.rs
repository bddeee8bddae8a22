//! Scout B: build and test infrastructure analyst.
//!
//! Discovers build systems and test commands, diagnoses verification
//! failures from logs, and flags environment issues. Read-only: it never
//! installs packages or mutates the environment.

use crate::scouts::llm::{LlmClient, LlmError, Message};
use crate::scouts::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::scouts::ScoutError;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const SCOUT_B_SYSTEM_PROMPT: &str = "\
You are Scout B, a build and test infrastructure analyst.

Your job:
1. Build discovery - detect the build system and its commands
2. Test discovery - detect the test framework and its commands
3. Failure analysis - read logs and explain what actually failed
4. Environment assessment - flag setup problems (informational only)

You NEVER modify environment variables or install packages. Respond with
a single JSON object matching the requested schema.";

/// An environment problem Scout B noticed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnvironmentIssue {
    pub description: String,
    /// Informational only; Scout B cannot execute fixes.
    pub suggested_fix: String,
}

/// Diagnosis of a verification failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FailureAnalysis {
    pub root_cause: String,
    pub suggested_investigation: Vec<String>,
}

/// Structured Scout B analysis.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoutBResponse {
    pub summary: String,
    pub build_system: String,
    pub build_commands: Vec<String>,
    pub test_framework: String,
    pub test_commands: Vec<String>,
    pub prerequisites: Vec<String>,
    pub environment_issues: Vec<EnvironmentIssue>,
    pub failure_analysis: Option<FailureAnalysis>,
}

/// Scout B adapter: retry-aware queries plus raw payload capture.
pub struct ScoutB {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
    last_raw: Option<Value>,
}

impl std::fmt::Debug for ScoutB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutB")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ScoutB {
    pub fn new(client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            last_raw: None,
        }
    }

    pub fn raw_response(&self) -> Option<&Value> {
        self.last_raw.as_ref()
    }

    pub fn reset_context(&mut self) {
        self.last_raw = None;
    }

    /// Ask a question, optionally with log content inlined for diagnosis.
    pub async fn query(
        &mut self,
        question: &str,
        log_content: Option<&str>,
    ) -> Result<ScoutBResponse, ScoutError> {
        let mut prompt = String::from(question);
        if let Some(log) = log_content {
            prompt.push_str("\n\nLog content:\n```\n");
            prompt.push_str(log);
            prompt.push_str("\n```");
        }
        let messages = vec![Message::user(prompt)];
        self.query_messages(&messages).await
    }

    /// Structured failure analysis from a verification log.
    pub async fn analyze_failure(&mut self, log_content: &str) -> Result<ScoutBResponse, ScoutError> {
        let question = "\
Analyze this verification failure:

1. What is the root cause of the failure?
2. Which files or configuration are implicated?
3. What should be investigated next?";
        self.query(question, Some(log_content)).await
    }

    async fn query_messages(&mut self, messages: &[Message]) -> Result<ScoutBResponse, ScoutError> {
        let client = Arc::clone(&self.client);
        let raw = run_with_retry(self.policy, || {
            let client = Arc::clone(&client);
            async move {
                client
                    .query_json(messages, Some(SCOUT_B_SYSTEM_PROMPT))
                    .await
            }
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted(exhausted) => ScoutError::RetryExhausted(exhausted),
            RetryError::Permanent(llm) => ScoutError::Llm(llm),
        })?;

        self.last_raw = Some(raw.clone());
        parse_response(raw)
    }
}

fn parse_response(raw: Value) -> Result<ScoutBResponse, ScoutError> {
    serde_json::from_value(raw)
        .map_err(|e| ScoutError::Llm(LlmError::Schema(format!("scout B response: {e}"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scouts::testing::{ScriptedClient, ScriptedReply};
    use serde_json::json;

    #[tokio::test]
    async fn query_parses_build_discovery() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::Json(json!({
            "summary": "cargo workspace",
            "build_system": "cargo",
            "build_commands": ["cargo build"],
            "test_framework": "cargo test",
            "test_commands": ["cargo test --workspace"],
            "prerequisites": ["rustup toolchain"],
        }))]));
        let mut scout = ScoutB::new(client, RetryPolicy::default());

        let response = scout.query("discover the build", None).await.unwrap();
        assert_eq!(response.build_system, "cargo");
        assert_eq!(response.test_commands, vec!["cargo test --workspace"]);
        assert!(response.failure_analysis.is_none());
    }

    #[tokio::test]
    async fn analyze_failure_inlines_log_and_parses_diagnosis() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::Json(json!({
            "failure_analysis": {
                "root_cause": "missing fixture file",
                "suggested_investigation": ["check tests/fixtures"]
            }
        }))]));
        let mut scout = ScoutB::new(
            Arc::clone(&client) as Arc<dyn LlmClient>,
            RetryPolicy::default(),
        );

        let response = scout
            .analyze_failure("FAILED tests/login.rs - no such file: fixture.json")
            .await
            .unwrap();

        let analysis = response.failure_analysis.unwrap();
        assert_eq!(analysis.root_cause, "missing fixture file");
        assert!(client.last_prompt().contains("fixture.json"));
    }

    #[tokio::test]
    async fn schema_violation_is_a_scout_error() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::Json(
            json!({"build_commands": "not-a-list"}),
        )]));
        let mut scout = ScoutB::new(client, RetryPolicy::default());

        let err = scout.query("q", None).await.unwrap_err();
        assert!(matches!(err, ScoutError::Llm(LlmError::Schema(_))));
    }
}
