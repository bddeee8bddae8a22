//! Scout A: read-only codebase analyst.
//!
//! Maps the repository for a task: files to change, context files, entry
//! points, risk zones, staged slices, and conventions. Never writes.

use crate::scouts::llm::{LlmClient, LlmError, Message};
use crate::scouts::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::scouts::ScoutError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const SCOUT_A_SYSTEM_PROMPT: &str = "\
You are Scout A, a read-only codebase analyst.

Your job:
1. Codebase mapping - identify the files relevant to a task
2. Pattern recognition - find code patterns, conventions, and idioms
3. Risk assessment - flag fragile zones that need careful handling
4. Slicing - propose safe stages for implementing the task

You NEVER modify files. You NEVER run commands. Respond with a single
JSON object matching the requested schema.";

/// A file Scout A considers relevant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelevantFile {
    pub path: String,
    /// `primary` (needs changes), `secondary`, or `context`.
    pub relevance: String,
    pub reason: String,
}

/// Structured Scout A analysis.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoutAResponse {
    pub summary: String,
    pub relevant_files: Vec<RelevantFile>,
    pub entry_points: Vec<String>,
    pub risk_zones: Vec<String>,
    pub safe_slices: Vec<String>,
    pub conventions: BTreeMap<String, String>,
}

/// Scout A adapter: retry-aware queries plus raw payload capture.
pub struct ScoutA {
    client: Arc<dyn LlmClient>,
    policy: RetryPolicy,
    last_raw: Option<Value>,
}

impl std::fmt::Debug for ScoutA {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutA")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ScoutA {
    pub fn new(client: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            last_raw: None,
        }
    }

    /// Raw JSON payload of the most recent response.
    pub fn raw_response(&self) -> Option<&Value> {
        self.last_raw.as_ref()
    }

    /// Clear per-task conversation context.
    pub fn reset_context(&mut self) {
        self.last_raw = None;
    }

    /// Ask a single analysis question.
    pub async fn query(&mut self, question: &str) -> Result<ScoutAResponse, ScoutError> {
        let messages = vec![Message::user(question)];
        self.query_messages(&messages).await
    }

    /// Ask a question with file bodies inlined for focused analysis.
    pub async fn analyze_files(
        &mut self,
        question: &str,
        file_contents: &BTreeMap<String, String>,
    ) -> Result<ScoutAResponse, ScoutError> {
        let mut prompt = String::from(question);
        prompt.push_str("\n\nFile contents for analysis:\n");
        for (path, content) in file_contents {
            prompt.push_str(&format!("\n--- {path} ---\n{content}\n"));
        }
        let messages = vec![Message::user(prompt)];
        self.query_messages(&messages).await
    }

    async fn query_messages(&mut self, messages: &[Message]) -> Result<ScoutAResponse, ScoutError> {
        let client = Arc::clone(&self.client);
        let raw = run_with_retry(self.policy, || {
            let client = Arc::clone(&client);
            async move {
                client
                    .query_json(messages, Some(SCOUT_A_SYSTEM_PROMPT))
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

fn parse_response(raw: Value) -> Result<ScoutAResponse, ScoutError> {
    serde_json::from_value(raw)
        .map_err(|e| ScoutError::Llm(LlmError::Schema(format!("scout A response: {e}"))))
}
