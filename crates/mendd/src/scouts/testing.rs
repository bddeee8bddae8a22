//! Scripted LLM client for tests.
//!
//! Replies are served in order; an optional fallback answers once the
//! script runs out. Used by unit tests here and by the integration suite.

use crate::scouts::llm::{LlmClient, LlmError, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Json(Value),
    Text(String),
    Fail(LlmError),
}

/// [`LlmClient`] that serves scripted replies and records prompts.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Serve `reply` for every query, forever.
    pub fn always(reply: ScriptedReply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn next_reply(&self, prompt: &str) -> ScriptedReply {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| {
                ScriptedReply::Fail(LlmError::InvalidResponse("script exhausted".to_string()))
            })
    }
}

fn joined_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn query(
        &self,
        messages: &[Message],
        _system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        match self.next_reply(&joined_prompt(messages)) {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Json(value) => Ok(value.to_string()),
            ScriptedReply::Fail(error) => Err(error),
        }
    }

    async fn query_json(
        &self,
        messages: &[Message],
        _system_prompt: Option<&str>,
    ) -> Result<Value, LlmError> {
        match self.next_reply(&joined_prompt(messages)) {
            ScriptedReply::Json(value) => Ok(value),
            ScriptedReply::Text(text) => serde_json::from_str(&text)
                .map_err(|e| LlmError::InvalidResponse(format!("not json: {e}"))),
            ScriptedReply::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replies_are_served_in_order() {
        let client = ScriptedClient::new(vec![
            ScriptedReply::Json(json!({"a": 1})),
            ScriptedReply::Fail(LlmError::Timeout("t".into())),
        ]);

        let first = client.query_json(&[Message::user("q1")], None).await.unwrap();
        assert_eq!(first["a"], 1);
        assert!(client.query_json(&[Message::user("q2")], None).await.is_err());
        assert_eq!(client.prompt_count(), 2);
    }

    #[tokio::test]
    async fn fallback_answers_forever() {
        let client = ScriptedClient::always(ScriptedReply::Json(json!({"ok": true})));
        for _ in 0..5 {
            let value = client.query_json(&[Message::user("q")], None).await.unwrap();
            assert_eq!(value["ok"], true);
        }
    }
}
