//! LLM client seam.
//!
//! The actual backends (Anthropic, OpenAI, custom endpoints) live outside
//! this crate; the core consumes them through this narrow trait. Errors
//! carry a kind so the retry layer can tell transient from permanent.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Chat message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One chat message.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Classified LLM failure.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("llm query timed out: {0}")]
    Timeout(String),
    #[error("llm rate limited: {0}")]
    RateLimit(String),
    #[error("llm temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("response violated expected schema: {0}")]
    Schema(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Transient failures are retried; schema and invalid-response
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimit(_) | Self::Unavailable(_) | Self::Network(_)
        )
    }
}

/// Raised once the retry budget is spent.
#[derive(Debug, Clone, Error)]
#[error("scout query failed after {attempts} attempts: {last_error}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: String,
}

/// Narrow adapter interface over an LLM backend.
///
/// Implementations enforce their own per-query timeout (60 s default from
/// config) and surface failures through [`LlmError`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-text completion.
    async fn query(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError>;

    /// JSON-mode completion returning a parsed mapping.
    async fn query_json(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> Result<Value, LlmError>;
}
