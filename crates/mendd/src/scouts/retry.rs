//! Retry with exponential backoff for scout queries.
//!
//! At most three attempts with delays of 1 s, 2 s, 4 s (capped at 10 s).
//! Only transient errors are retried; permanent ones surface immediately.

use crate::scouts::llm::{LlmError, RetryExhausted};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Backoff policy for scout queries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-indexed): 1s, 2s, 4s.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Failure mode of a retried operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetryError {
    /// All attempts were spent on transient failures.
    #[error(transparent)]
    Exhausted(#[from] RetryExhausted),
    /// A permanent failure surfaced; no further attempts were made.
    #[error(transparent)]
    Permanent(LlmError),
}

/// Run an operation under the policy.
pub async fn run_with_retry<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_error: Option<LlmError> = None;

    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() {
                    return Err(RetryError::Permanent(error));
                }

                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "scout query attempt failed"
                );
                last_error = Some(error);

                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    Err(RetryError::Exhausted(RetryExhausted {
        attempts: policy.max_attempts,
        last_error: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string()),
    }))
}
