//! Scout subsystem: two read-only LLM-backed analysts behind a pull-based
//! coordinator. Scout A maps the codebase, Scout B covers build and test
//! infrastructure.

pub mod coordinator;
pub mod llm;
pub mod retry;
pub mod scout_a;
pub mod scout_b;
pub mod testing;

pub use coordinator::{CoordinatorError, InfrastructureError, ScoutCoordinator, ScoutResults};
pub use llm::{LlmClient, LlmError, Message, RetryExhausted, Role};
pub use retry::RetryPolicy;
pub use scout_a::{ScoutA, ScoutAResponse};
pub use scout_b::{ScoutB, ScoutBResponse};

use thiserror::Error;

/// Failure of a single scout query, before coordinator classification.
#[derive(Debug, Error)]
pub enum ScoutError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    RetryExhausted(#[from] RetryExhausted),
}
