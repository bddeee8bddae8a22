//! Change-application seam.
//!
//! The core never generates code itself; a collaborator proposes concrete
//! file contents and the runner writes them through the boundary enforcer.

use async_trait::async_trait;
use mend_core::ParsedTask;
use thiserror::Error;

use crate::scouts::ScoutResults;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("change engine failed: {0}")]
    Failed(String),
}

/// One intended write: repository-relative path plus full new contents.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub path: String,
    pub contents: String,
}

/// Collaborator that turns analysis into concrete file changes.
///
/// `attempt` is 1-based and increments across the fix-forward loop, so an
/// engine can refine its changes using the current hypothesis.
#[async_trait]
pub trait ChangeEngine: Send + Sync {
    async fn propose_changes(
        &self,
        task: &ParsedTask,
        scout_results: Option<&ScoutResults>,
        hypothesis: &str,
        attempt: u32,
    ) -> Result<Vec<ChangeRequest>, EngineError>;
}

/// Engine that proposes nothing. Used when the surrounding system applies
/// changes out of band and only the verification loop is wanted.
#[derive(Debug, Default)]
pub struct NoopEngine;

#[async_trait]
impl ChangeEngine for NoopEngine {
    async fn propose_changes(
        &self,
        _task: &ParsedTask,
        _scout_results: Option<&ScoutResults>,
        _hypothesis: &str,
        _attempt: u32,
    ) -> Result<Vec<ChangeRequest>, EngineError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_core::task::parse_task;

    #[tokio::test]
    async fn noop_engine_proposes_nothing() {
        let task = parse_task("Fix the bug").unwrap();
        let changes = NoopEngine
            .propose_changes(&task, None, "", 1)
            .await
            .unwrap();
        assert!(changes.is_empty());
    }
}
