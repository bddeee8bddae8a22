//! A single wrapping error for callers that only need "something went
//! wrong". Components keep their own focused error enums; this type folds
//! them into one.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    TaskParse(#[from] crate::task::TaskParseError),
    #[error(transparent)]
    TaskState(#[from] crate::types::TaskStateError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Boundary(#[from] crate::boundaries::BoundaryError),
    #[error(transparent)]
    Artifact(#[from] crate::artifacts::ArtifactError),
    #[error(transparent)]
    Manifest(#[from] crate::manifest::ManifestError),
    #[error(transparent)]
    Context(#[from] crate::context::ContextError),
    #[error(transparent)]
    Output(#[from] crate::outputs::OutputError),
}
