//! Core library for the autonomous code-modification agent: data model,
//! configuration, task parsing, debug-loop policy, artifact store, context
//! snapshots, output generation, and write-boundary enforcement.

pub mod artifacts;
pub mod boundaries;
pub mod config;
pub mod context;
pub mod debug_loop;
pub mod error;
pub mod ids;
pub mod manifest;
pub mod outputs;
pub mod task;
pub mod types;
pub mod validation;

pub use boundaries::WriteBoundaryEnforcer;
pub use config::{AgentConfig, EnvConfig, VerificationStep};
pub use debug_loop::{DebugLoop, DebugLoopState, LoopAction, VerifyAttempt};
pub use error::CoreError;
pub use manifest::{CommandRecord, Manifest, PlatformInfo};
pub use outputs::{StuckReport, SuccessSummary};
pub use task::{ParsedTask, SuccessCriteria, TaskConstraints};
pub use types::{InfraErrorType, Task, TaskState, VerifierResponse, VerifierStatus};
