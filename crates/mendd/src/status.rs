//! Milestone emission toward a passive status collaborator.
//!
//! The runner emits a closed set of lifecycle milestones; how they are
//! rendered (terminal spinner, JSON stream, nothing) is the receiver's
//! concern.

use tracing::info;

/// Lifecycle milestones emitted by the task runner (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMilestone {
    TaskStarted,
    AnalyzingCodebase,
    QueryingScoutA,
    QueryingScoutB,
    AnalysisComplete,
    ImplementingChanges,
    ChangesApplied,
    RunningVerification,
    VerificationPassed,
    VerificationFailed,
    Replanning,
    TaskSuccess,
    TaskStuck,
    TaskCancelled,
    TaskInfraError,
}

impl TaskMilestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStarted => "TASK_STARTED",
            Self::AnalyzingCodebase => "ANALYZING_CODEBASE",
            Self::QueryingScoutA => "QUERYING_SCOUT_A",
            Self::QueryingScoutB => "QUERYING_SCOUT_B",
            Self::AnalysisComplete => "ANALYSIS_COMPLETE",
            Self::ImplementingChanges => "IMPLEMENTING_CHANGES",
            Self::ChangesApplied => "CHANGES_APPLIED",
            Self::RunningVerification => "RUNNING_VERIFICATION",
            Self::VerificationPassed => "VERIFICATION_PASSED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::Replanning => "REPLANNING",
            Self::TaskSuccess => "TASK_SUCCESS",
            Self::TaskStuck => "TASK_STUCK",
            Self::TaskCancelled => "TASK_CANCELLED",
            Self::TaskInfraError => "TASK_INFRA_ERROR",
        }
    }
}

/// Passive receiver of milestone events.
pub trait StatusSink: Send + Sync {
    fn emit(&self, milestone: TaskMilestone, detail: Option<&str>);
}

/// Default sink: structured log lines.
#[derive(Debug, Default)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn emit(&self, milestone: TaskMilestone, detail: Option<&str>) {
        match detail {
            Some(detail) => info!(milestone = milestone.as_str(), detail, "milestone"),
            None => info!(milestone = milestone.as_str(), "milestone"),
        }
    }
}

/// Test sink that records every emission.
#[derive(Debug, Default)]
pub struct RecordingStatus {
    events: std::sync::Mutex<Vec<(TaskMilestone, Option<String>)>>,
}

impl RecordingStatus {
    pub fn events(&self) -> Vec<(TaskMilestone, Option<String>)> {
        self.events.lock().unwrap().clone()
    }

    pub fn milestones(&self) -> Vec<TaskMilestone> {
        self.events().into_iter().map(|(m, _)| m).collect()
    }
}

impl StatusSink for RecordingStatus {
    fn emit(&self, milestone: TaskMilestone, detail: Option<&str>) {
        self.events
            .lock()
            .unwrap()
            .push((milestone, detail.map(str::to_string)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_names_are_screaming_snake() {
        assert_eq!(TaskMilestone::TaskStarted.as_str(), "TASK_STARTED");
        assert_eq!(TaskMilestone::QueryingScoutA.as_str(), "QUERYING_SCOUT_A");
        assert_eq!(TaskMilestone::TaskInfraError.as_str(), "TASK_INFRA_ERROR");
    }

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingStatus::default();
        sink.emit(TaskMilestone::TaskStarted, None);
        sink.emit(TaskMilestone::RunningVerification, Some("attempt 1"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, TaskMilestone::TaskStarted);
        assert_eq!(events[1].1.as_deref(), Some("attempt 1"));
    }
}
