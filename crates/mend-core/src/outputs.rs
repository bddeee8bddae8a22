//! Terminal-output generators: success summaries and stuck reports.

use crate::debug_loop::DebugLoopState;
use crate::manifest::utc_timestamp;
use crate::task::ParsedTask;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STUCK_REPORT_FILENAME: &str = "stuck_report.md";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OutputError>;

/// Summary emitted when a task completes successfully.
#[derive(Debug, Clone)]
pub struct SuccessSummary {
    pub task_description: String,
    pub what_changed: String,
    pub why: String,
    pub how_verified: String,
    pub run_id: String,
    pub files_modified: Vec<String>,
}

impl SuccessSummary {
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Task Completion Summary".to_string(),
            String::new(),
            format!("**Completed:** {}", utc_timestamp()),
            String::new(),
            "## Task".to_string(),
            self.task_description.clone(),
            String::new(),
            "## What Changed".to_string(),
            self.what_changed.clone(),
            String::new(),
            "## Why".to_string(),
            self.why.clone(),
            String::new(),
            "## How Verified".to_string(),
            self.how_verified.clone(),
            String::new(),
            format!("**Verification Run ID:** `{}`", self.run_id),
            String::new(),
        ];

        if !self.files_modified.is_empty() {
            lines.push("## Files Modified".to_string());
            for file in &self.files_modified {
                lines.push(format!("- `{file}`"));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

/// Build a success summary for a completed task.
pub fn generate_success_summary(
    task: &ParsedTask,
    what_changed: impl Into<String>,
    run_id: impl Into<String>,
    files_modified: Vec<String>,
) -> SuccessSummary {
    let run_id = run_id.into();
    SuccessSummary {
        task_description: task.raw_description.clone(),
        what_changed: what_changed.into(),
        why: task.main_objective.clone(),
        how_verified: format!("Verification passed with run_id: {run_id}"),
        run_id,
        files_modified,
    }
}

/// A hypothesis about why the task is stuck.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub title: String,
    pub description: String,
    pub suggested_investigation: String,
}

/// One row of the verification-history table.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub run_id: String,
    pub passed: bool,
    pub failure_summary: String,
}

/// Report emitted on hard stop or infrastructure failure.
#[derive(Debug, Clone)]
pub struct StuckReport {
    pub task_description: String,
    pub constraints: Vec<String>,
    pub status: String,
    pub hypotheses: Vec<Hypothesis>,
    pub verification_history: Vec<HistoryEntry>,
    pub artifact_references: Vec<String>,
    pub files_modified: Vec<String>,
    pub is_infra_error: bool,
    pub infra_error_source: String,
    pub infra_error_message: String,
}

impl StuckReport {
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Stuck Report".to_string(),
            String::new(),
            format!("**Generated:** {}", utc_timestamp()),
            String::new(),
            "## Task".to_string(),
            self.task_description.clone(),
            String::new(),
        ];

        if !self.constraints.is_empty() {
            lines.push("## Constraints".to_string());
            for constraint in &self.constraints {
                lines.push(format!("- {constraint}"));
            }
            lines.push(String::new());
        }

        lines.push("## Status".to_string());
        lines.push(self.status.clone());
        lines.push(String::new());

        if self.is_infra_error {
            lines.extend([
                "## Infrastructure Error".to_string(),
                format!("**Source:** {}", self.infra_error_source),
                format!("**Error:** {}", self.infra_error_message),
                String::new(),
                "This is an infrastructure issue, not a code problem.".to_string(),
                "Possible resolutions:".to_string(),
                "- Check if Docker is running (for Verifier errors)".to_string(),
                "- Check API keys and network connectivity (for Scout errors)".to_string(),
                "- Review system resources (memory, disk space)".to_string(),
                String::new(),
            ]);
        }

        if !self.hypotheses.is_empty() {
            lines.push("## Hypotheses".to_string());
            lines.push(String::new());
            for (i, hypothesis) in self.hypotheses.iter().enumerate() {
                lines.push(format!("### {}. {}", i + 1, hypothesis.title));
                lines.push(hypothesis.description.clone());
                if !hypothesis.suggested_investigation.is_empty() {
                    lines.push(String::new());
                    lines.push(format!(
                        "*Suggested investigation:* {}",
                        hypothesis.suggested_investigation
                    ));
                }
                lines.push(String::new());
            }
        }

        if !self.verification_history.is_empty() {
            lines.push("## Verification History".to_string());
            lines.push(String::new());
            lines.push("| Run | Status | Primary Failure |".to_string());
            lines.push("|-----|--------|-----------------|".to_string());
            for entry in &self.verification_history {
                let short_id = entry
                    .run_id
                    .rsplit('_')
                    .next()
                    .unwrap_or(&entry.run_id);
                let status = if entry.passed { "PASS" } else { "FAIL" };
                let failure: String = entry.failure_summary.chars().take(40).collect();
                let failure = if failure.is_empty() {
                    "-".to_string()
                } else {
                    failure
                };
                lines.push(format!("| {short_id} | {status} | {failure} |"));
            }
            lines.push(String::new());
        }

        if !self.artifact_references.is_empty() {
            lines.push("## Artifact References".to_string());
            lines.push(String::new());
            for reference in &self.artifact_references {
                lines.push(format!("- `{reference}`"));
            }
            lines.push(String::new());
        }

        if !self.files_modified.is_empty() {
            lines.push("## Files Modified".to_string());
            lines.push(String::new());
            for file in &self.files_modified {
                lines.push(format!("- `{file}`"));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

/// Generate stuck-report hypotheses from the failure history.
///
/// Autonomous lexical scan over the recorded failure summaries; the
/// Scouts are never consulted for this.
pub fn generate_hypotheses(loop_state: &DebugLoopState, files_modified: &[String]) -> Vec<Hypothesis> {
    let mut hypotheses = Vec::new();

    let summaries: Vec<String> = loop_state
        .attempts
        .iter()
        .filter(|a| !a.passed && !a.failure_summary.is_empty())
        .map(|a| a.failure_summary.to_lowercase())
        .collect();

    let any_contains =
        |keywords: &[&str]| summaries.iter().any(|s| keywords.iter().any(|k| s.contains(k)));

    if any_contains(&["import", "module"]) {
        hypotheses.push(Hypothesis {
            title: "Import or Module Resolution Issue".to_string(),
            description: "Multiple failures mention import or module errors. The changes may \
                          have broken import paths or created circular dependencies."
                .to_string(),
            suggested_investigation: "Review the import statements in modified files and check \
                                      for circular import issues."
                .to_string(),
        });
    }

    if any_contains(&["type", "typescript"]) {
        hypotheses.push(Hypothesis {
            title: "Type System Incompatibility".to_string(),
            description: "Type errors persist across attempts. The changes may require \
                          updating type definitions or there's a fundamental type mismatch \
                          in the approach."
                .to_string(),
            suggested_investigation: "Check if the modified code follows the existing type \
                                      conventions and update type definitions as needed."
                .to_string(),
        });
    }

    if any_contains(&["timeout"]) {
        hypotheses.push(Hypothesis {
            title: "Test Timeout Issue".to_string(),
            description: "Tests are timing out consistently. This could indicate an infinite \
                          loop, blocking operation, or the test infrastructure needs \
                          adjustment."
                .to_string(),
            suggested_investigation: "Review any loops or async operations in the modified \
                                      code. Consider if the test timeout values need to be \
                                      increased."
                .to_string(),
        });
    }

    if any_contains(&["permission", "access"]) {
        hypotheses.push(Hypothesis {
            title: "Permission or Access Issue".to_string(),
            description: "Failures mention permission or access problems. The code may be \
                          trying to access resources it shouldn't or environment permissions \
                          are misconfigured."
                .to_string(),
            suggested_investigation: "Verify the code doesn't access files outside the \
                                      expected directories and check test environment \
                                      permissions."
                .to_string(),
        });
    }

    if loop_state.replan_count >= 2 {
        hypotheses.push(Hypothesis {
            title: "Fundamental Approach May Be Wrong".to_string(),
            description: format!(
                "After {} strategy changes, the task still fails. The problem may require a \
                 fundamentally different approach or additional context.",
                loop_state.replan_count
            ),
            suggested_investigation: "Consider if there are undocumented constraints or if \
                                      the task description needs clarification."
                .to_string(),
        });
    }

    if files_modified.len() > 5 {
        hypotheses.push(Hypothesis {
            title: "Change Scope Too Large".to_string(),
            description: format!(
                "Modified {} files which may be causing cascading issues. Consider breaking \
                 the task into smaller incremental changes.",
                files_modified.len()
            ),
            suggested_investigation: "Try implementing changes file by file with \
                                      verification after each change."
                .to_string(),
        });
    }

    if hypotheses.is_empty() {
        hypotheses.push(Hypothesis {
            title: "Undiagnosed Issue".to_string(),
            description: "The failure pattern doesn't match common categories. Manual \
                          investigation of the verification logs is recommended."
                .to_string(),
            suggested_investigation: "Review the combined.log files in the artifact \
                                      directories for detailed error information."
                .to_string(),
        });
    }

    hypotheses
}

/// Build a stuck report for a hard stop or infrastructure failure.
pub fn generate_stuck_report(
    task: &ParsedTask,
    loop_state: &DebugLoopState,
    files_modified: Vec<String>,
    infra_error: Option<(String, String)>,
) -> StuckReport {
    let (is_infra_error, infra_error_source, infra_error_message) = match infra_error {
        Some((source, message)) => (true, source, message),
        None => (false, String::new(), String::new()),
    };

    let status = if is_infra_error {
        format!("Infrastructure failure from {infra_error_source}")
    } else {
        format!(
            "Hard stop reached after {} verification attempts.",
            loop_state.total_verify_loops
        )
    };

    let mut constraints = Vec::new();
    constraints.extend(task.constraints.must_preserve.iter().cloned());
    constraints.extend(
        task.constraints
            .non_goals
            .iter()
            .map(|ng| format!("Non-goal: {ng}")),
    );
    constraints.extend(
        task.constraints
            .boundaries
            .iter()
            .map(|b| format!("Boundary: {b}")),
    );

    let hypotheses = generate_hypotheses(loop_state, &files_modified);

    let verification_history = loop_state
        .attempts
        .iter()
        .map(|a| HistoryEntry {
            run_id: a.run_id.clone(),
            passed: a.passed,
            failure_summary: a.failure_summary.clone(),
        })
        .collect();

    StuckReport {
        task_description: task.raw_description.clone(),
        constraints,
        status,
        hypotheses,
        verification_history,
        artifact_references: loop_state.all_run_ids(),
        files_modified,
        is_infra_error,
        infra_error_source,
        infra_error_message,
    }
}

/// Write the stuck report, overwriting any prior one.
pub fn write_stuck_report(agent_dir: &Path, report: &StuckReport) -> Result<PathBuf> {
    fs::create_dir_all(agent_dir)?;
    let path = agent_dir.join(STUCK_REPORT_FILENAME);
    fs::write(&path, report.to_markdown())?;
    Ok(path)
}

/// Read an existing stuck report, if any.
pub fn read_stuck_report(agent_dir: &Path) -> Option<String> {
    fs::read_to_string(agent_dir.join(STUCK_REPORT_FILENAME)).ok()
}

pub fn has_stuck_report(agent_dir: &Path) -> bool {
    agent_dir.join(STUCK_REPORT_FILENAME).is_file()
}

/// Remove the stuck report; a later successful task clears the slate.
pub fn clear_stuck_report(agent_dir: &Path) -> Result<bool> {
    let path = agent_dir.join(STUCK_REPORT_FILENAME);
    if path.is_file() {
        fs::remove_file(&path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
