//! Task parsing and interpretation.
//!
//! Turns a free-form natural-language task description into a structured
//! record: main objective, immutable constraints, and derived success
//! criteria. Pure string transformation, no I/O.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskParseError {
    #[error("task description cannot be empty")]
    EmptyDescription,
}

/// Constraints extracted from the task description.
///
/// Immutable for the task's lifetime; no REPLAN may weaken them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConstraints {
    pub must_preserve: Vec<String>,
    pub non_goals: Vec<String>,
    pub boundaries: Vec<String>,
}

impl TaskConstraints {
    pub fn is_empty(&self) -> bool {
        self.must_preserve.is_empty() && self.non_goals.is_empty() && self.boundaries.is_empty()
    }
}

/// Success criteria derived from the objective and constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuccessCriteria {
    pub acceptance_criteria: Vec<String>,
    pub expected_behavior_changes: Vec<String>,
    pub verification_hints: Vec<String>,
}

/// A parsed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedTask {
    pub raw_description: String,
    pub main_objective: String,
    pub constraints: TaskConstraints,
    pub success_criteria: SuccessCriteria,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Constraints,
    NonGoals,
    Boundaries,
}

/// Match a labelled section header at the start of a line.
///
/// Headers are case-insensitive and must end in a colon, e.g.
/// `Constraints:`, `Must preserve:`, `Out of scope:`.
fn match_section_header(line: &str) -> Option<Section> {
    let trimmed = line.trim();
    let head = trimmed.strip_suffix(':')?.trim().to_lowercase();

    const CONSTRAINT_HEADERS: [&str; 5] = [
        "constraints",
        "constraint",
        "must preserve",
        "requirements",
        "requirement",
    ];
    const NON_GOAL_HEADERS: [&str; 6] = [
        "non-goals",
        "non-goal",
        "non goals",
        "don't",
        "do not",
        "avoid",
    ];
    const BOUNDARY_HEADERS: [&str; 5] = [
        "boundaries",
        "boundary",
        "out of scope",
        "scope limits",
        "scope limit",
    ];

    if CONSTRAINT_HEADERS.contains(&head.as_str()) {
        Some(Section::Constraints)
    } else if NON_GOAL_HEADERS.contains(&head.as_str()) {
        Some(Section::NonGoals)
    } else if BOUNDARY_HEADERS.contains(&head.as_str()) {
        Some(Section::Boundaries)
    } else {
        None
    }
}

fn bullet_item(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let item = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))?;
    let item = item.trim();
    if item.is_empty() {
        None
    } else {
        Some(item)
    }
}

/// Extract constraint sections and the remaining objective text.
fn split_sections(description: &str) -> (TaskConstraints, String) {
    let mut constraints = TaskConstraints::default();
    let mut objective_lines: Vec<&str> = Vec::new();

    let lines: Vec<&str> = description.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(section) = match_section_header(line) {
            // Consume the bullet list that follows the header.
            let mut items = Vec::new();
            let mut j = i + 1;
            while j < lines.len() {
                match bullet_item(lines[j]) {
                    Some(item) => {
                        items.push(item.to_string());
                        j += 1;
                    }
                    None => break,
                }
            }

            if items.is_empty() {
                // Header without bullets is ordinary text.
                objective_lines.push(line);
                i += 1;
                continue;
            }

            match section {
                Section::Constraints => constraints.must_preserve.extend(items),
                Section::NonGoals => constraints.non_goals.extend(items),
                Section::Boundaries => constraints.boundaries.extend(items),
            }
            i = j;
        } else {
            objective_lines.push(line);
            i += 1;
        }
    }

    // Whitespace-collapse the remaining text.
    let objective = objective_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    (constraints, objective)
}

/// Derive success criteria from the objective and constraints.
fn derive_success_criteria(main_objective: &str, constraints: &TaskConstraints) -> SuccessCriteria {
    let mut criteria = SuccessCriteria::default();

    if !main_objective.is_empty() {
        criteria.acceptance_criteria.push(main_objective.to_string());
    }
    for constraint in &constraints.must_preserve {
        criteria
            .acceptance_criteria
            .push(format!("Preserved: {constraint}"));
    }

    let lower = main_objective.to_lowercase();

    if lower.contains("fix") || lower.contains("bug") {
        criteria
            .verification_hints
            .push("Verify the bug is fixed by test".to_string());
        criteria
            .expected_behavior_changes
            .push("Bug behavior corrected".to_string());
    }
    if lower.contains("add") || lower.contains("implement") {
        criteria
            .verification_hints
            .push("Verify new functionality works as expected".to_string());
        criteria
            .expected_behavior_changes
            .push("New feature added".to_string());
    }
    if lower.contains("refactor") {
        criteria
            .verification_hints
            .push("Verify behavior unchanged after refactor".to_string());
        criteria
            .expected_behavior_changes
            .push("Code structure improved".to_string());
    }
    if lower.contains("test") {
        criteria.verification_hints.push("Verify tests pass".to_string());
        criteria
            .expected_behavior_changes
            .push("Test coverage improved".to_string());
    }
    if lower.contains("update") || lower.contains("change") {
        criteria
            .verification_hints
            .push("Verify update applied correctly".to_string());
        criteria
            .expected_behavior_changes
            .push("Existing behavior modified".to_string());
    }

    if criteria.verification_hints.is_empty() {
        criteria
            .verification_hints
            .push("Verify all tests pass after changes".to_string());
    }

    criteria
}

/// Parse a free-form task description.
pub fn parse_task(description: &str) -> Result<ParsedTask, TaskParseError> {
    let description = description.trim();
    if description.is_empty() {
        return Err(TaskParseError::EmptyDescription);
    }

    let (constraints, mut main_objective) = split_sections(description);

    if main_objective.is_empty() {
        // Everything was constraint sections; fall back to the first line.
        main_objective = description
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
    }

    let success_criteria = derive_success_criteria(&main_objective, &constraints);

    Ok(ParsedTask {
        raw_description: description.to_string(),
        main_objective,
        constraints,
        success_criteria,
    })
}

/// Validate a parsed task; returns warnings, never errors.
pub fn validate_task(task: &ParsedTask) -> Vec<String> {
    let mut warnings = Vec::new();
    if task.main_objective.len() < 10 {
        warnings.push("Task objective is very short - may need more detail".to_string());
    }
    if task.success_criteria.acceptance_criteria.is_empty() {
        warnings.push("No acceptance criteria derived - task may be ambiguous".to_string());
    }
    warnings
}
