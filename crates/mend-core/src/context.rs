//! Context snapshot recorder.
//!
//! Numbered markdown snapshots (`context_NNN.md`) plus a
//! `context_latest.md` pointer, written under the agent directory at
//! exactly three milestones: task start, REPLAN, and task success.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

pub const CONTEXT_LATEST_NAME: &str = "context_latest.md";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to write context snapshot: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContextError>;

/// Milestones that trigger context snapshots.
///
/// Scout queries, verify attempts, and fix iterations do NOT create
/// snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    TaskStart,
    Replan,
    TaskSuccess,
}

impl Milestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStart => "TASK_START",
            Self::Replan => "REPLAN",
            Self::TaskSuccess => "TASK_SUCCESS",
        }
    }
}

/// Check whether an event name should trigger a snapshot.
///
/// Only the three milestone names qualify; everything else observable
/// (scout query, verify attempt, fix iteration) must not.
pub fn should_create_snapshot(event: &str) -> bool {
    matches!(event, "TASK_START" | "REPLAN" | "TASK_SUCCESS")
}

/// Editor state block included in each snapshot.
#[derive(Debug, Clone, Default)]
pub struct EditorState {
    pub hypothesis: String,
    pub files_modified: Vec<String>,
    pub verify_attempts: u32,
    pub consecutive_failures: u32,
    pub total_verify_loops: u32,
}

/// A rendered context snapshot.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub snapshot_number: u32,
    /// ISO-8601 UTC with `Z` suffix.
    pub timestamp: String,
    pub milestone: Milestone,
    pub scout_a_payload: Option<Value>,
    pub scout_b_payload: Option<Value>,
    pub editor_state: Option<EditorState>,
}

fn snapshot_filename(number: u32) -> String {
    format!("context_{number:03}.md")
}

/// Parse `context_NNN.md` into its number.
fn parse_snapshot_number(filename: &str) -> Option<u32> {
    let rest = filename.strip_prefix("context_")?.strip_suffix(".md")?;
    if rest.len() != 3 || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Next snapshot number: `max(existing) + 1`, starting at 1.
pub fn next_snapshot_number(agent_dir: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(agent_dir) else {
        return 1;
    };
    let max = entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| parse_snapshot_number(&e.file_name().to_string_lossy()))
        .max()
        .unwrap_or(0);
    max + 1
}

/// Count the snapshot files in the agent directory.
pub fn snapshot_count(agent_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(agent_dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter(|e| parse_snapshot_number(&e.file_name().to_string_lossy()).is_some())
        .count()
}

fn format_payload(payload: Option<&Value>) -> String {
    match payload {
        Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| "(empty)".to_string()),
        None => "(empty)".to_string(),
    }
}

fn render_snapshot(snapshot: &ContextSnapshot) -> String {
    let mut lines = vec![
        format!("# Context Snapshot {:03}", snapshot.snapshot_number),
        String::new(),
        "## Timestamp".to_string(),
        snapshot.timestamp.clone(),
        String::new(),
        "## Milestone".to_string(),
        snapshot.milestone.as_str().to_string(),
        String::new(),
        "## Scout A Report".to_string(),
        "```json".to_string(),
        format_payload(snapshot.scout_a_payload.as_ref()),
        "```".to_string(),
        String::new(),
        "## Scout B Report".to_string(),
        "```json".to_string(),
        format_payload(snapshot.scout_b_payload.as_ref()),
        "```".to_string(),
        String::new(),
    ];

    if let Some(state) = &snapshot.editor_state {
        let hypothesis = if state.hypothesis.is_empty() {
            "(none)"
        } else {
            &state.hypothesis
        };
        let files = if state.files_modified.is_empty() {
            "(none)".to_string()
        } else {
            state.files_modified.join(", ")
        };
        lines.extend([
            "## Editor State".to_string(),
            format!("- Current hypothesis: {hypothesis}"),
            format!("- Files modified: {files}"),
            format!("- Verify attempts: {}", state.verify_attempts),
            format!("- Consecutive failures: {}", state.consecutive_failures),
            format!("- Total verify loops: {}", state.total_verify_loops),
            String::new(),
        ]);
    }

    lines.join("\n")
}

/// Write a numbered snapshot and update the `context_latest.md` pointer.
pub fn write_context_snapshot(
    agent_dir: &Path,
    milestone: Milestone,
    scout_a_payload: Option<Value>,
    scout_b_payload: Option<Value>,
    editor_state: Option<EditorState>,
) -> Result<PathBuf> {
    fs::create_dir_all(agent_dir)?;

    let snapshot = ContextSnapshot {
        snapshot_number: next_snapshot_number(agent_dir),
        timestamp: crate::manifest::utc_timestamp(),
        milestone,
        scout_a_payload,
        scout_b_payload,
        editor_state,
    };

    let filename = snapshot_filename(snapshot.snapshot_number);
    let path = agent_dir.join(&filename);
    fs::write(&path, render_snapshot(&snapshot))?;

    update_latest_pointer(agent_dir, &filename);
    Ok(path)
}

/// Point `context_latest.md` at the newest snapshot.
///
/// Prefers a symlink; falls back to copying the content where symlinks
/// are unavailable. Pointer update failures are logged, never fatal.
fn update_latest_pointer(agent_dir: &Path, target_filename: &str) {
    let link = agent_dir.join(CONTEXT_LATEST_NAME);

    if link.symlink_metadata().is_ok() {
        let _ = fs::remove_file(&link);
    }

    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(target_filename, &link).is_ok() {
            return;
        }
    }

    // Copy fallback.
    let target = agent_dir.join(target_filename);
    if let Err(e) = fs::copy(&target, &link) {
        warn!(error = %e, "failed to update context_latest pointer");
    }
}

/// Resolve the latest snapshot path, following the pointer if present.
pub fn latest_snapshot_path(agent_dir: &Path) -> Option<PathBuf> {
    let link = agent_dir.join(CONTEXT_LATEST_NAME);
    if let Ok(resolved) = fs::canonicalize(&link) {
        if resolved.exists() {
            return Some(resolved);
        }
    }
    if link.is_file() {
        return Some(link);
    }

    // Fall back to the highest numbered snapshot.
    let number = next_snapshot_number(agent_dir).checked_sub(1)?;
    if number == 0 {
        return None;
    }
    Some(agent_dir.join(snapshot_filename(number)))
}
