//! On-disk artifact store for verification runs.
//!
//! Layout under the artifact root:
//!
//! ```text
//! <root>/runs/<run_id>/manifest.json
//! <root>/runs/<run_id>/logs/combined.log
//! <root>/runs/<run_id>/logs/step-NN-<name>.log
//! <root>/runs/<run_id>/tmp/    <root>/runs/<run_id>/db/
//! <root>/cache/
//! ```
//!
//! A run directory is created before the container starts and is never
//! moved. Nothing mutates a run after its manifest is sealed.

use crate::ids::{generate_run_id, is_valid_run_id, parse_run_id_timestamp};
use crate::manifest::MANIFEST_FILENAME;
use crate::outputs::STUCK_REPORT_FILENAME;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of tail lines extracted from a combined log.
pub const DEFAULT_TAIL_LINES: usize = 200;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

pub fn runs_dir(artifact_root: &Path) -> PathBuf {
    artifact_root.join("runs")
}

pub fn cache_dir(artifact_root: &Path) -> PathBuf {
    artifact_root.join("cache")
}

pub fn run_dir(artifact_root: &Path, run_id: &str) -> PathBuf {
    runs_dir(artifact_root).join(run_id)
}

pub fn logs_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("logs")
}

pub fn tmp_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("tmp")
}

pub fn db_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("db")
}

pub fn combined_log_path(run_dir: &Path) -> PathBuf {
    logs_dir(run_dir).join("combined.log")
}

/// Create `runs/` and `cache/` under the artifact root.
pub fn ensure_artifact_root(artifact_root: &Path) -> Result<()> {
    fs::create_dir_all(runs_dir(artifact_root))?;
    fs::create_dir_all(cache_dir(artifact_root))?;
    Ok(())
}

/// Allocate a fresh run id and create its directory tree
/// (`logs/`, `tmp/`, `db/`).
pub fn create_run_dir(artifact_root: &Path) -> Result<(String, PathBuf)> {
    ensure_artifact_root(artifact_root)?;

    let run_id = generate_run_id();
    let dir = run_dir(artifact_root, &run_id);
    fs::create_dir_all(logs_dir(&dir))?;
    fs::create_dir_all(tmp_dir(&dir))?;
    fs::create_dir_all(db_dir(&dir))?;

    debug!(run_id = %run_id, dir = %dir.display(), "allocated run directory");
    Ok((run_id, dir))
}

/// Extract the last `max_lines` lines of a log file as a single string.
///
/// Missing or empty files yield an empty string rather than an error.
pub fn extract_tail_log(log_path: &Path, max_lines: usize) -> String {
    let Ok(content) = fs::read_to_string(log_path) else {
        return String::new();
    };
    if content.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// List every file under the run directory, sorted by path.
pub fn list_artifact_paths(run_dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    collect_files(run_dir, &mut paths);
    paths.sort();
    paths
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

/// Retention pass over committed runs.
///
/// A run participates in retention only when its directory name satisfies
/// the run-id grammar and it contains a `manifest.json`. Runs older than
/// `max_age_days` are deleted, then the oldest excess beyond `max_runs`.
/// Runs containing a `stuck_report.md` are never deleted. Returns the
/// number of runs deleted; calling again with the same arguments is a
/// no-op.
pub fn cleanup(
    artifact_root: &Path,
    max_runs: usize,
    max_age_days: i64,
    now: DateTime<Utc>,
) -> Result<usize> {
    let runs_root = runs_dir(artifact_root);
    if !runs_root.is_dir() {
        return Ok(0);
    }

    // (timestamp, run_id, path) for every committed run.
    let mut runs: Vec<(DateTime<Utc>, String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&runs_root)?.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_valid_run_id(name) || !path.join(MANIFEST_FILENAME).is_file() {
            continue;
        }
        if let Some(timestamp) = parse_run_id_timestamp(name) {
            runs.push((timestamp, name.to_string(), path));
        }
    }
    runs.sort();

    let cutoff = now - Duration::days(max_age_days);
    let mut marked: Vec<usize> = Vec::new();

    for (i, (timestamp, _, _)) in runs.iter().enumerate() {
        if *timestamp < cutoff {
            marked.push(i);
        }
    }

    let remaining = runs.len() - marked.len();
    if remaining > max_runs {
        let mut excess = remaining - max_runs;
        for i in 0..runs.len() {
            if excess == 0 {
                break;
            }
            if !marked.contains(&i) {
                marked.push(i);
                excess -= 1;
            }
        }
    }

    let mut deleted = 0;
    for i in marked {
        let (_, run_id, path) = &runs[i];
        if path.join(STUCK_REPORT_FILENAME).is_file() {
            debug!(run_id = %run_id, "retention skipping run with stuck report");
            continue;
        }
        match fs::remove_dir_all(path) {
            Ok(()) => {
                debug!(run_id = %run_id, "retention deleted run");
                deleted += 1;
            }
            Err(e) => warn!(run_id = %run_id, error = %e, "retention failed to delete run"),
        }
    }

    Ok(deleted)
}
