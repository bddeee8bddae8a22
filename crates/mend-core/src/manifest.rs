//! Per-run manifest: the durable record of a verification attempt.
//!
//! The manifest is written exactly once per run, after all executed steps
//! and before the container is destroyed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

pub const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid manifest json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// One executed verification command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub name: String,
    pub command: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Host platform plus the container image the steps ran in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
    pub container_image: String,
}

impl PlatformInfo {
    pub fn current(container_image: impl Into<String>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            container_image: container_image.into(),
        }
    }
}

/// The per-run manifest, serialized as `manifest.json` in the run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    /// ISO-8601 UTC with `Z` suffix.
    pub timestamp_start: String,
    pub timestamp_end: String,
    /// Commit under verification, or the literal `"unknown"`.
    pub commit_sha: String,
    /// Terminal status: `PASS` or `FAIL`. Infra-error runs may omit a manifest.
    pub status: String,
    /// Executed commands, in execution order (≤ configured steps).
    pub commands_executed: Vec<CommandRecord>,
    pub platform: PlatformInfo,
}

/// Current UTC timestamp formatted as ISO-8601 with a `Z` suffix.
pub fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Resolve the commit sha of the repository at `repo_path`.
///
/// Falls back to the literal `"unknown"` when git is absent, the path is
/// not a repository, or the command fails.
pub fn current_commit_sha(repo_path: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_path)
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if sha.is_empty() {
                "unknown".to_string()
            } else {
                sha
            }
        }
        _ => "unknown".to_string(),
    }
}

/// Write the manifest to `<run_dir>/manifest.json`.
pub fn write_manifest(run_dir: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let path = run_dir.join(MANIFEST_FILENAME);
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Read a manifest back from `manifest.json`.
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
