//! Write-boundary enforcement.
//!
//! Every write the agent performs must land inside the repository root and
//! outside the artifact tree. Paths are validated in canonical form, so
//! `..` traversal and symlinks are resolved before the containment check.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_AGENT_DIR_NAME: &str = "agent";

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("write boundary violation: {path}: {reason}")]
    Violation { path: PathBuf, reason: &'static str },
    #[error("cannot resolve repository root {0}")]
    BadRoot(PathBuf),
    #[error("cannot resolve path {0}")]
    Unresolvable(PathBuf),
}

pub type Result<T> = std::result::Result<T, BoundaryError>;

pub const REASON_OUTSIDE_ROOT: &str = "outside repository root";
pub const REASON_INSIDE_ARTIFACTS: &str = "inside artifact directory";

/// Validates write paths against the repository root and the artifact tree.
#[derive(Debug, Clone)]
pub struct WriteBoundaryEnforcer {
    repo_root: PathBuf,
    artifact_dir: Option<PathBuf>,
    agent_dir_name: String,
}

impl WriteBoundaryEnforcer {
    /// Canonicalizes the repository root once at construction.
    pub fn new(repo_root: &Path, artifact_dir: Option<&Path>) -> Result<Self> {
        let repo_root = fs::canonicalize(repo_root)
            .map_err(|_| BoundaryError::BadRoot(repo_root.to_path_buf()))?;
        // The artifact root may not exist yet; resolve what does.
        let artifact_dir = artifact_dir
            .map(|dir| canonicalize_allow_missing(dir))
            .transpose()?;
        Ok(Self {
            repo_root,
            artifact_dir,
            agent_dir_name: DEFAULT_AGENT_DIR_NAME.to_string(),
        })
    }

    pub fn with_agent_dir_name(mut self, name: impl Into<String>) -> Self {
        self.agent_dir_name = name.into();
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Canonical path of the agent directory inside the repository.
    pub fn agent_dir(&self) -> PathBuf {
        self.repo_root.join(&self.agent_dir_name)
    }

    /// Validate a write path, returning its canonical absolute form.
    ///
    /// Relative inputs are joined onto the repository root. The canonical
    /// result must be a strict descendant of the root and must not lie
    /// inside the artifact directory.
    pub fn validate(&self, path: &Path) -> Result<PathBuf> {
        let absolute = if path.is_relative() {
            self.repo_root.join(path)
        } else {
            path.to_path_buf()
        };

        let canonical = canonicalize_allow_missing(&absolute)?;

        if !canonical.starts_with(&self.repo_root) || canonical == self.repo_root {
            return Err(BoundaryError::Violation {
                path: path.to_path_buf(),
                reason: REASON_OUTSIDE_ROOT,
            });
        }

        if let Some(artifact_dir) = &self.artifact_dir {
            if canonical.starts_with(artifact_dir) {
                return Err(BoundaryError::Violation {
                    path: path.to_path_buf(),
                    reason: REASON_INSIDE_ARTIFACTS,
                });
            }
        }

        Ok(canonical)
    }

    /// Whether a path resolves inside the repository root.
    pub fn is_in_repo(&self, path: &Path) -> bool {
        let absolute = if path.is_relative() {
            self.repo_root.join(path)
        } else {
            path.to_path_buf()
        };
        canonicalize_allow_missing(&absolute)
            .map(|canonical| canonical.starts_with(&self.repo_root))
            .unwrap_or(false)
    }

    /// Whether a path resolves inside the agent directory.
    pub fn is_in_agent_dir(&self, path: &Path) -> bool {
        let absolute = if path.is_relative() {
            self.repo_root.join(path)
        } else {
            path.to_path_buf()
        };
        canonicalize_allow_missing(&absolute)
            .map(|canonical| canonical.starts_with(self.agent_dir()))
            .unwrap_or(false)
    }

    /// Repository-relative form of a path, if it lies inside the root.
    pub fn relative_path(&self, path: &Path) -> Result<PathBuf> {
        let canonical = self.validate(path)?;
        // validate() guarantees the prefix.
        Ok(canonical
            .strip_prefix(&self.repo_root)
            .expect("validated path is under repo root")
            .to_path_buf())
    }
}

/// Canonicalize a path that may not fully exist yet.
///
/// The deepest existing ancestor is resolved through the filesystem
/// (following symlinks), then the missing tail is applied lexically. `..`
/// in the tail pops a component, so traversal is resolved after symlink
/// resolution, not before.
fn canonicalize_allow_missing(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = fs::canonicalize(path) {
        return Ok(canonical);
    }

    let mut tail: Vec<OsString> = Vec::new();
    let mut current = path.to_path_buf();

    let base = loop {
        match fs::canonicalize(&current) {
            Ok(canonical) => break canonical,
            Err(_) => {
                let mut components = current.components();
                match components.next_back() {
                    Some(
                        component @ (Component::Normal(_)
                        | Component::ParentDir
                        | Component::CurDir),
                    ) => {
                        tail.push(component.as_os_str().to_os_string());
                        current = components.as_path().to_path_buf();
                        if current.as_os_str().is_empty() {
                            return Err(BoundaryError::Unresolvable(path.to_path_buf()));
                        }
                    }
                    _ => return Err(BoundaryError::Unresolvable(path.to_path_buf())),
                }
            }
        }
    };

    let mut result = base;
    for component in tail.iter().rev() {
        if component == ".." {
            if !result.pop() {
                return Err(BoundaryError::Unresolvable(path.to_path_buf()));
            }
        } else if component != "." {
            result.push(component);
        }
    }
    Ok(result)
}
