//! Dry-run mode: capture intended writes as unified diffs instead of
//! touching the filesystem. Changes can later be applied or discarded.

use similar::TextDiff;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DryRunError {
    #[error("dry-run mode is not armed")]
    NotArmed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DryRunError>;

/// A proposed change to one file.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Repository-relative path.
    pub path: String,
    pub original_content: String,
    pub new_content: String,
    pub is_new_file: bool,
    pub is_deleted: bool,
}

impl FileChange {
    /// Git-style unified diff for this change.
    pub fn unified_diff(&self) -> String {
        let (from_label, to_label) = if self.is_new_file {
            ("/dev/null".to_string(), format!("b/{}", self.path))
        } else if self.is_deleted {
            (format!("a/{}", self.path), "/dev/null".to_string())
        } else {
            (format!("a/{}", self.path), format!("b/{}", self.path))
        };

        let text_diff =
            TextDiff::from_lines(self.original_content.as_str(), self.new_content.as_str());
        let mut unified = text_diff.unified_diff();
        unified.header(&from_label, &to_label);
        unified.to_string()
    }
}

/// The aggregated dry-run proposal.
#[derive(Debug, Clone, Default)]
pub struct Proposal {
    pub changes: Vec<FileChange>,
    pub summary: String,
}

impl Proposal {
    pub fn unified_diff(&self) -> String {
        self.changes
            .iter()
            .map(FileChange::unified_diff)
            .filter(|d| !d.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn modified_files(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.path.clone()).collect()
    }

    /// Markdown artifact describing the proposal.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec!["# Dry-Run Proposal".to_string(), String::new()];
        if !self.summary.is_empty() {
            lines.push(self.summary.clone());
            lines.push(String::new());
        }
        if self.changes.is_empty() {
            lines.push("No changes proposed.".to_string());
        } else {
            lines.push(format!("{} file(s) would change:", self.changes.len()));
            lines.push(String::new());
            for change in &self.changes {
                lines.push(format!("- `{}`", change.path));
            }
            lines.push(String::new());
            lines.push("```diff".to_string());
            lines.push(self.unified_diff());
            lines.push("```".to_string());
        }
        lines.join("\n")
    }
}

/// Collects intended writes while dry-run mode is armed.
#[derive(Debug, Default)]
pub struct DryRunManager {
    repo_root: PathBuf,
    armed: bool,
    proposal: Proposal,
}

impl DryRunManager {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            armed: false,
            proposal: Proposal::default(),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arm collection for a new dry-run task.
    pub fn arm(&mut self) {
        self.armed = true;
        self.proposal = Proposal::default();
    }

    pub fn reset(&mut self) {
        self.armed = false;
        self.proposal = Proposal::default();
    }

    pub fn proposal(&self) -> &Proposal {
        &self.proposal
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.proposal.summary = summary.into();
    }

    /// Record an intended write. The original content is read from disk so
    /// the diff reflects the current tree; the tree itself is unchanged.
    pub fn record_write(&mut self, relative_path: &str, new_content: &str) -> Result<()> {
        if !self.armed {
            return Err(DryRunError::NotArmed);
        }

        let absolute = self.repo_root.join(relative_path);
        let (original_content, is_new_file) = match fs::read_to_string(&absolute) {
            Ok(content) => (content, false),
            Err(_) => (String::new(), true),
        };

        self.proposal.changes.push(FileChange {
            path: relative_path.to_string(),
            original_content,
            new_content: new_content.to_string(),
            is_new_file,
            is_deleted: false,
        });
        Ok(())
    }

    /// Record an intended deletion.
    pub fn record_delete(&mut self, relative_path: &str) -> Result<()> {
        if !self.armed {
            return Err(DryRunError::NotArmed);
        }

        let absolute = self.repo_root.join(relative_path);
        let original_content = fs::read_to_string(&absolute).unwrap_or_default();

        self.proposal.changes.push(FileChange {
            path: relative_path.to_string(),
            original_content,
            new_content: String::new(),
            is_new_file: false,
            is_deleted: true,
        });
        Ok(())
    }

    /// Apply the collected changes to the tree. Returns the modified paths.
    pub fn apply_changes(&mut self) -> Result<Vec<String>> {
        if !self.armed {
            return Err(DryRunError::NotArmed);
        }

        let mut applied = Vec::new();
        for change in &self.proposal.changes {
            let absolute = self.repo_root.join(&change.path);
            if change.is_deleted {
                if absolute.exists() {
                    fs::remove_file(&absolute)?;
                }
            } else {
                if let Some(parent) = absolute.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&absolute, &change.new_content)?;
            }
            applied.push(change.path.clone());
        }

        self.armed = false;
        Ok(applied)
    }

    /// Drop the collected changes without touching the tree.
    pub fn discard(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_requires_arming() {
        let repo = TempDir::new().unwrap();
        let mut manager = DryRunManager::new(repo.path());
        assert!(matches!(
            manager.record_write("a.txt", "x").unwrap_err(),
            DryRunError::NotArmed
        ));
    }

    #[test]
    fn recorded_writes_do_not_touch_the_tree() {
        let repo = TempDir::new().unwrap();
        let mut manager = DryRunManager::new(repo.path());
        manager.arm();

        manager.record_write("src/new.rs", "fn main() {}\n").unwrap();
        assert!(!repo.path().join("src/new.rs").exists());
        assert_eq!(manager.proposal().changes.len(), 1);
        assert!(manager.proposal().changes[0].is_new_file);
    }

    #[test]
    fn diff_for_modified_file_shows_both_sides() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("config.txt"), "old value\n").unwrap();

        let mut manager = DryRunManager::new(repo.path());
        manager.arm();
        manager.record_write("config.txt", "new value\n").unwrap();

        let diff = manager.proposal().changes[0].unified_diff();
        assert!(diff.contains("a/config.txt"));
        assert!(diff.contains("b/config.txt"));
        assert!(diff.contains("-old value"));
        assert!(diff.contains("+new value"));
    }

    #[test]
    fn diff_for_new_file_uses_dev_null() {
        let repo = TempDir::new().unwrap();
        let mut manager = DryRunManager::new(repo.path());
        manager.arm();
        manager.record_write("brand_new.txt", "hello\n").unwrap();

        let diff = manager.proposal().changes[0].unified_diff();
        assert!(diff.contains("/dev/null"));
        assert!(diff.contains("+hello"));
    }

    #[test]
    fn apply_writes_files_and_disarms() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("existing.txt"), "before\n").unwrap();

        let mut manager = DryRunManager::new(repo.path());
        manager.arm();
        manager.record_write("existing.txt", "after\n").unwrap();
        manager.record_write("nested/dir/new.txt", "fresh\n").unwrap();

        let applied = manager.apply_changes().unwrap();
        assert_eq!(applied, vec!["existing.txt", "nested/dir/new.txt"]);
        assert_eq!(
            fs::read_to_string(repo.path().join("existing.txt")).unwrap(),
            "after\n"
        );
        assert_eq!(
            fs::read_to_string(repo.path().join("nested/dir/new.txt")).unwrap(),
            "fresh\n"
        );
        assert!(!manager.is_armed());
    }

    #[test]
    fn discard_leaves_tree_untouched() {
        let repo = TempDir::new().unwrap();
        let mut manager = DryRunManager::new(repo.path());
        manager.arm();
        manager.record_write("never.txt", "content").unwrap();
        manager.discard();

        assert!(!repo.path().join("never.txt").exists());
        assert!(manager.proposal().changes.is_empty());
        assert!(!manager.is_armed());
    }

    #[test]
    fn proposal_markdown_lists_files() {
        let repo = TempDir::new().unwrap();
        let mut manager = DryRunManager::new(repo.path());
        manager.arm();
        manager.set_summary("Adjust configuration");
        manager.record_write("config.txt", "v=2\n").unwrap();

        let markdown = manager.proposal().to_markdown();
        assert!(markdown.contains("# Dry-Run Proposal"));
        assert!(markdown.contains("Adjust configuration"));
        assert!(markdown.contains("- `config.txt`"));
        assert!(markdown.contains("```diff"));
    }
}
