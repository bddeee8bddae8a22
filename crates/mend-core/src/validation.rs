//! Input validation performed before a task enters the queue.

use std::path::Path;

/// Maximum accepted task description length.
pub const MAX_TASK_DESCRIPTION_LENGTH: usize = 10_000;
/// Below this length a warning is attached.
pub const MIN_TASK_DESCRIPTION_LENGTH: usize = 3;

/// Outcome of a validation pass: hard errors plus advisory warnings.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Validate the raw task description.
pub fn validate_task_input(description: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    let stripped = description.trim();
    if stripped.is_empty() {
        result.add_error("Task description cannot be empty");
        return result;
    }

    if stripped.len() < MIN_TASK_DESCRIPTION_LENGTH {
        result.add_warning(format!(
            "Task description is very short ({} chars), consider being more specific",
            stripped.len()
        ));
    }

    if description.len() > MAX_TASK_DESCRIPTION_LENGTH {
        result.add_error(format!(
            "Task description exceeds maximum length ({} > {MAX_TASK_DESCRIPTION_LENGTH} characters)",
            description.len()
        ));
    }

    result
}

/// Validate the repository path.
pub fn validate_repo_path(repo_path: &Path) -> ValidationResult {
    let mut result = ValidationResult::default();

    if !repo_path.exists() {
        result.add_error(format!(
            "Repository path does not exist: {}",
            repo_path.display()
        ));
        return result;
    }
    if !repo_path.is_dir() {
        result.add_error(format!(
            "Repository path is not a directory: {}",
            repo_path.display()
        ));
        return result;
    }
    if !repo_path.join(".git").exists() {
        result.add_warning("Repository path does not appear to be a git repository");
    }

    result
}

/// Validate everything needed before task execution.
pub fn validate_all_inputs(description: &str, repo_path: &Path) -> ValidationResult {
    let mut result = validate_task_input(description);
    result.merge(validate_repo_path(repo_path));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_description_is_an_error() {
        let result = validate_task_input("");
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);

        let result = validate_task_input("   \n ");
        assert!(!result.is_valid());
    }

    #[test]
    fn short_description_warns() {
        let result = validate_task_input("ab");
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn oversized_description_is_an_error() {
        let result = validate_task_input(&"x".repeat(MAX_TASK_DESCRIPTION_LENGTH + 1));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("maximum length"));
    }

    #[test]
    fn normal_description_is_clean() {
        let result = validate_task_input("Fix the login timeout bug");
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn missing_repo_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = validate_repo_path(&dir.path().join("nope"));
        assert!(!result.is_valid());
    }

    #[test]
    fn file_repo_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "x").unwrap();
        let result = validate_repo_path(&file);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("not a directory"));
    }

    #[test]
    fn non_git_repo_warns_only() {
        let dir = TempDir::new().unwrap();
        let result = validate_repo_path(dir.path());
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn merge_combines_results() {
        let dir = TempDir::new().unwrap();
        let result = validate_all_inputs("", dir.path());
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }
}
