//! Verification pipeline: ordered step execution inside the container.
//!
//! Short-circuits on the first non-zero exit. Every executed step gets its
//! own log file plus an append into `combined.log`, so the combined log
//! order equals execution order.

use crate::container::{ContainerError, ContainerManager};
use mend_core::config::VerificationStep;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Exit code recorded for a timed-out step (shell convention).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const OOM_SIGNATURES: [&str; 3] = ["oom", "out of memory", "cannot allocate memory"];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error("step '{step}' hit a resource-exhaustion signature")]
    ResourceExhaustion { step: String, tail: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result of one executed step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub command: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes the configured steps inside a running container.
#[derive(Debug)]
pub struct PipelineExecutor<'a> {
    manager: &'a ContainerManager,
    container_id: &'a str,
    logs_dir: PathBuf,
    step_timeout: Duration,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(
        manager: &'a ContainerManager,
        container_id: &'a str,
        logs_dir: &Path,
        step_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            container_id,
            logs_dir: logs_dir.to_path_buf(),
            step_timeout,
        }
    }

    /// Run the steps in order; stop at the first failure.
    ///
    /// Returns the executed step results and whether all of them passed.
    pub async fn execute(
        &self,
        steps: &[VerificationStep],
        env_vars: &HashMap<String, String>,
    ) -> Result<(Vec<StepResult>, bool)> {
        let mut results: Vec<StepResult> = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            let step_number = index + 1;
            info!(
                step = %step.name,
                number = step_number,
                total = steps.len(),
                "executing verification step"
            );

            let start = Instant::now();
            let exec = tokio::time::timeout(
                self.step_timeout,
                self.manager.exec(self.container_id, &step.command, env_vars),
            )
            .await;

            let duration_ms = start.elapsed().as_millis() as u64;

            let (exit_code, output, timed_out) = match exec {
                Ok(Ok((exit_code, output))) => (exit_code, output, false),
                Ok(Err(container_error)) => return Err(container_error.into()),
                Err(_) => {
                    warn!(
                        step = %step.name,
                        timeout_ms = self.step_timeout.as_millis() as u64,
                        "verification step timed out"
                    );
                    (
                        TIMEOUT_EXIT_CODE,
                        format!(
                            "step '{}' timed out after {}ms",
                            step.name,
                            self.step_timeout.as_millis()
                        ),
                        true,
                    )
                }
            };

            let result = StepResult {
                name: step.name.clone(),
                command: step.command.clone(),
                exit_code,
                duration_ms,
                timed_out,
            };

            self.write_step_log(step_number, &result, &output)?;
            self.append_combined_log(&output)?;

            if !result.passed() {
                let failed_step = result.name.clone();
                results.push(result);

                if has_oom_signature(&output) {
                    return Err(PipelineError::ResourceExhaustion {
                        step: failed_step,
                        tail: output,
                    });
                }

                // Short-circuit: remaining steps are not executed.
                return Ok((results, false));
            }

            results.push(result);
        }

        Ok((results, true))
    }

    /// `logs/step-NN-<name>.log` with an exit/duration footer.
    fn write_step_log(&self, step_number: usize, result: &StepResult, output: &str) -> Result<()> {
        let filename = format!("step-{:02}-{}.log", step_number, slugify(&result.name));
        let path = self.logs_dir.join(filename);

        let mut content = output.to_string();
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!(
            "--- exit code: {} | duration: {}ms ---\n",
            result.exit_code, result.duration_ms
        ));

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Append to `logs/combined.log`, enforcing a trailing newline.
    fn append_combined_log(&self, output: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.logs_dir.join("combined.log"))?;
        file.write_all(output.as_bytes())?;
        if !output.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        Ok(())
    }
}

fn has_oom_signature(output: &str) -> bool {
    let lower = output.to_lowercase();
    OOM_SIGNATURES.iter().any(|sig| lower.contains(sig)) || lower.contains("killed")
}

/// Step name sanitized for a filename.
fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if slug.is_empty() {
        "step".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_sanitizes_step_names() {
        assert_eq!(slugify("Unit Tests"), "unit-tests");
        assert_eq!(slugify("lint_check"), "lint_check");
        assert_eq!(slugify("e2e (browser)"), "e2e--browser-");
        assert_eq!(slugify(""), "step");
    }

    #[test]
    fn oom_signatures_are_detected() {
        assert!(has_oom_signature("process was OOM killed"));
        assert!(has_oom_signature("fatal: Out of memory"));
        assert!(has_oom_signature("cc1plus: cannot allocate memory"));
        assert!(has_oom_signature("signal 9: Killed"));
        assert!(!has_oom_signature("assertion failed: left == right"));
    }

    #[test]
    fn step_result_pass_is_exit_zero() {
        let result = StepResult {
            name: "test".to_string(),
            command: "npm test".to_string(),
            exit_code: 0,
            duration_ms: 10,
            timed_out: false,
        };
        assert!(result.passed());

        let result = StepResult {
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
            ..result
        };
        assert!(!result.passed());
    }

    // Full pipeline execution is covered through the verifier integration
    // path with a live daemon; log formatting is exercised directly below.

    #[test]
    fn step_log_naming_is_zero_padded() {
        // Indirect check of the filename format used by write_step_log.
        let filename = format!("step-{:02}-{}.log", 3usize, slugify("Type Check"));
        assert_eq!(filename, "step-03-type-check.log");
    }
}
