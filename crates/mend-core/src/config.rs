//! Configuration: the `agent.yaml` schema and startup environment.
//!
//! The YAML document is deserialized with serde and then validated once;
//! everything downstream consumes typed records.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default per-step verification timeout (5 minutes, in milliseconds).
pub const DEFAULT_VERIFICATION_STEP_TIMEOUT_MS: u64 = 300_000;
/// Default scout query timeout (60 seconds, in milliseconds).
pub const DEFAULT_SCOUT_QUERY_TIMEOUT_MS: u64 = 60_000;
/// Default artifact root, under the user's home directory.
pub const DEFAULT_ARTIFACT_DIR_NAME: &str = ".agent-artifacts";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A single verification step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStep {
    pub name: String,
    pub command: String,
}

/// The `verification` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub container_image: String,
    pub steps: Vec<VerificationStep>,
}

/// The `timeouts` section (milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub verification_step: u64,
    pub scout_query: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            verification_step: DEFAULT_VERIFICATION_STEP_TIMEOUT_MS,
            scout_query: DEFAULT_SCOUT_QUERY_TIMEOUT_MS,
        }
    }
}

/// The `monorepo` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonorepoConfig {
    pub package: Option<String>,
}

/// Complete `agent.yaml` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub verification: VerificationConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub monorepo: MonorepoConfig,
}

impl AgentConfig {
    /// Validate the parsed document. All checks happen here, once.
    pub fn validate(&self) -> Result<()> {
        if self.verification.container_image.trim().is_empty() {
            return Err(ConfigError::Validation(
                "verification.container_image must be a non-empty string".to_string(),
            ));
        }
        if self.verification.steps.is_empty() {
            return Err(ConfigError::Validation(
                "verification.steps must contain at least one step".to_string(),
            ));
        }
        for (i, step) in self.verification.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "verification.steps[{i}].name must be a non-empty string"
                )));
            }
            if step.command.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "verification.steps[{i}].command must be a non-empty string"
                )));
            }
        }
        if self.timeouts.verification_step == 0 {
            return Err(ConfigError::Validation(
                "timeouts.verification_step must be a positive integer".to_string(),
            ));
        }
        if self.timeouts.scout_query == 0 {
            return Err(ConfigError::Validation(
                "timeouts.scout_query must be a positive integer".to_string(),
            ));
        }
        if let Some(package) = &self.monorepo.package {
            if package.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "monorepo.package must be a non-empty string".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Parse and validate `agent.yaml` content.
pub fn parse_config(content: &str) -> Result<AgentConfig> {
    let config: AgentConfig = serde_yaml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate `agent.yaml` from a file.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Which LLM backend the environment selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    /// Custom OpenAI-compatible endpoint (`AGENT_LLM_BASE_URL`).
    Custom { base_url: String },
    Anthropic,
    OpenAi,
}

/// LLM selection resolved from the environment.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

/// Environment configuration consumed at startup.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub llm: Option<LlmConfig>,
    /// Artifact root; `AGENT_ARTIFACT_DIR` overrides the default
    /// `~/.agent-artifacts`.
    pub artifact_dir: PathBuf,
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl EnvConfig {
    /// Read configuration from process environment variables.
    ///
    /// Backend precedence: custom endpoint > Anthropic > OpenAI.
    pub fn from_env() -> Self {
        let model = non_empty_var("AGENT_LLM_MODEL");
        let anthropic_key = non_empty_var("ANTHROPIC_API_KEY");
        let openai_key = non_empty_var("OPENAI_API_KEY");

        let llm = if let Some(base_url) = non_empty_var("AGENT_LLM_BASE_URL") {
            Some(LlmConfig {
                backend: LlmBackend::Custom { base_url },
                api_key: anthropic_key.or(openai_key),
                model,
            })
        } else if anthropic_key.is_some() {
            Some(LlmConfig {
                backend: LlmBackend::Anthropic,
                api_key: anthropic_key,
                model,
            })
        } else if openai_key.is_some() {
            Some(LlmConfig {
                backend: LlmBackend::OpenAi,
                api_key: openai_key,
                model,
            })
        } else {
            None
        };

        let artifact_dir = non_empty_var("AGENT_ARTIFACT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_artifact_dir);

        Self { llm, artifact_dir }
    }
}

/// `~/.agent-artifacts`, or a relative fallback when home is unknown.
pub fn default_artifact_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_ARTIFACT_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = "\
verification:
  container_image: node:20-slim
  steps:
    - name: install
      command: npm ci
    - name: test
      command: npm test
";

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = parse_config(MINIMAL_YAML).unwrap();
        assert_eq!(config.verification.container_image, "node:20-slim");
        assert_eq!(config.verification.steps.len(), 2);
        assert_eq!(config.verification.steps[0].name, "install");
        assert_eq!(config.timeouts.verification_step, 300_000);
        assert_eq!(config.timeouts.scout_query, 60_000);
        assert!(config.monorepo.package.is_none());
    }

    #[test]
    fn explicit_timeouts_and_monorepo() {
        let yaml = format!(
            "{MINIMAL_YAML}timeouts:\n  verification_step: 120000\n  scout_query: 30000\nmonorepo:\n  package: web\n"
        );
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.timeouts.verification_step, 120_000);
        assert_eq!(config.timeouts.scout_query, 30_000);
        assert_eq!(config.monorepo.package.as_deref(), Some("web"));
    }

    #[test]
    fn missing_verification_section_fails() {
        let err = parse_config("timeouts:\n  scout_query: 1000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_steps_fail_validation() {
        let yaml = "verification:\n  container_image: node:20\n  steps: []\n";
        let err = parse_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn blank_step_fields_fail_validation() {
        let yaml = "\
verification:
  container_image: node:20
  steps:
    - name: \"  \"
      command: npm test
";
        let err = parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("steps[0].name"));
    }

    #[test]
    fn blank_image_fails_validation() {
        let yaml = "verification:\n  container_image: \"\"\n  steps:\n    - name: t\n      command: c\n";
        let err = parse_config(yaml).unwrap_err();
        assert!(err.to_string().contains("container_image"));
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let yaml = format!("{MINIMAL_YAML}timeouts:\n  verification_step: 0\n");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("verification_step"));
    }

    #[test]
    fn not_a_mapping_fails_parse() {
        assert!(matches!(
            parse_config("- just\n- a\n- list\n").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, MINIMAL_YAML).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.verification.steps.len(), 2);

        assert!(matches!(
            load_config(&dir.path().join("missing.yaml")).unwrap_err(),
            ConfigError::Read(_)
        ));
    }

    #[test]
    fn default_artifact_dir_is_under_home() {
        let dir = default_artifact_dir();
        assert!(dir.ends_with(DEFAULT_ARTIFACT_DIR_NAME));
    }
}
