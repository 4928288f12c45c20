use super::super::{ApprovalConfig, ExecutionConfig, ObservabilityConfig, OracleConfig};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory steps act on - resolved at load time, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Where plan snapshots live. `~` is expanded.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_state_dir() -> String {
    "~/.stepweaver/state".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("."),
            config_path: PathBuf::new(),
            state_dir: default_state_dir(),
            execution: ExecutionConfig::default(),
            approval: ApprovalConfig::default(),
            oracle: OracleConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execution.validate()?;
        self.approval.validate()?;
        if self.observability.tracing_level().is_none() {
            return Err(ConfigError::Validation(format!(
                "observability.log_level '{}' is not a tracing level",
                self.observability.log_level
            )));
        }
        if self.state_dir.trim().is_empty() {
            return Err(ConfigError::Validation("state_dir cannot be empty".into()));
        }
        if let Some(endpoint) = &self.oracle.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "oracle.endpoint must be an http(s) URL, got '{endpoint}'"
            )));
        }
        Ok(())
    }

    pub fn resolved_state_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(self.state_dir.trim()).into_owned())
    }
}
