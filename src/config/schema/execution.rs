use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,
    /// Attempts allowed per step, the first one included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_resource_retries")]
    pub max_resource_retries: u32,
    /// 0 disables the per-step timeout.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    /// Shell command performing `edit` steps; receives the step through
    /// `STEPWEAVER_TARGETS` and `STEPWEAVER_DESCRIPTION`.
    #[serde(default)]
    pub editor_command: Option<String>,
}

fn default_max_parallel_steps() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_resource_retries() -> u32 {
    2
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_replans() -> u32 {
    1
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: default_max_parallel_steps(),
            max_retries: default_max_retries(),
            max_resource_retries: default_max_resource_retries(),
            step_timeout_secs: default_step_timeout_secs(),
            max_replans: default_max_replans(),
            editor_command: None,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_steps == 0 {
            return Err(ConfigError::Validation(
                "execution.max_parallel_steps must be greater than 0".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Validation(
                "execution.max_retries must be at least 1".into(),
            ));
        }
        if self.max_resource_retries > self.max_retries {
            return Err(ConfigError::Validation(format!(
                "execution.max_resource_retries ({}) cannot exceed execution.max_retries ({})",
                self.max_resource_retries, self.max_retries
            )));
        }
        Ok(())
    }
}
