use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalMode {
    Auto,
    Manual,
    RiskBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_policy")]
    pub policy: ApprovalMode,
    /// Steps scoring above this need sign-off (`risk_based` only).
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: f64,
    /// Unset waits for a decision indefinitely.
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: Option<u64>,
}

fn default_policy() -> ApprovalMode {
    ApprovalMode::Auto
}

fn default_risk_threshold() -> f64 {
    0.7
}

#[allow(clippy::unnecessary_wraps)]
fn default_approval_timeout_secs() -> Option<u64> {
    Some(300)
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            risk_threshold: default_risk_threshold(),
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

impl ApprovalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.risk_threshold) {
            return Err(ConfigError::Validation(format!(
                "approval.risk_threshold must be within [0.0, 1.0], got {}",
                self.risk_threshold
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "approval.timeout_secs must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }
}
