use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Base URL of the planning service. Without one, goals cannot be
    /// planned and failed steps are retried unchanged.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_oracle_timeout_secs() -> u64 {
    60
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_oracle_timeout_secs(),
        }
    }
}
