use super::Config;
use std::path::PathBuf;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(workspace) = std::env::var("STEPWEAVER_WORKSPACE")
            && !workspace.is_empty()
        {
            self.workspace_dir = PathBuf::from(workspace);
        }

        if let Ok(state_dir) = std::env::var("STEPWEAVER_STATE_DIR")
            && !state_dir.is_empty()
        {
            self.state_dir = state_dir;
        }

        if let Ok(endpoint) = std::env::var("STEPWEAVER_ORACLE_URL")
            && !endpoint.is_empty()
        {
            self.oracle.endpoint = Some(endpoint);
        }

        if let Ok(level) = std::env::var("STEPWEAVER_LOG_LEVEL")
            && !level.is_empty()
        {
            self.observability.log_level = level;
        }

        if let Ok(parallel_str) = std::env::var("STEPWEAVER_MAX_PARALLEL_STEPS")
            && let Ok(parallel) = parallel_str.parse::<usize>()
            && parallel > 0
        {
            self.execution.max_parallel_steps = parallel;
        }

        if let Ok(retries_str) = std::env::var("STEPWEAVER_MAX_RETRIES")
            && let Ok(retries) = retries_str.parse::<u32>()
            && retries > 0
        {
            self.execution.max_retries = retries;
        }

        if let Ok(timeout_str) = std::env::var("STEPWEAVER_STEP_TIMEOUT_SECS")
            && let Ok(timeout) = timeout_str.parse::<u64>()
        {
            self.execution.step_timeout_secs = timeout;
        }
    }
}
