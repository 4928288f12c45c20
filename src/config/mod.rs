pub mod schema;

pub use schema::{
    ApprovalConfig, ApprovalMode, Config, ExecutionConfig, ObservabilityConfig, OracleConfig,
};
