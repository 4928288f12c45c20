mod approval;
mod core;
mod execution;
mod observability;
mod oracle;

pub use approval::{ApprovalConfig, ApprovalMode};
pub use core::Config;
pub use execution::ExecutionConfig;
pub use observability::ObservabilityConfig;
pub use oracle::OracleConfig;
