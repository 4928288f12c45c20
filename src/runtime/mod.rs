mod oracle;
mod verifier;
mod workspace;

pub use oracle::{HttpOracle, PassthroughOracle, build_oracle_client, create_oracle};
pub use verifier::BuiltinVerifier;
pub use workspace::WorkspaceActionExecutor;
