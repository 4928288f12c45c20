use crate::planner::FailureCategory;
use std::path::PathBuf;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `stepweaver`.
///
/// Plan-level failures surface through these variants. Step-level faults never
/// escape the scheduler: they are converted into a categorized `StepError` on
/// the step and handled by the self-correction controller.
#[derive(Debug, Error)]
pub enum StepweaverError {
    // ── Plan validation ─────────────────────────────────────────────────
    #[error("plan rejected: {0}")]
    Validation(#[from] PlanValidationError),

    // ── Persistence ─────────────────────────────────────────────────────
    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),

    // ── Config ──────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Reasoning oracle ────────────────────────────────────────────────
    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Plan validation errors ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("plan id cannot be empty")]
    EmptyPlanId,

    #[error("plan step id cannot be empty")]
    EmptyStepId,

    #[error("duplicate plan step id: {0}")]
    DuplicateStepId(String),

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("cycle detected between steps: {}", members.join(", "))]
    Cycle { members: Vec<String> },

    #[error("malformed plan: {0}")]
    Malformed(String),
}

// ─── Step-level faults ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepExecutionError {
    #[error("action executor failed: {0}")]
    Executor(String),

    #[error("corrective action unavailable: {0}")]
    Correction(String),

    #[error("action timed out after {secs}s")]
    TimedOut { secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("verification failed: {}", failures.join("; "))]
pub struct VerificationFailure {
    pub failures: Vec<String>,
}

/// Everything that can end a single attempt of a step unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFault {
    #[error(transparent)]
    Execution(#[from] StepExecutionError),

    #[error(transparent)]
    Verification(#[from] VerificationFailure),

    #[error("approval timed out after {secs}s")]
    ApprovalTimeout { secs: u64 },

    #[error("approval rejected: {reason}")]
    ApprovalRejected { reason: String },

    #[error("cancelled")]
    Cancelled,
}

impl StepFault {
    /// Faults that bypass classification and land on the `unknown` category.
    pub fn forced_category(&self) -> Option<FailureCategory> {
        match self {
            Self::ApprovalTimeout { .. } | Self::ApprovalRejected { .. } | Self::Cancelled => {
                Some(FailureCategory::Unknown)
            }
            Self::Execution(StepExecutionError::TimedOut { .. }) => {
                Some(FailureCategory::TimeoutOrResource)
            }
            Self::Execution(_) | Self::Verification(_) => None,
        }
    }
}

// ─── Persistence errors ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no snapshot stored for plan {0}")]
    NotFound(String),

    #[error("snapshot stored for plan {requested} belongs to plan {found}")]
    ForeignSnapshot { requested: String, found: String },

    #[error("plan {plan_id} version mismatch (snapshot v{stored}, live v{live})")]
    VersionMismatch {
        plan_id: String,
        stored: u64,
        live: u64,
    },

    #[error("snapshot for plan {plan_id} no longer matches the live definition: {reason}")]
    DefinitionMismatch { plan_id: String, reason: String },

    #[error("plan {0} was cancelled and cannot be resumed")]
    Cancelled(String),
}

// ─── Config errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Oracle errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),

    #[error("oracle returned a malformed response: {0}")]
    Malformed(String),

    #[error("oracle proposed an invalid plan: {0}")]
    InvalidPlan(#[from] PlanValidationError),

    #[error("oracle does not support {0}")]
    Unsupported(&'static str),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, StepweaverError>;
