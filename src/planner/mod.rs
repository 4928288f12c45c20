mod correction;
mod dag;
mod executor;
mod oracle;
mod parser;
mod state;
mod types;
mod verification;

pub use correction::{CorrectionDecision, EscalationReason, RetryPolicy, SelfCorrectionController};
pub use dag::DependencyGraph;
pub use executor::{ExecutionReport, ExecutorSettings, PlanExecutor};
pub use oracle::{ActionExecutor, CorrectiveAction, FixRequest, PlanningContext, ReasoningOracle};
pub use parser::PlanParser;
pub use state::{
    FileStateStore, MemoryStateStore, PlanSnapshot, SNAPSHOT_SCHEMA_VERSION, StateStore,
    StateTracker, prepare_resume,
};
pub use types::{
    ActionKind, AttemptRecord, FailureCategory, Plan, PlanStatus, PlanStep, StepError,
    StepFailureSummary, StepStatus, VerificationCriterion,
};
pub use verification::{CriterionVerdict, Outcome, VerificationGate, Verifier};
