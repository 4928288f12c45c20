use crate::error::OracleError;
use crate::planner::{
    ActionKind, AttemptRecord, FailureCategory, Outcome, Plan, PlanStep, StepFailureSummary,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Context handed to the oracle when it is asked for a (re)plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanningContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_plan: Option<Plan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<StepFailureSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixRequest {
    pub step: PlanStep,
    pub failure_category: FailureCategory,
    pub diagnostics: String,
    pub prior_attempts: Vec<AttemptRecord>,
}

/// Fix proposed by the oracle for a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectiveAction {
    pub action_kind: ActionKind,
    #[serde(default)]
    pub targets: Vec<String>,
    pub description: String,
    #[serde(default)]
    pub rationale: String,
}

impl CorrectiveAction {
    pub fn validate(&self) -> Result<(), OracleError> {
        if self.description.trim().is_empty() {
            return Err(OracleError::Malformed(
                "corrective action description cannot be empty".into(),
            ));
        }
        if self.action_kind != ActionKind::Test && self.targets.is_empty() {
            return Err(OracleError::Malformed(format!(
                "{} corrective action requires at least one target",
                self.action_kind
            )));
        }
        if self.targets.iter().any(|target| target.trim().is_empty()) {
            return Err(OracleError::Malformed(
                "corrective action target cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

/// External reasoning component producing plans and fixes.
///
/// Responses are non-deterministic; callers validate everything returned.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn propose_plan(
        &self,
        goal: &str,
        context: &PlanningContext,
    ) -> Result<Plan, OracleError>;

    async fn propose_fix(&self, request: &FixRequest) -> Result<CorrectiveAction, OracleError>;
}

/// External component performing a step's effect.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn perform(&self, step: &PlanStep) -> Result<Outcome>;

    async fn apply_fix(&self, step: &PlanStep, fix: &CorrectiveAction) -> Result<Outcome>;
}
