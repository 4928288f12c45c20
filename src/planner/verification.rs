use crate::error::{StepExecutionError, StepFault, VerificationFailure};
use crate::planner::{FailureCategory, PlanStep, VerificationCriterion};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Structured result of performing a step's action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub diagnostics: String,
    /// Category the executor already knows applies (e.g. it killed the action
    /// for exceeding a resource limit). Overrides diagnostic heuristics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<FailureCategory>,
}

impl Outcome {
    pub fn succeeded(diagnostics: impl Into<String>) -> Self {
        Self {
            success: true,
            diagnostics: diagnostics.into(),
            ..Self::default()
        }
    }

    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostics: diagnostics.into(),
            ..Self::default()
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifacts.push(artifact.into());
        self
    }

    pub fn with_category_hint(mut self, category: FailureCategory) -> Self {
        self.category_hint = Some(category);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriterionVerdict {
    pub passed: bool,
    pub diagnostic: Option<String>,
}

impl CriterionVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            diagnostic: None,
        }
    }

    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// External evaluator of verification criteria.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn check(
        &self,
        criterion: &VerificationCriterion,
        outcome: &Outcome,
    ) -> Result<CriterionVerdict>;
}

/// Decides whether an attempt succeeded: the action outcome must report
/// success and every declared criterion must pass.
pub struct VerificationGate {
    verifier: Arc<dyn Verifier>,
}

impl VerificationGate {
    pub fn new(verifier: Arc<dyn Verifier>) -> Self {
        Self { verifier }
    }

    pub async fn evaluate(&self, step: &PlanStep, outcome: &Outcome) -> Result<(), StepFault> {
        if !outcome.success {
            let message = if outcome.diagnostics.trim().is_empty() {
                "action reported failure".to_string()
            } else {
                first_line(&outcome.diagnostics).to_string()
            };
            return Err(StepExecutionError::Executor(message).into());
        }

        let mut failures = Vec::new();
        for criterion in &step.verification_criteria {
            match self.verifier.check(criterion, outcome).await {
                Ok(verdict) if verdict.passed => {}
                Ok(verdict) => failures.push(format!(
                    "{criterion}: {}",
                    verdict.diagnostic.as_deref().unwrap_or("not satisfied")
                )),
                Err(error) => failures.push(format!("{criterion}: evaluator error: {error}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            tracing::debug!(step_id = %step.id, failed = failures.len(), "verification criteria not met");
            Err(VerificationFailure { failures }.into())
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
}
