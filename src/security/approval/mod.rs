pub mod channel;
pub mod cli;

pub use channel::{ApprovalSender, ChannelApprovalBroker};
pub use cli::CliApprovalBroker;

use crate::config::{ApprovalConfig, ApprovalMode};
use crate::planner::PlanStep;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ApprovalPolicy {
    Auto,
    Manual,
    RiskBased { threshold: f64 },
}

impl ApprovalPolicy {
    pub fn from_config(config: &ApprovalConfig) -> Self {
        match config.policy {
            ApprovalMode::Auto => Self::Auto,
            ApprovalMode::Manual => Self::Manual,
            ApprovalMode::RiskBased => Self::RiskBased {
                threshold: config.risk_threshold,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub plan_id: String,
    pub step_id: String,
    pub action_kind: crate::planner::ActionKind,
    pub description: String,
    pub targets_summary: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: String },
}

/// Source of approval signals. Implementations may wait indefinitely; the
/// gate enforces the timeout.
pub trait ApprovalBroker: Send + Sync {
    fn request_approval<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApprovalDecision>> + Send + 'a>>;
}

/// Scores the impact of a step in `[0.0, 1.0]`.
pub trait RiskAssessor: Send + Sync {
    fn assess(&self, step: &PlanStep) -> f64;
}

/// Scores by action kind, bumped for steps touching many targets.
pub struct ActionKindRiskAssessor;

impl RiskAssessor for ActionKindRiskAssessor {
    fn assess(&self, step: &PlanStep) -> f64 {
        let base = step.action_kind.baseline_risk();
        let spread = if step.targets.len() > 5 { 0.1 } else { 0.0 };
        (base + spread).min(1.0)
    }
}

pub struct AutoApproveBroker;

impl ApprovalBroker for AutoApproveBroker {
    fn request_approval<'a>(
        &'a self,
        _request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApprovalDecision>> + Send + 'a>> {
        Box::pin(async { Ok(ApprovalDecision::Approved) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Approved,
    Rejected { reason: String },
    TimedOut { secs: u64 },
}

/// Human checkpoint in front of a step's first dispatch.
pub struct ApprovalGate {
    policy: ApprovalPolicy,
    assessor: Arc<dyn RiskAssessor>,
    broker: Arc<dyn ApprovalBroker>,
    timeout: Option<Duration>,
}

impl ApprovalGate {
    pub fn new(
        policy: ApprovalPolicy,
        assessor: Arc<dyn RiskAssessor>,
        broker: Arc<dyn ApprovalBroker>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            policy,
            assessor,
            broker,
            timeout,
        }
    }

    /// Gate that never blocks.
    pub fn auto() -> Self {
        Self::new(
            ApprovalPolicy::Auto,
            Arc::new(ActionKindRiskAssessor),
            Arc::new(AutoApproveBroker),
            None,
        )
    }

    pub fn from_config(config: &ApprovalConfig, broker: Arc<dyn ApprovalBroker>) -> Self {
        Self::new(
            ApprovalPolicy::from_config(config),
            Arc::new(ActionKindRiskAssessor),
            broker,
            config.timeout_secs.map(Duration::from_secs),
        )
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    /// Builds the request to send when `step` needs sign-off, `None` otherwise.
    pub fn requires_approval(&self, plan_id: &str, step: &PlanStep) -> Option<ApprovalRequest> {
        let risk_score = self.assessor.assess(step).clamp(0.0, 1.0);
        let needed = match self.policy {
            ApprovalPolicy::Auto => false,
            ApprovalPolicy::Manual => true,
            ApprovalPolicy::RiskBased { threshold } => risk_score > threshold,
        };
        needed.then(|| ApprovalRequest {
            plan_id: plan_id.to_string(),
            step_id: step.id.clone(),
            action_kind: step.action_kind,
            description: step.description.clone(),
            targets_summary: summarize_targets(&step.targets),
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
        })
    }

    pub async fn check(&self, plan_id: &str, step: &PlanStep) -> GateOutcome {
        let Some(request) = self.requires_approval(plan_id, step) else {
            return GateOutcome::Approved;
        };

        tracing::info!(
            plan_id,
            step_id = %step.id,
            risk = %request.risk_level,
            "awaiting approval"
        );

        let pending = self.broker.request_approval(&request);
        let decision = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(decision) => decision,
                Err(_) => {
                    return GateOutcome::TimedOut {
                        secs: limit.as_secs(),
                    };
                }
            },
            None => pending.await,
        };

        match decision {
            Ok(ApprovalDecision::Approved) => GateOutcome::Approved,
            Ok(ApprovalDecision::Rejected { reason }) => GateOutcome::Rejected { reason },
            Err(error) => GateOutcome::Rejected {
                reason: format!("approval broker error: {error}"),
            },
        }
    }
}

#[must_use]
pub fn summarize_targets(targets: &[String]) -> String {
    const SHOWN: usize = 3;
    match targets.len() {
        0 => "(no targets)".to_string(),
        n if n <= SHOWN => targets.join(", "),
        n => format!("{} (+{} more)", targets[..SHOWN].join(", "), n - SHOWN),
    }
}
