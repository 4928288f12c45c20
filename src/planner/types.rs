use crate::error::PlanValidationError;
use crate::planner::DependencyGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-step state machine:
/// `Pending -> Ready -> Running -> {Succeeded | Retrying -> Running | Failed | Skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Retrying,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Ready | Self::Running | Self::Retrying)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    Edit,
    Create,
    Delete,
    Run,
    Test,
}

impl ActionKind {
    /// Whether the action changes workspace contents rather than observing them.
    pub fn mutates_workspace(self) -> bool {
        matches!(self, Self::Edit | Self::Create | Self::Delete)
    }

    /// Impact score in `[0.0, 1.0]` used when no external assessment exists.
    pub fn baseline_risk(self) -> f64 {
        match self {
            Self::Delete => 0.9,
            Self::Run => 0.7,
            Self::Edit => 0.5,
            Self::Create => 0.4,
            Self::Test => 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FailureCategory {
    Syntax,
    MissingDependency,
    AssertionFailure,
    TimeoutOrResource,
    Unknown,
}

impl FailureCategory {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub category: FailureCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub category: FailureCategory,
    pub message: String,
}

/// Opaque success predicate. Only the external verifier interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationCriterion(String);

impl VerificationCriterion {
    pub fn new(predicate: impl Into<String>) -> Self {
        Self(predicate.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VerificationCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub action_kind: ActionKind,
    #[serde(default)]
    pub targets: Vec<String>,
    pub description: String,
    #[serde(default)]
    pub verification_criteria: Vec<VerificationCriterion>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_step_status")]
    pub status: StepStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<StepError>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_tolerant: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub resource_retries: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttemptRecord>,
}

fn default_step_status() -> StepStatus {
    StepStatus::Pending
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl PlanStep {
    pub fn new(id: impl Into<String>, action_kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_kind,
            targets: Vec::new(),
            description: description.into(),
            verification_criteria: Vec::new(),
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            attempts: 0,
            last_error: None,
            skip_tolerant: false,
            resource_retries: 0,
            history: Vec::new(),
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = depends_on.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verification_criteria = criteria.into_iter().map(VerificationCriterion::new).collect();
        self
    }

    pub fn skip_tolerant(mut self) -> Self {
        self.skip_tolerant = true;
        self
    }

    /// Whether dependents of this step may become ready.
    pub fn unblocks_dependents(&self) -> bool {
        match self.status {
            StepStatus::Succeeded => true,
            StepStatus::Skipped => self.skip_tolerant,
            _ => false,
        }
    }

    /// Structural equality: everything the oracle authored, ignoring run state.
    pub fn same_definition(&self, other: &Self) -> bool {
        self.id == other.id
            && self.action_kind == other.action_kind
            && self.targets == other.targets
            && self.description == other.description
            && self.verification_criteria == other.verification_criteria
            && self.depends_on == other.depends_on
            && self.skip_tolerant == other.skip_tolerant
    }

    fn reset_run_state(&mut self) {
        self.status = StepStatus::Pending;
        self.attempts = 0;
        self.last_error = None;
        self.resource_retries = 0;
        self.history.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailureSummary {
    pub step_id: String,
    pub category: FailureCategory,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    pub version: u64,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub const INITIAL_VERSION: u64 = 1;

    pub fn new(
        id: impl Into<String>,
        goal: impl Into<String>,
        steps: Vec<PlanStep>,
    ) -> Result<Self, PlanValidationError> {
        let plan = Self {
            id: id.into(),
            goal: goal.into(),
            version: Self::INITIAL_VERSION,
            status: PlanStatus::Draft,
            created_at: Utc::now(),
            steps,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<DependencyGraph, PlanValidationError> {
        if self.id.trim().is_empty() {
            return Err(PlanValidationError::EmptyPlanId);
        }
        DependencyGraph::build(&self.steps)
    }

    pub fn levels(&self) -> Result<Vec<Vec<String>>, PlanValidationError> {
        Ok(self.validate()?.levels())
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|step| step.id == id)
    }

    pub fn step_index(&self) -> BTreeMap<String, usize> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| (step.id.clone(), index))
            .collect()
    }

    /// Plan status as a pure function of step statuses.
    pub fn derive_status(&self) -> PlanStatus {
        if self.steps.iter().any(|step| !step.status.is_terminal()) {
            return PlanStatus::Running;
        }
        if self
            .steps
            .iter()
            .any(|step| step.status == StepStatus::Failed)
        {
            return PlanStatus::Failed;
        }
        PlanStatus::Completed
    }

    pub fn dependencies_satisfied(&self, step: &PlanStep) -> bool {
        step.depends_on.iter().all(|dep| {
            self.step(dep)
                .is_some_and(PlanStep::unblocks_dependents)
        })
    }

    pub fn terminal_failures(&self) -> Vec<StepFailureSummary> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Failed)
            .map(|step| {
                let (category, message) = step.last_error.as_ref().map_or_else(
                    || (FailureCategory::Unknown, String::from("failed without diagnostics")),
                    |error| (error.category, error.message.clone()),
                );
                StepFailureSummary {
                    step_id: step.id.clone(),
                    category,
                    message,
                    attempts: step.attempts,
                }
            })
            .collect()
    }

    pub fn step_ids_with_status(&self, status: StepStatus) -> Vec<String> {
        self.steps
            .iter()
            .filter(|step| step.status == status)
            .map(|step| step.id.clone())
            .collect()
    }

    /// Marks every unfinished step as cancelled and the plan as `Cancelled`.
    ///
    /// Steps that had been dispatched fail with `unknown`; steps never
    /// dispatched are skipped. Returns the ids of steps that changed.
    pub fn cancel_remaining(&mut self) -> Vec<String> {
        let mut touched = Vec::new();
        for step in &mut self.steps {
            match step.status {
                StepStatus::Pending => {
                    step.status = StepStatus::Skipped;
                    touched.push(step.id.clone());
                }
                StepStatus::Ready | StepStatus::Running | StepStatus::Retrying => {
                    step.status = StepStatus::Failed;
                    step.last_error = Some(StepError {
                        category: FailureCategory::Unknown,
                        message: "cancelled".to_string(),
                    });
                    touched.push(step.id.clone());
                }
                StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped => {}
            }
        }
        self.status = PlanStatus::Cancelled;
        touched
    }

    /// Builds the next plan version from an oracle proposal.
    ///
    /// Identity (id, goal, creation time) is kept. Steps whose definition is
    /// unchanged and that already succeeded carry their run state over; every
    /// other step starts fresh.
    pub fn supersede(&self, proposed: Plan) -> Result<Self, PlanValidationError> {
        let mut next = Self {
            id: self.id.clone(),
            goal: self.goal.clone(),
            version: self.version.saturating_add(1),
            status: PlanStatus::Running,
            created_at: self.created_at,
            steps: proposed.steps,
        };
        next.validate()?;

        for step in &mut next.steps {
            let carried = self.step(&step.id).filter(|previous| {
                previous.status == StepStatus::Succeeded && previous.same_definition(step)
            });
            match carried {
                Some(previous) => *step = previous.clone(),
                None => step.reset_run_state(),
            }
        }

        Ok(next)
    }
}
