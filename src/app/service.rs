use crate::config::Config;
use crate::error::{OracleError, PersistenceError, PlanValidationError, StepweaverError};
use crate::planner::{
    ExecutionReport, ExecutorSettings, FileStateStore, Plan, PlanExecutor, PlanSnapshot,
    PlanStatus, PlanningContext, ReasoningOracle, StateTracker,
};
use crate::runtime::{BuiltinVerifier, WorkspaceActionExecutor, create_oracle};
use crate::security::{ApprovalBroker, ApprovalGate};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a submit or resume request.
#[derive(Debug)]
pub enum RunOutcome {
    Finished { plan: Plan, report: ExecutionReport },
    Rejected(PlanValidationError),
}

impl RunOutcome {
    /// `0` completed, `1` failed or cancelled, `2` rejected before execution.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Finished { report, .. } if report.success() => 0,
            Self::Finished { .. } => 1,
            Self::Rejected(_) => 2,
        }
    }
}

/// Entry point for the operations exposed by the binary.
pub struct PlanService {
    executor: PlanExecutor,
    oracle: Arc<dyn ReasoningOracle>,
}

impl PlanService {
    pub fn new(executor: PlanExecutor, oracle: Arc<dyn ReasoningOracle>) -> Self {
        Self { executor, oracle }
    }

    /// Wires the workspace runtime, configured oracle, file store and
    /// approval gate together.
    pub fn from_config(config: &Config, broker: Arc<dyn ApprovalBroker>) -> Self {
        let workspace = config.workspace_dir.clone();
        let oracle = create_oracle(&config.oracle);
        let runner = WorkspaceActionExecutor::new(&workspace)
            .with_editor_command(config.execution.editor_command.clone());

        let mut settings = ExecutorSettings::from_config(&config.execution);
        settings.workspace = Some(workspace.display().to_string());

        let executor = PlanExecutor::new(
            Arc::new(runner),
            Arc::clone(&oracle),
            Arc::new(BuiltinVerifier::new(&workspace)),
        )
        .with_settings(settings)
        .with_approval(ApprovalGate::from_config(&config.approval, broker))
        .with_state(StateTracker::new(Arc::new(FileStateStore::new(
            config.resolved_state_dir(),
        ))));

        Self::new(executor, oracle)
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.executor
    }

    pub async fn submit(&self, mut plan: Plan, cancel: CancellationToken) -> RunOutcome {
        match self.executor.execute(&mut plan, cancel).await {
            Ok(report) => RunOutcome::Finished { plan, report },
            Err(error) => {
                tracing::warn!(plan_id = %plan.id, %error, "plan rejected");
                RunOutcome::Rejected(error)
            }
        }
    }

    /// Asks the oracle for a plan achieving `goal`, then executes it. A
    /// proposal that fails validation is `Rejected` like an authored plan.
    pub async fn submit_goal(&self, goal: &str, cancel: CancellationToken) -> Result<RunOutcome> {
        let context = PlanningContext {
            workspace: self.executor.settings().workspace.clone(),
            ..PlanningContext::default()
        };
        let plan = tokio::select! {
            biased;
            () = cancel.cancelled() => anyhow::bail!("cancelled while waiting for a plan"),
            proposed = self.oracle.propose_plan(goal, &context) => match proposed {
                Ok(plan) => plan,
                Err(OracleError::InvalidPlan(error)) => {
                    tracing::warn!(goal, %error, "oracle proposal rejected");
                    return Ok(RunOutcome::Rejected(error));
                }
                Err(error) => return Err(error.into()),
            },
        };
        tracing::info!(plan_id = %plan.id, steps = plan.steps.len(), "oracle proposed plan");
        Ok(self.submit(plan, cancel).await)
    }

    /// Continues the stored plan `plan_id`, optionally checking it against
    /// the live definition it was started from.
    pub async fn resume(
        &self,
        plan_id: &str,
        live: Option<&Plan>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        match self.executor.resume(plan_id, live, cancel).await {
            Ok((plan, report)) => Ok(RunOutcome::Finished { plan, report }),
            Err(StepweaverError::Validation(error)) => Ok(RunOutcome::Rejected(error)),
            Err(error) => Err(error.into()),
        }
    }

    /// Marks a stored plan cancelled. Unfinished steps are skipped and the
    /// plan can no longer be resumed. A run still executing the plan picks
    /// up the request from the store and stops itself.
    pub fn cancel(&self, plan_id: &str) -> Result<Plan> {
        let store = self.executor.state().store();
        let mut plan = store
            .load(plan_id)?
            .ok_or_else(|| PersistenceError::NotFound(plan_id.to_string()))?
            .plan;

        if plan.status.is_terminal() && plan.status != PlanStatus::Failed {
            tracing::info!(plan_id, status = %plan.status, "plan already finished; nothing to cancel");
            return Ok(plan);
        }

        store.request_cancel(plan_id)?;
        let touched = plan.cancel_remaining();
        self.executor.state().persist(&plan)?;
        tracing::info!(plan_id, steps = touched.len(), "plan cancelled");
        Ok(plan)
    }

    pub fn status(&self, plan_id: &str) -> Result<PlanSnapshot> {
        let snapshot = self
            .executor
            .state()
            .store()
            .load(plan_id)?
            .ok_or_else(|| PersistenceError::NotFound(plan_id.to_string()))?;
        Ok(snapshot)
    }

    pub fn list(&self) -> Result<Vec<PlanSnapshot>> {
        Ok(self.executor.state().store().list()?)
    }
}
