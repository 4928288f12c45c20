use crate::config::ExecutionConfig;
use crate::error::{PlanValidationError, StepExecutionError, StepFault, StepweaverError};
use crate::planner::{
    ActionExecutor, AttemptRecord, CorrectionDecision, DependencyGraph, EscalationReason,
    FailureCategory, FixRequest, MemoryStateStore, Outcome, Plan, PlanStatus, PlanStep,
    PlanningContext, ReasoningOracle, RetryPolicy, SelfCorrectionController, StateTracker,
    StepError, StepFailureSummary, StepStatus, VerificationGate, Verifier,
};
use crate::security::approval::{ApprovalGate, GateOutcome};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_parallel_steps: usize,
    pub step_timeout: Option<Duration>,
    pub max_replans: u32,
    pub retry: RetryPolicy,
    /// Free-form workspace description handed to the oracle on replans.
    pub workspace: Option<String>,
    /// How often a live run checks the state store for a cancel request.
    pub cancel_poll: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_parallel_steps: 4,
            step_timeout: Some(Duration::from_secs(300)),
            max_replans: 1,
            retry: RetryPolicy::default(),
            workspace: None,
            cancel_poll: Duration::from_millis(250),
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_parallel_steps: config.max_parallel_steps.max(1),
            step_timeout: (config.step_timeout_secs > 0)
                .then(|| Duration::from_secs(config.step_timeout_secs)),
            max_replans: config.max_replans,
            retry: RetryPolicy::from_config(config),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub plan_id: String,
    pub version: u64,
    pub status: PlanStatus,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub failures: Vec<StepFailureSummary>,
    pub dispatches: usize,
    pub replans: u32,
    /// False once any snapshot write failed during the run.
    pub resumable: bool,
}

impl ExecutionReport {
    pub fn success(&self) -> bool {
        self.status == PlanStatus::Completed
    }
}

#[derive(Debug)]
struct WorkerEvent {
    step_id: String,
    kind: EventKind,
}

#[derive(Debug)]
enum EventKind {
    Started,
    FixApplied,
    Finished(AttemptResult),
}

#[derive(Debug)]
enum AttemptResult {
    Succeeded(Outcome),
    Failed(AttemptFailure),
    /// No fix could be obtained or applied; the step was not re-executed.
    CorrectionFailed(AttemptFailure),
}

#[derive(Debug)]
struct AttemptFailure {
    fault: StepFault,
    diagnostics: String,
    hint: Option<FailureCategory>,
}

impl From<StepFault> for AttemptFailure {
    fn from(fault: StepFault) -> Self {
        Self {
            fault,
            diagnostics: String::new(),
            hint: None,
        }
    }
}

impl From<StepExecutionError> for AttemptFailure {
    fn from(error: StepExecutionError) -> Self {
        StepFault::from(error).into()
    }
}

enum Job {
    Initial { approval: bool },
    Correct(Box<FixRequest>),
}

/// Everything a worker needs. Workers only read it and report events back;
/// the plan itself stays with the scheduler.
///
/// Each level gets its own context and channel, and a replan only happens
/// once every level has drained, so no event can outlive its plan version.
struct WorkerContext {
    plan_id: String,
    runner: Arc<dyn ActionExecutor>,
    oracle: Arc<dyn ReasoningOracle>,
    verification: Arc<VerificationGate>,
    approval: Arc<ApprovalGate>,
    step_timeout: Option<Duration>,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerContext {
    fn emit(&self, step_id: &str, kind: EventKind) {
        let event = WorkerEvent {
            step_id: step_id.to_string(),
            kind,
        };
        if self.events.send(event).is_err() {
            tracing::debug!(step_id, "scheduler gone; dropping worker event");
        }
    }

    async fn bounded<F: Future>(&self, work: F) -> Result<F::Output, StepFault> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StepFault::Cancelled),
            result = within(self.step_timeout, work) => result,
        }
    }

    async fn first_attempt(&self, step: &PlanStep, approval: bool) -> AttemptResult {
        if approval {
            let verdict = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return cancelled(),
                verdict = self.approval.check(&self.plan_id, step) => verdict,
            };
            match verdict {
                GateOutcome::Approved => {}
                GateOutcome::Rejected { reason } => {
                    return AttemptResult::Failed(StepFault::ApprovalRejected { reason }.into());
                }
                GateOutcome::TimedOut { secs } => {
                    return AttemptResult::Failed(StepFault::ApprovalTimeout { secs }.into());
                }
            }
        }

        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return cancelled();
        };
        if self.cancel.is_cancelled() {
            return cancelled();
        }

        self.emit(&step.id, EventKind::Started);
        let performed = self.bounded(self.runner.perform(step)).await;
        self.verify(step, performed).await
    }

    async fn corrective_attempt(&self, step: &PlanStep, request: FixRequest) -> AttemptResult {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return cancelled();
        };

        let fix = match self.bounded(self.oracle.propose_fix(&request)).await {
            Ok(Ok(fix)) => fix,
            Ok(Err(error)) => {
                return AttemptResult::CorrectionFailed(
                    StepExecutionError::Correction(error.to_string()).into(),
                );
            }
            Err(StepFault::Cancelled) => return cancelled(),
            Err(fault) => return AttemptResult::CorrectionFailed(fault.into()),
        };
        if let Err(error) = fix.validate() {
            return AttemptResult::CorrectionFailed(
                StepExecutionError::Correction(error.to_string()).into(),
            );
        }

        match self.bounded(self.runner.apply_fix(step, &fix)).await {
            Ok(Ok(outcome)) if outcome.success => {}
            Ok(Ok(outcome)) => {
                return AttemptResult::CorrectionFailed(AttemptFailure {
                    fault: StepExecutionError::Correction(format!(
                        "fix could not be applied: {}",
                        fix.description
                    ))
                    .into(),
                    diagnostics: outcome.diagnostics,
                    hint: outcome.category_hint,
                });
            }
            Ok(Err(error)) => {
                return AttemptResult::CorrectionFailed(
                    StepExecutionError::Correction(format!("fix could not be applied: {error:#}"))
                        .into(),
                );
            }
            Err(StepFault::Cancelled) => return cancelled(),
            Err(fault) => return AttemptResult::CorrectionFailed(fault.into()),
        }

        tracing::debug!(step_id = %step.id, fix = %fix.description, "corrective action applied");
        self.emit(&step.id, EventKind::FixApplied);
        let performed = self.bounded(self.runner.perform(step)).await;
        self.verify(step, performed).await
    }

    async fn verify(
        &self,
        step: &PlanStep,
        performed: Result<anyhow::Result<Outcome>, StepFault>,
    ) -> AttemptResult {
        let outcome = match performed {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                return AttemptResult::Failed(
                    StepExecutionError::Executor(format!("{error:#}")).into(),
                );
            }
            Err(fault) => return AttemptResult::Failed(fault.into()),
        };

        match self.verification.evaluate(step, &outcome).await {
            Ok(()) => AttemptResult::Succeeded(outcome),
            Err(fault) => AttemptResult::Failed(AttemptFailure {
                fault,
                diagnostics: outcome.diagnostics,
                hint: outcome.category_hint,
            }),
        }
    }
}

fn cancelled() -> AttemptResult {
    AttemptResult::Failed(StepFault::Cancelled.into())
}

async fn within<F: Future>(limit: Option<Duration>, work: F) -> Result<F::Output, StepFault> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
            StepExecutionError::TimedOut {
                secs: limit.as_secs(),
            }
            .into()
        }),
        None => Ok(work.await),
    }
}

async fn run_job(ctx: Arc<WorkerContext>, step: PlanStep, job: Job) {
    let result = match job {
        Job::Initial { approval } => ctx.first_attempt(&step, approval).await,
        Job::Correct(request) => ctx.corrective_attempt(&step, *request).await,
    };
    ctx.emit(&step.id, EventKind::Finished(result));
}

#[derive(Debug)]
struct RunState {
    dispatches: usize,
    replans: u32,
    resumable: bool,
}

/// Drives a plan level by level with a bounded pool of workers.
///
/// The scheduler is the only writer of plan state. Workers report
/// `WorkerEvent`s over a channel and the scheduler applies them, persisting
/// a snapshot after every transition.
pub struct PlanExecutor {
    runner: Arc<dyn ActionExecutor>,
    oracle: Arc<dyn ReasoningOracle>,
    verification: Arc<VerificationGate>,
    approval: Arc<ApprovalGate>,
    state: StateTracker,
    controller: SelfCorrectionController,
    settings: ExecutorSettings,
}

impl PlanExecutor {
    pub fn new(
        runner: Arc<dyn ActionExecutor>,
        oracle: Arc<dyn ReasoningOracle>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        let settings = ExecutorSettings::default();
        Self {
            runner,
            oracle,
            verification: Arc::new(VerificationGate::new(verifier)),
            approval: Arc::new(ApprovalGate::auto()),
            state: StateTracker::new(Arc::new(MemoryStateStore::new())),
            controller: SelfCorrectionController::new(settings.retry),
            settings,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.controller = SelfCorrectionController::new(settings.retry);
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_approval(mut self, approval: ApprovalGate) -> Self {
        self.approval = Arc::new(approval);
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: StateTracker) -> Self {
        self.state = state;
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    /// Runs `plan` to a terminal status.
    ///
    /// Only validation errors are returned; step failures end up in the
    /// report. Cancelling `cancel`, or a cancel request left in the state
    /// store for this plan, stops dispatching, interrupts running steps and
    /// marks the plan `Cancelled`.
    pub async fn execute(
        &self,
        plan: &mut Plan,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport, PlanValidationError> {
        let mut graph = plan.validate()?;
        let mut run = RunState {
            dispatches: 0,
            replans: 0,
            resumable: true,
        };

        if plan.status == PlanStatus::Cancelled {
            tracing::warn!(plan_id = %plan.id, "plan already cancelled; nothing to execute");
            return Ok(Self::report(plan, &run));
        }

        self.clear_cancel_request(&plan.id);
        let cancel = cancel.child_token();
        let _watch = self
            .state
            .watch_cancel(&plan.id, cancel.clone(), self.settings.cancel_poll);

        plan.status = PlanStatus::Running;
        tracing::info!(
            plan_id = %plan.id,
            version = plan.version,
            steps = plan.steps.len(),
            "plan execution started"
        );
        self.persist(plan, &mut run);

        loop {
            for level in graph.levels() {
                if cancel.is_cancelled() {
                    break;
                }
                self.run_level(plan, &graph, &level, &cancel, &mut run)
                    .await;
            }
            if cancel.is_cancelled() {
                break;
            }

            plan.status = plan.derive_status();
            if plan.status != PlanStatus::Failed || run.replans >= self.settings.max_replans {
                break;
            }
            let Some(next) = self.replan(plan, &cancel).await else {
                break;
            };
            *plan = next;
            graph = plan.validate()?;
            run.replans += 1;
            tracing::info!(plan_id = %plan.id, version = plan.version, "replanned after failure");
            self.persist(plan, &mut run);
        }

        if cancel.is_cancelled() {
            let touched = plan.cancel_remaining();
            tracing::warn!(plan_id = %plan.id, steps = touched.len(), "plan cancelled");
        }

        self.persist(plan, &mut run);
        self.clear_cancel_request(&plan.id);
        let report = Self::report(plan, &run);
        tracing::info!(
            plan_id = %report.plan_id,
            status = %report.status,
            completed = report.completed_steps.len(),
            failed = report.failed_steps.len(),
            skipped = report.skipped_steps.len(),
            "plan execution finished"
        );
        Ok(report)
    }

    /// Loads the stored snapshot for `plan_id` and continues it.
    pub async fn resume(
        &self,
        plan_id: &str,
        live: Option<&Plan>,
        cancel: CancellationToken,
    ) -> crate::error::Result<(Plan, ExecutionReport)> {
        let mut plan = self.state.load_for_resume(plan_id, live)?;
        tracing::info!(
            plan_id,
            version = plan.version,
            done = plan.step_ids_with_status(StepStatus::Succeeded).len(),
            "resuming plan"
        );
        let report = self
            .execute(&mut plan, cancel)
            .await
            .map_err(StepweaverError::from)?;
        Ok((plan, report))
    }

    async fn run_level(
        &self,
        plan: &mut Plan,
        graph: &DependencyGraph,
        level: &[String],
        cancel: &CancellationToken,
        run: &mut RunState,
    ) {
        let (events, mut inbox) = mpsc::unbounded_channel();
        let ctx = Arc::new(WorkerContext {
            plan_id: plan.id.clone(),
            runner: Arc::clone(&self.runner),
            oracle: Arc::clone(&self.oracle),
            verification: Arc::clone(&self.verification),
            approval: Arc::clone(&self.approval),
            step_timeout: self.settings.step_timeout,
            cancel: cancel.clone(),
            permits: Arc::new(Semaphore::new(self.settings.max_parallel_steps.max(1))),
            events,
        });

        let mut in_flight = 0_usize;
        for step_id in level {
            let Some(step) = plan.step(step_id) else {
                continue;
            };
            if step.status != StepStatus::Pending {
                continue;
            }
            if !plan.dependencies_satisfied(step) {
                if let Some(step) = plan.step_mut(step_id) {
                    step.status = StepStatus::Skipped;
                }
                tracing::info!(plan_id = %plan.id, step_id, "dependency unmet; step skipped");
                self.persist(plan, run);
                continue;
            }

            let approval = step.attempts == 0 && step.history.is_empty();
            let Some(step) = plan.step_mut(step_id) else {
                continue;
            };
            step.status = StepStatus::Ready;
            let dispatched = step.clone();
            self.persist(plan, run);
            self.spawn_job(&ctx, dispatched, Job::Initial { approval });
            run.dispatches += 1;
            in_flight += 1;
        }

        while in_flight > 0 {
            let Some(event) = inbox.recv().await else {
                break;
            };
            match event.kind {
                EventKind::Started | EventKind::FixApplied => {
                    self.mark_running(plan, &event.step_id, run);
                }
                EventKind::Finished(result) => {
                    if !self.settle(plan, graph, &ctx, &event.step_id, result, run) {
                        in_flight -= 1;
                    }
                }
            }
        }
    }

    fn spawn_job(&self, ctx: &Arc<WorkerContext>, step: PlanStep, job: Job) {
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            let step_id = step.id.clone();
            let worker = tokio::spawn(run_job(Arc::clone(&ctx), step, job));
            if let Err(error) = worker.await {
                tracing::error!(%step_id, %error, "step worker aborted");
                ctx.emit(
                    &step_id,
                    EventKind::Finished(AttemptResult::Failed(
                        StepExecutionError::Executor(format!("worker aborted: {error}")).into(),
                    )),
                );
            }
        });
    }

    fn mark_running(&self, plan: &mut Plan, step_id: &str, run: &mut RunState) {
        let Some(step) = plan.step_mut(step_id) else {
            return;
        };
        step.status = StepStatus::Running;
        step.attempts = step.attempts.saturating_add(1);
        tracing::info!(step_id, attempt = step.attempts, "step running");
        self.persist(plan, run);
    }

    /// Applies a finished attempt. Returns true when a corrective attempt
    /// was dispatched and the step is still in flight.
    fn settle(
        &self,
        plan: &mut Plan,
        graph: &DependencyGraph,
        ctx: &Arc<WorkerContext>,
        step_id: &str,
        result: AttemptResult,
        run: &mut RunState,
    ) -> bool {
        let (failure, correction_failed) = match result {
            AttemptResult::Succeeded(outcome) => {
                if let Some(step) = plan.step_mut(step_id) {
                    step.status = StepStatus::Succeeded;
                    step.last_error = None;
                    tracing::info!(
                        step_id,
                        attempt = step.attempts,
                        artifacts = outcome.artifacts.len(),
                        "step succeeded"
                    );
                }
                self.persist(plan, run);
                return false;
            }
            AttemptResult::Failed(failure) => (failure, false),
            AttemptResult::CorrectionFailed(failure) => (failure, true),
        };

        let Some(step) = plan.step_mut(step_id) else {
            return false;
        };

        let category = if correction_failed {
            step.attempts = step.attempts.saturating_add(1);
            step.last_error.as_ref().map_or_else(
                || {
                    SelfCorrectionController::classify(
                        &failure.fault,
                        &failure.diagnostics,
                        failure.hint,
                    )
                },
                |previous| previous.category,
            )
        } else {
            SelfCorrectionController::classify(&failure.fault, &failure.diagnostics, failure.hint)
        };

        let message = failure.fault.to_string();
        step.history.push(AttemptRecord {
            attempt: step.attempts,
            category,
            message: message.clone(),
        });
        step.last_error = Some(StepError {
            category,
            message: message.clone(),
        });

        let decision = if ctx.cancel.is_cancelled() {
            CorrectionDecision::Terminal(EscalationReason::NonRetryable)
        } else {
            self.controller.decide(step, category)
        };

        match decision {
            CorrectionDecision::Retry => {
                step.status = StepStatus::Retrying;
                if category == FailureCategory::TimeoutOrResource {
                    step.resource_retries = step.resource_retries.saturating_add(1);
                }
                let diagnostics = if failure.diagnostics.trim().is_empty() {
                    message
                } else {
                    failure.diagnostics
                };
                let request = FixRequest {
                    step: step.clone(),
                    failure_category: category,
                    diagnostics,
                    prior_attempts: step.history.clone(),
                };
                let retried = step.clone();
                tracing::info!(
                    step_id,
                    attempt = retried.attempts,
                    %category,
                    "step failed; requesting corrective action"
                );
                self.persist(plan, run);
                self.spawn_job(ctx, retried, Job::Correct(Box::new(request)));
                run.dispatches += 1;
                true
            }
            CorrectionDecision::Terminal(reason) => {
                let tolerated = step.skip_tolerant && failure.fault != StepFault::Cancelled;
                tracing::warn!(
                    step_id,
                    attempt = step.attempts,
                    %category,
                    reason = reason.as_str(),
                    error = %message,
                    "step failed terminally"
                );
                Self::conclude_failure(plan, graph, step_id, tolerated);
                self.persist(plan, run);
                false
            }
        }
    }

    fn conclude_failure(plan: &mut Plan, graph: &DependencyGraph, step_id: &str, tolerated: bool) {
        let Some(step) = plan.step_mut(step_id) else {
            return;
        };
        if tolerated {
            step.status = StepStatus::Skipped;
            tracing::info!(step_id, "skip-tolerant step skipped; dependents proceed");
            return;
        }

        step.status = StepStatus::Failed;
        for dependent in graph.transitive_dependents(step_id) {
            if let Some(downstream) = plan.step_mut(&dependent) {
                if !downstream.status.is_terminal() {
                    downstream.status = StepStatus::Skipped;
                    tracing::info!(step_id = %dependent, failed = step_id, "dependent skipped");
                }
            }
        }
    }

    async fn replan(&self, plan: &Plan, cancel: &CancellationToken) -> Option<Plan> {
        let context = PlanningContext {
            workspace: self.settings.workspace.clone(),
            prior_plan: Some(plan.clone()),
            failures: plan.terminal_failures(),
        };

        let proposal = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            proposal = self.oracle.propose_plan(&plan.goal, &context) => proposal,
        };

        match proposal {
            Ok(proposed) => match plan.supersede(proposed) {
                Ok(next) => Some(next),
                Err(error) => {
                    tracing::warn!(plan_id = %plan.id, %error, "oracle proposed an invalid plan");
                    None
                }
            },
            Err(error) => {
                tracing::warn!(plan_id = %plan.id, %error, "replanning unavailable");
                None
            }
        }
    }

    fn clear_cancel_request(&self, plan_id: &str) {
        if let Err(error) = self.state.store().clear_cancel(plan_id) {
            tracing::debug!(plan_id, %error, "could not clear cancel request");
        }
    }

    fn persist(&self, plan: &Plan, run: &mut RunState) {
        if let Err(error) = self.state.persist(plan) {
            if run.resumable {
                tracing::warn!(plan_id = %plan.id, %error, "snapshot write failed; run is no longer resumable");
            }
            run.resumable = false;
        }
    }

    fn report(plan: &Plan, run: &RunState) -> ExecutionReport {
        ExecutionReport {
            plan_id: plan.id.clone(),
            version: plan.version,
            status: plan.status,
            completed_steps: plan.step_ids_with_status(StepStatus::Succeeded),
            failed_steps: plan.step_ids_with_status(StepStatus::Failed),
            skipped_steps: plan.step_ids_with_status(StepStatus::Skipped),
            failures: plan.terminal_failures(),
            dispatches: run.dispatches,
            replans: run.replans,
            resumable: run.resumable,
        }
    }
}
