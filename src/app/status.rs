use crate::config::Config;
use crate::planner::{ExecutionReport, Plan, PlanSnapshot, StepStatus};
use std::fmt::Write;

pub fn render_overview(config: &Config, snapshots: &[PlanSnapshot]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "◆ stepweaver {}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "  workspace  {}", config.workspace_dir.display());
    let _ = writeln!(out, "  state      {}", config.resolved_state_dir().display());
    let _ = writeln!(out, "  oracle     {}", config.oracle.endpoint.as_deref().unwrap_or("(none)"));
    let _ = writeln!(out, "  approval   {}", config.approval.policy);
    let _ = writeln!(out);

    if snapshots.is_empty() {
        let _ = writeln!(out, "No stored plans.");
        return out;
    }

    for snapshot in snapshots {
        let plan = &snapshot.plan;
        let done = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .count();
        let _ = writeln!(
            out,
            "  {:<24} v{:<3} {:<10} {done}/{} steps  saved {}",
            plan.id,
            plan.version,
            plan.status.to_string(),
            plan.steps.len(),
            snapshot.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    out
}

pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Plan {} (v{}) {}", plan.id, plan.version, plan.status);
    let _ = writeln!(out, "Goal: {}", plan.goal);
    for step in &plan.steps {
        let marker = match step.status {
            StepStatus::Succeeded => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Skipped => "-",
            StepStatus::Running | StepStatus::Ready | StepStatus::Retrying => "…",
            StepStatus::Pending => " ",
        };
        let _ = write!(
            out,
            "  [{marker}] {:<16} {:<7} {:<10} attempts={}",
            step.id,
            step.action_kind.to_string(),
            step.status.to_string(),
            step.attempts
        );
        if let Some(error) = &step.last_error {
            let _ = write!(out, "  {}: {}", error.category, error.message);
        }
        let _ = writeln!(out);
    }
    out
}

pub fn render_report(report: &ExecutionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Plan {} finished {} after {} dispatches ({} replans)",
        report.plan_id, report.status, report.dispatches, report.replans
    );
    let _ = writeln!(
        out,
        "  completed {}  failed {}  skipped {}",
        report.completed_steps.len(),
        report.failed_steps.len(),
        report.skipped_steps.len()
    );
    for failure in &report.failures {
        let _ = writeln!(
            out,
            "  {} [{}] after {} attempts: {}",
            failure.step_id, failure.category, failure.attempts, failure.message
        );
    }
    if !report.resumable {
        let _ = writeln!(out, "  warning: state snapshots failed; this run cannot be resumed");
    }
    out
}

/// Dependency levels, one line per level.
pub fn render_levels(levels: &[Vec<String>]) -> String {
    let mut out = String::new();
    for (index, level) in levels.iter().enumerate() {
        let _ = writeln!(out, "level {index}: {}", level.join(", "));
    }
    out
}
