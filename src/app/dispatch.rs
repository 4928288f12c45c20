use crate::app::service::{PlanService, RunOutcome};
use crate::app::status::{render_levels, render_overview, render_plan, render_report};
use crate::cli::{Cli, Commands};
use crate::config::{ApprovalMode, Config};
use crate::planner::{Plan, PlanParser};
use crate::security::{ApprovalBroker, AutoApproveBroker, CliApprovalBroker};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs one CLI command and returns the process exit code.
pub async fn dispatch(cli: Cli, config: Config) -> Result<u8> {
    match cli.command {
        Commands::Validate { plan } => {
            let plan = match read_plan(&plan) {
                Ok(plan) => plan,
                Err(code) => return Ok(code),
            };
            println!("Plan {} is valid ({} steps)", plan.id, plan.steps.len());
            print!("{}", render_levels(&plan.levels()?));
            Ok(0)
        }

        Commands::Submit { plan, goal } => {
            let service = build_service(&config);
            let cancel = cancel_on_ctrl_c();
            let outcome = match (plan, goal) {
                (Some(path), _) => {
                    let plan = match read_plan(&path) {
                        Ok(plan) => plan,
                        Err(code) => return Ok(code),
                    };
                    info!(plan_id = %plan.id, path = %path.display(), "submitting plan");
                    service.submit(plan, cancel).await
                }
                (None, Some(goal)) => service.submit_goal(&goal, cancel).await?,
                (None, None) => anyhow::bail!("submit needs a plan file or --goal"),
            };
            Ok(finish(&outcome))
        }

        Commands::Resume { plan_id, plan } => {
            let live = match plan.as_deref().map(read_plan).transpose() {
                Ok(live) => live,
                Err(code) => return Ok(code),
            };
            let service = build_service(&config);
            let outcome = service
                .resume(&plan_id, live.as_ref(), cancel_on_ctrl_c())
                .await?;
            Ok(finish(&outcome))
        }

        Commands::Cancel { plan_id } => {
            let plan = build_service(&config).cancel(&plan_id)?;
            print!("{}", render_plan(&plan));
            Ok(0)
        }

        Commands::Status { plan_id } => {
            let service = build_service(&config);
            match plan_id {
                Some(id) => print!("{}", render_plan(&service.status(&id)?.plan)),
                None => print!("{}", render_overview(&config, &service.list()?)),
            }
            Ok(0)
        }
    }
}

fn build_service(config: &Config) -> PlanService {
    let broker: Arc<dyn ApprovalBroker> = match config.approval.policy {
        ApprovalMode::Auto => Arc::new(AutoApproveBroker),
        ApprovalMode::Manual | ApprovalMode::RiskBased => Arc::new(CliApprovalBroker::new()),
    };
    PlanService::from_config(config, broker)
}

/// Reads and parses a plan file. Rejections are printed and mapped to exit
/// code 2; unreadable files to 1.
fn read_plan(path: &Path) -> std::result::Result<Plan, u8> {
    let contents = match std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {}", path.display()))
    {
        Ok(contents) => contents,
        Err(error) => {
            eprintln!("error: {error:#}");
            return Err(1);
        }
    };
    PlanParser::parse(&contents).map_err(|error| {
        eprintln!("plan rejected: {error}");
        2
    })
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling plan");
            token.cancel();
        }
    });
    cancel
}

fn finish(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Finished { plan, report } => {
            print!("{}", render_plan(plan));
            print!("{}", render_report(report));
        }
        RunOutcome::Rejected(error) => eprintln!("plan rejected: {error}"),
    }
    outcome.exit_code()
}
