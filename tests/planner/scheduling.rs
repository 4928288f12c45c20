use std::sync::Arc;
use std::time::Duration;

use stepweaver::error::PlanValidationError;
use stepweaver::planner::{ExecutorSettings, PlanStatus, StepStatus};
use tokio_util::sync::CancellationToken;

use crate::scripted::{ScriptedOracle, ScriptedRunner, executor, plan, step};

#[tokio::test]
async fn diamond_plan_runs_level_by_level() {
    let runner = Arc::new(ScriptedRunner::new());
    let mut plan = plan(
        "diamond",
        vec![
            step("S1", &[]),
            step("S2", &["S1"]),
            step("S3", &["S1"]),
            step("S4", &["S2", "S3"]),
        ],
    );

    assert_eq!(
        plan.levels().unwrap(),
        vec![
            vec!["S1".to_string()],
            vec!["S2".to_string(), "S3".to_string()],
            vec!["S4".to_string()],
        ]
    );

    let report = executor(Arc::clone(&runner), Arc::new(ScriptedOracle::new()))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(report.dispatches, 4);

    let performed = runner.performed();
    assert_eq!(performed.first().map(String::as_str), Some("S1"));
    assert_eq!(performed.last().map(String::as_str), Some("S4"));
    assert!(plan.steps.iter().all(|s| s.attempts == 1));
}

#[tokio::test]
async fn no_step_starts_before_its_dependencies_succeed() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .slow("base", Duration::from_millis(40))
            .slow("side", Duration::from_millis(5)),
    );
    let mut plan = plan(
        "ordering",
        vec![
            step("base", &[]),
            step("side", &[]),
            step("top", &["base", "side"]),
            step("leaf", &["top"]),
        ],
    );

    executor(Arc::clone(&runner), Arc::new(ScriptedOracle::new()))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    let performed = runner.performed();
    let position = |id: &str| performed.iter().position(|p| p == id).unwrap();
    assert!(position("top") > position("base"));
    assert!(position("top") > position("side"));
    assert!(position("leaf") > position("top"));
}

#[tokio::test]
async fn parallelism_is_bounded() {
    let runner = Arc::new(ScriptedRunner::with_delay(Duration::from_millis(30)));
    let steps = (0..6).map(|i| step(&format!("w{i}"), &[])).collect();
    let mut plan = plan("wide", steps);

    let report = executor(Arc::clone(&runner), Arc::new(ScriptedOracle::new()))
        .with_settings(ExecutorSettings {
            max_parallel_steps: 2,
            ..ExecutorSettings::default()
        })
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(runner.performed().len(), 6);
    assert!(runner.peak_concurrency() <= 2);
    assert!(runner.peak_concurrency() >= 1);
}

#[tokio::test]
async fn cycle_is_rejected_before_any_dispatch() {
    let runner = Arc::new(ScriptedRunner::new());
    let mut plan = plan("acyclic", vec![step("S1", &[]), step("S2", &["S1"])]);
    plan.steps[0].depends_on = vec!["S2".into()];

    let error = executor(Arc::clone(&runner), Arc::new(ScriptedOracle::new()))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        error,
        PlanValidationError::Cycle {
            members: vec!["S1".into(), "S2".into()]
        }
    );
    assert!(runner.log().is_empty());
    assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
}
