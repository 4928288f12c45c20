use std::sync::Arc;

use stepweaver::planner::{Outcome, PlanStatus, StepStatus};
use tokio_util::sync::CancellationToken;

use crate::scripted::{ScriptedOracle, ScriptedRunner, executor, plan, step};

#[tokio::test]
async fn terminal_failure_triggers_replan_that_carries_over_succeeded_steps() {
    let runner = Arc::new(
        ScriptedRunner::new().script("b", vec![Outcome::failed("segmentation fault")]),
    );
    let revised = plan(
        "proposal",
        vec![step("a", &[]), step("b-alt", &["a"]), step("c", &["b-alt"])],
    );
    let oracle = Arc::new(ScriptedOracle::new().with_plan(revised));
    let mut plan = plan("evolving", vec![step("a", &[]), step("b", &["a"])]);

    let report = executor(Arc::clone(&runner), Arc::clone(&oracle))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(report.replans, 1);
    assert_eq!(report.version, 2);
    assert_eq!(plan.id, "evolving");
    assert_eq!(plan.version, 2);
    assert!(plan.step("b").is_none());

    assert_eq!(runner.perform_count("a"), 1);
    assert_eq!(runner.performed(), vec!["a", "b", "b-alt", "c"]);
    assert_eq!(plan.step("a").unwrap().attempts, 1);

    let contexts = oracle.plan_contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].failures.len(), 1);
    assert_eq!(contexts[0].failures[0].step_id, "b");
    assert_eq!(
        contexts[0].prior_plan.as_ref().map(|p| p.version),
        Some(1)
    );
}

#[tokio::test]
async fn replans_are_bounded() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .script("b", vec![Outcome::failed("segmentation fault")])
            .script("b2", vec![Outcome::failed("segmentation fault")]),
    );
    let oracle = Arc::new(
        ScriptedOracle::new()
            .with_plan(plan("p", vec![step("a", &[]), step("b2", &["a"])]))
            .with_plan(plan("p", vec![step("a", &[]), step("b3", &["a"])])),
    );
    let mut plan = plan("bounded", vec![step("a", &[]), step("b", &["a"])]);

    let report = executor(Arc::clone(&runner), Arc::clone(&oracle))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PlanStatus::Failed);
    assert_eq!(report.replans, 1);
    assert_eq!(oracle.plan_contexts().len(), 1);
    assert_eq!(plan.step("b2").unwrap().status, StepStatus::Failed);
    assert_eq!(runner.perform_count("b3"), 0);
}

#[tokio::test]
async fn changed_definition_is_not_carried_over() {
    let runner = Arc::new(
        ScriptedRunner::new().script("b", vec![Outcome::failed("segmentation fault")]),
    );
    let mut changed_a = step("a", &[]);
    changed_a.description = "step a, revised".into();
    let oracle = Arc::new(
        ScriptedOracle::new().with_plan(plan("p", vec![changed_a, step("c", &["a"])])),
    );
    let mut plan = plan("rewrite", vec![step("a", &[]), step("b", &["a"])]);

    let report = executor(Arc::clone(&runner), Arc::clone(&oracle))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(runner.perform_count("a"), 2);
}
