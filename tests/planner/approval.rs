use std::sync::Arc;
use std::time::Duration;

use stepweaver::planner::{ActionKind, FailureCategory, PlanStatus, PlanStep, StepStatus};
use stepweaver::security::{
    ActionKindRiskAssessor, ApprovalGate, ApprovalPolicy, ChannelApprovalBroker,
};
use tokio_util::sync::CancellationToken;

use crate::scripted::{ScriptedOracle, ScriptedRunner, executor, plan, step};

fn gate(policy: ApprovalPolicy, broker: ChannelApprovalBroker, timeout: Duration) -> ApprovalGate {
    ApprovalGate::new(
        policy,
        Arc::new(ActionKindRiskAssessor),
        Arc::new(broker),
        Some(timeout),
    )
}

#[tokio::test]
async fn approval_timeout_fails_step_without_consuming_attempts() {
    let (broker, _sender) = ChannelApprovalBroker::new();
    let runner = Arc::new(ScriptedRunner::new());
    let mut plan = plan("gated", vec![step("deploy", &[]), step("smoke", &["deploy"])]);

    let report = executor(Arc::clone(&runner), Arc::new(ScriptedOracle::new()))
        .with_approval(gate(ApprovalPolicy::Manual, broker, Duration::from_millis(50)))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PlanStatus::Failed);
    let deploy = plan.step("deploy").unwrap();
    assert_eq!(deploy.status, StepStatus::Failed);
    assert_eq!(deploy.attempts, 0);
    let error = deploy.last_error.as_ref().unwrap();
    assert_eq!(error.category, FailureCategory::Unknown);
    assert!(error.message.contains("approval timed out"));

    assert_eq!(plan.step("smoke").unwrap().status, StepStatus::Skipped);
    assert!(runner.log().is_empty());
}

#[tokio::test]
async fn channel_decisions_gate_each_step() {
    let (broker, sender) = ChannelApprovalBroker::new();
    sender.approve("build");
    sender.reject("publish", "release freeze");

    let runner = Arc::new(ScriptedRunner::new());
    let mut plan = plan("release", vec![step("build", &[]), step("publish", &["build"])]);

    let report = executor(Arc::clone(&runner), Arc::new(ScriptedOracle::new()))
        .with_approval(gate(ApprovalPolicy::Manual, broker, Duration::from_secs(5)))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PlanStatus::Failed);
    assert_eq!(plan.step("build").unwrap().status, StepStatus::Succeeded);

    let publish = plan.step("publish").unwrap();
    assert_eq!(publish.status, StepStatus::Failed);
    assert_eq!(publish.attempts, 0);
    assert!(
        publish
            .last_error
            .as_ref()
            .unwrap()
            .message
            .contains("release freeze")
    );
    assert_eq!(runner.performed(), vec!["build"]);
}

#[tokio::test]
async fn risk_based_policy_only_asks_for_risky_steps() {
    let (broker, sender) = ChannelApprovalBroker::new();
    let runner = Arc::new(ScriptedRunner::new());
    let mut plan = plan(
        "cleanup",
        vec![
            PlanStep::new("check", ActionKind::Test, "run checks").with_targets(["make check"]),
            PlanStep::new("purge", ActionKind::Delete, "remove build output")
                .with_targets(["target"])
                .with_dependencies(["check"]),
        ],
    );

    let approver = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.approve("purge");
    });

    let report = executor(Arc::clone(&runner), Arc::new(ScriptedOracle::new()))
        .with_approval(gate(
            ApprovalPolicy::RiskBased { threshold: 0.8 },
            broker,
            Duration::from_secs(5),
        ))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();
    approver.await.unwrap();

    assert!(report.success());
    assert_eq!(runner.performed(), vec!["check", "purge"]);
}
