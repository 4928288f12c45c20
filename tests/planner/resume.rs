use std::sync::Arc;

use stepweaver::StepweaverError;
use stepweaver::error::PersistenceError;
use stepweaver::planner::{
    FileStateStore, Plan, PlanExecutor, PlanStatus, StateStore, StateTracker, StepStatus,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::scripted::{ContainsVerifier, ScriptedOracle, ScriptedRunner, plan, step};

fn file_executor(runner: Arc<ScriptedRunner>, dir: &TempDir) -> PlanExecutor {
    PlanExecutor::new(runner, Arc::new(ScriptedOracle::new()), Arc::new(ContainsVerifier))
        .with_state(StateTracker::new(Arc::new(FileStateStore::new(dir.path()))))
}

fn pipeline() -> Plan {
    plan(
        "pipeline",
        vec![step("fetch", &[]), step("build", &["fetch"]), step("test", &["build"])],
    )
}

/// Snapshot as it would look if the process died while `build` was running.
fn interrupted(dir: &TempDir) -> Plan {
    let mut plan = pipeline();
    plan.status = PlanStatus::Running;
    let fetch = plan.step_mut("fetch").unwrap();
    fetch.status = StepStatus::Succeeded;
    fetch.attempts = 1;
    let build = plan.step_mut("build").unwrap();
    build.status = StepStatus::Running;
    build.attempts = 1;

    StateTracker::new(Arc::new(FileStateStore::new(dir.path())))
        .persist(&plan)
        .unwrap();
    plan
}

#[tokio::test]
async fn resumed_run_matches_uninterrupted_run() {
    let reference_dir = TempDir::new().unwrap();
    let mut reference = pipeline();
    let reference_report = file_executor(Arc::new(ScriptedRunner::new()), &reference_dir)
        .execute(&mut reference, CancellationToken::new())
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    interrupted(&dir);
    let runner = Arc::new(ScriptedRunner::new());
    let (resumed, report) = file_executor(Arc::clone(&runner), &dir)
        .resume("pipeline", Some(&pipeline()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(runner.performed(), vec!["build", "test"]);
    assert_eq!(report.status, reference_report.status);
    assert_eq!(report.completed_steps, reference_report.completed_steps);
    for (left, right) in resumed.steps.iter().zip(&reference.steps) {
        assert_eq!(left.status, right.status, "step {}", left.id);
        assert_eq!(left.attempts, right.attempts, "step {}", left.id);
    }
}

#[tokio::test]
async fn snapshot_survives_a_new_store_instance() {
    let dir = TempDir::new().unwrap();
    let saved = interrupted(&dir);

    let reopened = FileStateStore::new(dir.path());
    let loaded = reopened.load("pipeline").unwrap().unwrap();
    assert_eq!(loaded.plan.id, saved.id);
    assert_eq!(loaded.plan.version, saved.version);
    assert_eq!(loaded.plan.step("build").unwrap().status, StepStatus::Running);
    assert_eq!(reopened.list().unwrap().len(), 1);
}

#[tokio::test]
async fn resume_rejects_changed_definition() {
    let dir = TempDir::new().unwrap();
    interrupted(&dir);

    let mut live = pipeline();
    live.steps[1].targets = vec!["make release".into()];

    let error = file_executor(Arc::new(ScriptedRunner::new()), &dir)
        .resume("pipeline", Some(&live), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        StepweaverError::Persistence(PersistenceError::DefinitionMismatch { .. })
    ));
}

#[tokio::test]
async fn resume_rejects_version_mismatch() {
    let dir = TempDir::new().unwrap();
    interrupted(&dir);

    let mut live = pipeline();
    live.version = 2;

    let error = file_executor(Arc::new(ScriptedRunner::new()), &dir)
        .resume("pipeline", Some(&live), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        StepweaverError::Persistence(PersistenceError::VersionMismatch { stored: 1, live: 2, .. })
    ));
}

#[tokio::test]
async fn resume_of_unknown_plan_is_not_found() {
    let dir = TempDir::new().unwrap();
    let error = file_executor(Arc::new(ScriptedRunner::new()), &dir)
        .resume("ghost", None, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        StepweaverError::Persistence(PersistenceError::NotFound(_))
    ));
}
