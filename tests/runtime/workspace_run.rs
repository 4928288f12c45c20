use std::sync::Arc;

use stepweaver::Config;
use stepweaver::app::{PlanService, RunOutcome};
use stepweaver::planner::{PlanParser, PlanStatus, StepStatus};
use stepweaver::security::AutoApproveBroker;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Fixture {
    workspace: TempDir,
    _state: TempDir,
    service: PlanService,
}

fn fixture(editor: Option<&str>) -> Fixture {
    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let mut config = Config {
        workspace_dir: workspace.path().to_path_buf(),
        state_dir: state.path().display().to_string(),
        ..Config::default()
    };
    config.execution.editor_command = editor.map(str::to_string);
    config.execution.step_timeout_secs = 30;

    let service = PlanService::from_config(&config, Arc::new(AutoApproveBroker));
    Fixture {
        workspace,
        _state: state,
        service,
    }
}

const SCAFFOLD: &str = r#"{
    "id": "scaffold",
    "goal": "scaffold a module and check it",
    "steps": [
        {"id": "dir", "action_kind": "create", "targets": ["src/mod.txt"], "description": "create module file",
         "verification_criteria": ["file_exists:src/mod.txt"]},
        {"id": "fill", "action_kind": "edit", "targets": ["src/mod.txt"], "description": "hello module",
         "depends_on": ["dir"]},
        {"id": "check", "action_kind": "test", "targets": ["grep -q hello src/mod.txt && echo module ok"],
         "description": "module mentions hello", "depends_on": ["fill"],
         "verification_criteria": ["exit_code=0", "output_contains:module ok"]},
        {"id": "tidy", "action_kind": "delete", "targets": ["scratch"], "description": "remove scratch space",
         "depends_on": ["check"], "verification_criteria": ["file_absent:scratch"]}
    ]
}"#;

#[tokio::test]
async fn authored_plan_runs_against_a_real_workspace() {
    let fx = fixture(Some(r#"printf '%s\n' "$STEPWEAVER_DESCRIPTION" > "$STEPWEAVER_TARGETS""#));
    std::fs::create_dir(fx.workspace.path().join("scratch")).unwrap();

    let plan = PlanParser::parse(SCAFFOLD).unwrap();
    let outcome = fx.service.submit(plan, CancellationToken::new()).await;
    assert_eq!(outcome.exit_code(), 0, "{outcome:?}");

    let content = std::fs::read_to_string(fx.workspace.path().join("src/mod.txt")).unwrap();
    assert_eq!(content, "hello module\n");
    assert!(!fx.workspace.path().join("scratch").exists());

    let stored = fx.service.status("scaffold").unwrap();
    assert_eq!(stored.plan.status, PlanStatus::Completed);
    assert!(stored.plan.steps.iter().all(|s| s.status == StepStatus::Succeeded));
}

#[tokio::test]
async fn failing_command_exhausts_retries_and_reports_exit_code_one() {
    let fx = fixture(None);
    let plan = PlanParser::parse(
        r#"{"id": "red", "goal": "g", "steps": [
            {"id": "t", "action_kind": "test", "targets": ["echo 'assertion failed: 1 != 2' >&2; exit 1"],
             "description": "failing test"},
            {"id": "after", "action_kind": "run", "targets": ["true"], "description": "never", "depends_on": ["t"]}
        ]}"#,
    )
    .unwrap();

    let outcome = fx.service.submit(plan, CancellationToken::new()).await;
    assert_eq!(outcome.exit_code(), 1);
    let RunOutcome::Finished { plan, report } = outcome else {
        panic!("expected a finished run");
    };
    assert_eq!(report.failed_steps, vec!["t"]);
    assert_eq!(plan.step("t").unwrap().attempts, 3);
    assert_eq!(plan.step("after").unwrap().status, StepStatus::Skipped);
}

#[tokio::test]
async fn edit_without_editor_fails_terminally() {
    let fx = fixture(None);
    std::fs::write(fx.workspace.path().join("a.txt"), "").unwrap();
    let plan = PlanParser::parse(
        r#"{"id": "noedit", "goal": "g", "steps": [
            {"id": "e", "action_kind": "edit", "targets": ["a.txt"], "description": "change a"}
        ]}"#,
    )
    .unwrap();

    let outcome = fx.service.submit(plan, CancellationToken::new()).await;
    let RunOutcome::Finished { plan, .. } = outcome else {
        panic!("expected a finished run");
    };
    let step = plan.step("e").unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.attempts, 1);
}
