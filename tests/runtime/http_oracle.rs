use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use std::sync::Arc;

use stepweaver::Config;
use stepweaver::app::{PlanService, RunOutcome};
use stepweaver::error::{OracleError, PlanValidationError};
use stepweaver::planner::{
    ActionKind, FailureCategory, FixRequest, PlanStep, PlanningContext, ReasoningOracle,
};
use stepweaver::runtime::HttpOracle;
use stepweaver::security::AutoApproveBroker;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn fix_request() -> FixRequest {
    FixRequest {
        step: PlanStep::new("build", ActionKind::Run, "compile").with_targets(["make"]),
        failure_category: FailureCategory::MissingDependency,
        diagnostics: "make: command not found".into(),
        prior_attempts: Vec::new(),
    }
}

#[tokio::test]
async fn plan_is_parsed_from_fenced_response() {
    let server = MockServer::start().await;
    let body = concat!(
        "Here is the plan:\n```json\n",
        r#"{"id": "gen-1", "goal": "add tests", "steps": ["#,
        r#"{"id": "write", "action_kind": "create", "targets": ["tests/a.rs"], "description": "write test", "depends_on": []},"#,
        r#"{"id": "run", "action_kind": "test", "targets": ["cargo test"], "description": "run", "depends_on": ["write"]}"#,
        "]}\n```\n"
    );

    Mock::given(method("POST"))
        .and(path("/plan"))
        .and(body_partial_json(json!({ "goal": "add tests", "context": { "workspace": "/repo" } })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let oracle = HttpOracle::new(format!("{}/", server.uri()), 5);
    let context = PlanningContext {
        workspace: Some("/repo".into()),
        ..PlanningContext::default()
    };
    let plan = oracle.propose_plan("add tests", &context).await.unwrap();

    assert_eq!(plan.id, "gen-1");
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(
        plan.levels().unwrap(),
        vec![vec!["write".to_string()], vec!["run".to_string()]]
    );
}

#[tokio::test]
async fn fix_is_parsed_and_validated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fix"))
        .and(body_partial_json(json!({ "request": { "failure_category": "missing-dependency" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action_kind": "run",
            "targets": ["apt-get install -y make"],
            "description": "install make",
            "rationale": "make is missing"
        })))
        .mount(&server)
        .await;

    let fix = HttpOracle::new(server.uri(), 5)
        .propose_fix(&fix_request())
        .await
        .unwrap();
    assert_eq!(fix.action_kind, ActionKind::Run);
    assert_eq!(fix.description, "install make");
}

#[tokio::test]
async fn malformed_fix_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fix"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "action_kind": "delete",
            "targets": [],
            "description": "remove everything"
        })))
        .mount(&server)
        .await;

    let error = HttpOracle::new(server.uri(), 5)
        .propose_fix(&fix_request())
        .await
        .unwrap_err();
    assert!(matches!(error, OracleError::Malformed(_)));
}

#[tokio::test]
async fn server_error_is_a_request_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let error = HttpOracle::new(server.uri(), 5)
        .propose_plan("anything", &PlanningContext::default())
        .await
        .unwrap_err();
    let OracleError::Request(message) = error else {
        panic!("expected request failure, got {error:?}");
    };
    assert!(message.contains("503"));
    assert!(message.contains("overloaded"));
}

#[tokio::test]
async fn response_without_json_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_string("I cannot help with that."))
        .mount(&server)
        .await;

    let error = HttpOracle::new(server.uri(), 5)
        .propose_plan("anything", &PlanningContext::default())
        .await
        .unwrap_err();
    assert!(matches!(error, OracleError::Malformed(_)));
}

const CYCLIC_PLAN: &str = r#"{"id": "loop", "goal": "g", "steps": [
    {"id": "S1", "action_kind": "run", "targets": ["true"], "description": "one", "depends_on": ["S2"]},
    {"id": "S2", "action_kind": "run", "targets": ["true"], "description": "two", "depends_on": ["S1"]}
]}"#;

#[tokio::test]
async fn cyclic_proposal_keeps_the_validation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CYCLIC_PLAN))
        .mount(&server)
        .await;

    let error = HttpOracle::new(server.uri(), 5)
        .propose_plan("g", &PlanningContext::default())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        OracleError::InvalidPlan(PlanValidationError::Cycle { ref members })
            if members == &["S1".to_string(), "S2".to_string()]
    ));
}

#[tokio::test]
async fn goal_with_cyclic_proposal_is_rejected_with_exit_code_two() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CYCLIC_PLAN))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let mut config = Config {
        workspace_dir: workspace.path().to_path_buf(),
        state_dir: state.path().display().to_string(),
        ..Config::default()
    };
    config.oracle.endpoint = Some(server.uri());

    let service = PlanService::from_config(&config, Arc::new(AutoApproveBroker));
    let outcome = service
        .submit_goal("g", CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Rejected(PlanValidationError::Cycle { .. })));
    assert_eq!(outcome.exit_code(), 2);
    assert!(service.list().unwrap().is_empty());
}
