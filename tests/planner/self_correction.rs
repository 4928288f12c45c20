use std::sync::Arc;

use stepweaver::planner::{FailureCategory, Outcome, PlanStatus, StepStatus};
use tokio_util::sync::CancellationToken;

use crate::scripted::{ScriptedOracle, ScriptedRunner, executor, plan, step};

#[tokio::test]
async fn syntax_failures_are_corrected_until_success() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "compile",
        vec![
            Outcome::failed("error: syntax error near line 4: unexpected token `}`"),
            Outcome::failed("error: unclosed delimiter"),
            Outcome::succeeded("build ok"),
        ],
    ));
    let oracle = Arc::new(ScriptedOracle::new());
    let mut plan = plan("fix-build", vec![step("compile", &[]), step("ship", &["compile"])]);

    let report = executor(Arc::clone(&runner), Arc::clone(&oracle))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.success());
    let compile = plan.step("compile").unwrap();
    assert_eq!(compile.status, StepStatus::Succeeded);
    assert_eq!(compile.attempts, 3);
    assert_eq!(compile.history.len(), 2);
    assert!(compile.last_error.is_none());
    assert!(
        compile
            .history
            .iter()
            .all(|record| record.category == FailureCategory::Syntax)
    );

    let requests = oracle.fix_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].failure_category, FailureCategory::Syntax);
    assert!(requests[0].diagnostics.contains("unexpected token"));
    assert_eq!(requests[1].prior_attempts.len(), 2);

    assert_eq!(
        runner.log(),
        vec![
            "perform:compile",
            "fix:compile",
            "perform:compile",
            "fix:compile",
            "perform:compile",
            "perform:ship",
        ]
    );
}

#[tokio::test]
async fn unknown_failure_is_terminal_without_retry() {
    let runner = Arc::new(
        ScriptedRunner::new().script("migrate", vec![Outcome::failed("segmentation fault (core dumped)")]),
    );
    let oracle = Arc::new(ScriptedOracle::new());
    let mut plan = plan(
        "migration",
        vec![
            step("migrate", &[]),
            step("seed", &["migrate"]),
            step("verify", &["seed"]),
            step("docs", &[]),
        ],
    );

    let report = executor(Arc::clone(&runner), Arc::clone(&oracle))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PlanStatus::Failed);
    assert!(oracle.fix_requests().is_empty());

    let migrate = plan.step("migrate").unwrap();
    assert_eq!(migrate.status, StepStatus::Failed);
    assert_eq!(migrate.attempts, 1);
    assert_eq!(
        migrate.last_error.as_ref().map(|e| e.category),
        Some(FailureCategory::Unknown)
    );

    assert_eq!(plan.step("seed").unwrap().status, StepStatus::Skipped);
    assert_eq!(plan.step("verify").unwrap().status, StepStatus::Skipped);
    assert_eq!(plan.step("docs").unwrap().status, StepStatus::Succeeded);
    assert_eq!(runner.perform_count("seed"), 0);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].step_id, "migrate");
    assert_eq!(report.failures[0].category, FailureCategory::Unknown);
}

#[tokio::test]
async fn attempts_never_exceed_the_retry_cap() {
    let failures = (0..10)
        .map(|_| Outcome::failed("assertion failed: left: 1, right: 2"))
        .collect();
    let runner = Arc::new(ScriptedRunner::new().script("unit", failures));
    let mut plan = plan("stubborn", vec![step("unit", &[])]);

    let exec = executor(Arc::clone(&runner), Arc::new(ScriptedOracle::new()));
    let max_retries = exec.settings().retry.max_retries;
    let report = exec
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, PlanStatus::Failed);
    let unit = plan.step("unit").unwrap();
    assert_eq!(unit.attempts, max_retries);
    assert_eq!(runner.perform_count("unit"), max_retries as usize);
    assert_eq!(report.failures[0].attempts, max_retries);
    assert_eq!(report.failures[0].category, FailureCategory::AssertionFailure);
}

#[tokio::test]
async fn unmet_criteria_are_assertion_failures() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "test",
        vec![Outcome::succeeded("compiled"), Outcome::succeeded("tests passed")],
    ));
    let oracle = Arc::new(ScriptedOracle::new());
    let mut plan = plan("criteria", vec![step("test", &[]).with_criteria(["tests passed"])]);

    let report = executor(Arc::clone(&runner), Arc::clone(&oracle))
        .execute(&mut plan, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(plan.step("test").unwrap().attempts, 2);
    assert_eq!(
        oracle.fix_requests()[0].failure_category,
        FailureCategory::AssertionFailure
    );
}
