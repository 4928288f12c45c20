use crate::planner::{CriterionVerdict, Outcome, VerificationCriterion, Verifier};
use crate::runtime::workspace::resolve_in;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;

/// Evaluates the predicate vocabulary understood by the workspace runtime:
///
/// - `exit_code=N`: the outcome carries the artifact `exit_code=N`
/// - `file_exists:<path>` / `file_absent:<path>`: relative to the root
/// - `output_contains:<text>`: diagnostics contain the text
/// - `artifact:<name>`: the outcome lists the artifact
pub struct BuiltinVerifier {
    root: PathBuf,
}

impl BuiltinVerifier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Verifier for BuiltinVerifier {
    async fn check(
        &self,
        criterion: &VerificationCriterion,
        outcome: &Outcome,
    ) -> Result<CriterionVerdict> {
        let predicate = criterion.as_str().trim();

        if let Some(code) = predicate.strip_prefix("exit_code=") {
            let code: i32 = code.trim().parse()?;
            let expected = format!("exit_code={code}");
            let actual = outcome
                .artifacts
                .iter()
                .find(|a| a.starts_with("exit_code="));
            return Ok(match actual {
                Some(actual) if *actual == expected => CriterionVerdict::pass(),
                Some(actual) => CriterionVerdict::fail(format!("got {actual}")),
                None => CriterionVerdict::fail("no exit code recorded"),
            });
        }

        if let Some(path) = predicate.strip_prefix("file_exists:") {
            let exists = tokio::fs::try_exists(resolve_in(&self.root, path)?).await?;
            return Ok(if exists {
                CriterionVerdict::pass()
            } else {
                CriterionVerdict::fail(format!("{} does not exist", path.trim()))
            });
        }

        if let Some(path) = predicate.strip_prefix("file_absent:") {
            let exists = tokio::fs::try_exists(resolve_in(&self.root, path)?).await?;
            return Ok(if exists {
                CriterionVerdict::fail(format!("{} still exists", path.trim()))
            } else {
                CriterionVerdict::pass()
            });
        }

        if let Some(text) = predicate.strip_prefix("output_contains:") {
            return Ok(if outcome.diagnostics.contains(text.trim()) {
                CriterionVerdict::pass()
            } else {
                CriterionVerdict::fail(format!("output does not contain '{}'", text.trim()))
            });
        }

        if let Some(name) = predicate.strip_prefix("artifact:") {
            let name = name.trim();
            return Ok(if outcome.artifacts.iter().any(|a| a == name) {
                CriterionVerdict::pass()
            } else {
                CriterionVerdict::fail(format!("artifact {name} not produced"))
            });
        }

        bail!("unsupported verification predicate: {predicate}")
    }
}
