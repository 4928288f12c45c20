use crate::planner::{ActionExecutor, ActionKind, CorrectiveAction, FailureCategory, Outcome, PlanStep};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Maximum captured output per stream (1 MB).
const MAX_OUTPUT_BYTES: usize = 1_048_576;
/// Environment variables passed through to step commands.
/// Only functional variables are included -- never API keys or secrets.
const SAFE_ENV_VARS: &[&str] = &[
    "PATH", "HOME", "TERM", "LANG", "LC_ALL", "LC_CTYPE", "USER", "SHELL",
];

/// Performs steps against a workspace directory.
///
/// `create`/`delete` targets are paths relative to the root, `run`/`test`
/// targets are shell commands, and `edit` hands the targets to the
/// configured editor command.
pub struct WorkspaceActionExecutor {
    root: PathBuf,
    editor_command: Option<String>,
}

impl WorkspaceActionExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            editor_command: None,
        }
    }

    #[must_use]
    pub fn with_editor_command(mut self, command: Option<String>) -> Self {
        self.editor_command = command.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, target: &str) -> Result<PathBuf> {
        resolve_in(&self.root, target)
    }

    async fn create(&self, step: &PlanStep) -> Result<Outcome> {
        let mut outcome = Outcome::succeeded(String::new());
        for target in &step.targets {
            let path = self.resolve(target)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            outcome = outcome.with_artifact(format!("created:{target}"));
        }
        Ok(outcome)
    }

    async fn delete(&self, step: &PlanStep) -> Result<Outcome> {
        let mut outcome = Outcome::succeeded(String::new());
        for target in &step.targets {
            let path = self.resolve(target)?;
            let removed = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    outcome.diagnostics.push_str(&format!("{target}: already absent\n"));
                    Ok(())
                }
                Err(e) => Err(e),
            };
            removed?;
            outcome = outcome.with_artifact(format!("deleted:{target}"));
        }
        Ok(outcome)
    }

    async fn edit(&self, step: &PlanStep) -> Result<Outcome> {
        for target in &step.targets {
            let path = self.resolve(target)?;
            if !tokio::fs::try_exists(&path).await? {
                return Ok(Outcome::failed(format!("no such file: {target}"))
                    .with_category_hint(FailureCategory::MissingDependency));
            }
        }

        let Some(editor) = &self.editor_command else {
            return Ok(Outcome::failed("no editor command configured for edit steps")
                .with_category_hint(FailureCategory::Unknown));
        };

        let env = [
            ("STEPWEAVER_TARGETS", step.targets.join("\n")),
            ("STEPWEAVER_DESCRIPTION", step.description.clone()),
        ];
        let mut outcome = self.shell(editor, &env).await?;
        if outcome.success {
            for target in &step.targets {
                outcome = outcome.with_artifact(format!("edited:{target}"));
            }
        }
        Ok(outcome)
    }

    async fn run_commands(&self, step: &PlanStep) -> Result<Outcome> {
        if step.targets.is_empty() {
            bail!("{} step {} has no command to run", step.action_kind, step.id);
        }

        let mut transcript = String::new();
        let mut last = Outcome::succeeded(String::new());
        for command in &step.targets {
            last = self.shell(command, &[]).await?;
            transcript.push_str(&last.diagnostics);
            if !last.success {
                break;
            }
        }
        last.diagnostics = transcript;
        Ok(last)
    }

    async fn shell(&self, command: &str, extra_env: &[(&str, String)]) -> Result<Outcome> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .env_clear()
            .kill_on_drop(true);

        for var in SAFE_ENV_VARS {
            if let Ok(val) = std::env::var(var) {
                cmd.env(var, val);
            }
        }
        for (key, value) in extra_env {
            cmd.env(key, value);
        }

        tracing::debug!(command, root = %self.root.display(), "running step command");
        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                return Ok(Outcome::failed(format!("failed to execute command: {e}"))
                    .with_category_hint(FailureCategory::MissingDependency));
            }
        };

        let mut diagnostics = truncated(&output.stdout, "stdout");
        diagnostics.push_str(&truncated(&output.stderr, "stderr"));

        let outcome = match output.status.code() {
            Some(code) => {
                let outcome = if output.status.success() {
                    Outcome::succeeded(diagnostics)
                } else {
                    Outcome::failed(diagnostics)
                };
                outcome.with_artifact(format!("exit_code={code}"))
            }
            None => Outcome::failed(format!("{diagnostics}command killed by signal"))
                .with_category_hint(FailureCategory::TimeoutOrResource),
        };
        Ok(outcome)
    }
}

fn truncated(bytes: &[u8], stream: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).to_string();
    if text.len() > MAX_OUTPUT_BYTES {
        text.truncate(text.floor_char_boundary(MAX_OUTPUT_BYTES));
        text.push_str(&format!("\n... [{stream} truncated at 1MB]\n"));
    }
    text
}

/// Joins `target` onto `root`, refusing absolute paths and `..` segments.
pub(crate) fn resolve_in(root: &Path, target: &str) -> Result<PathBuf> {
    let relative = Path::new(target.trim());
    if relative.as_os_str().is_empty() {
        bail!("empty target path");
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("target escapes the workspace: {target}");
            }
        }
    }
    Ok(root.join(relative))
}

#[async_trait]
impl ActionExecutor for WorkspaceActionExecutor {
    async fn perform(&self, step: &PlanStep) -> Result<Outcome> {
        match step.action_kind {
            ActionKind::Create => self.create(step).await,
            ActionKind::Delete => self.delete(step).await,
            ActionKind::Edit => self.edit(step).await,
            ActionKind::Run | ActionKind::Test => self.run_commands(step).await,
        }
    }

    async fn apply_fix(&self, step: &PlanStep, fix: &CorrectiveAction) -> Result<Outcome> {
        if fix.targets.is_empty() {
            return Ok(Outcome::succeeded(format!(
                "no corrective change for {}; retrying as is",
                step.id
            )));
        }
        let corrective = PlanStep::new(format!("{}-fix", step.id), fix.action_kind, &fix.description)
            .with_targets(fix.targets.iter().cloned());
        tracing::info!(step_id = %step.id, kind = %fix.action_kind, "applying corrective action");
        self.perform(&corrective).await
    }
}
