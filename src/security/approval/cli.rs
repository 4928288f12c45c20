use crate::security::approval::{ApprovalBroker, ApprovalDecision, ApprovalRequest};
use anyhow::{Result, anyhow};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{Mutex, mpsc};

/// Interactive broker prompting on the terminal.
///
/// Steps in the same level can ask at once; prompts are serialized so
/// answers cannot be attributed to the wrong step. Lines typed while no
/// prompt is showing (for example after a prompt timed out) are discarded
/// before the next prompt.
pub struct CliApprovalBroker {
    input: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl Default for CliApprovalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl CliApprovalBroker {
    /// Reads answers from stdin, starting the reader on the first prompt.
    pub fn new() -> Self {
        Self {
            input: Mutex::new(None),
        }
    }

    /// Reads answers from `lines` instead of stdin.
    pub fn with_input(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            input: Mutex::new(Some(lines)),
        }
    }
}

impl ApprovalBroker for CliApprovalBroker {
    fn request_approval<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApprovalDecision>> + Send + 'a>> {
        Box::pin(async move {
            let mut input = self.input.lock().await;
            let lines = input.get_or_insert_with(spawn_stdin_reader);

            let mut stale = 0_usize;
            while lines.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                tracing::debug!(stale, "discarded input typed for an earlier prompt");
            }

            eprintln!();
            eprintln!("┌─ Step Approval Required ─────────────────────────");
            eprintln!("│ Plan:    {}", request.plan_id);
            eprintln!("│ Step:    {} ({})", request.step_id, request.action_kind);
            eprintln!("│ What:    {}", request.description);
            eprintln!("│ Targets: {}", request.targets_summary);
            eprintln!("│ Risk:    {} ({:.2})", request.risk_level, request.risk_score);
            eprintln!("├──────────────────────────────────────────────────");
            eprintln!("│ [A]pprove  [R]eject");
            eprintln!("└──────────────────────────────────────────────────");
            eprint!("  > ");

            let line = lines.recv().await.ok_or_else(|| anyhow!("stdin closed"))?;
            let ch = line
                .trim()
                .chars()
                .next()
                .ok_or_else(|| anyhow!("no input received"))?;
            Ok(decision_for(ch))
        })
    }
}

fn decision_for(ch: char) -> ApprovalDecision {
    match ch.to_ascii_lowercase() {
        'a' | 'y' => ApprovalDecision::Approved,
        'r' | 'n' => ApprovalDecision::Rejected {
            reason: "rejected by user".to_string(),
        },
        _ => ApprovalDecision::Rejected {
            reason: format!("unrecognized input: '{ch}'"),
        },
    }
}

/// Forwards stdin lines from a plain thread, which runtime shutdown does not
/// wait on.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stepweaver-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(error) = spawned {
        tracing::warn!(%error, "could not start stdin reader");
    }
    receiver
}
