use crate::security::approval::{ApprovalBroker, ApprovalDecision, ApprovalRequest};
use anyhow::anyhow;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Default)]
struct Pending {
    waiters: HashMap<String, oneshot::Sender<ApprovalDecision>>,
    early: HashMap<String, ApprovalDecision>,
}

type Shared = Arc<Mutex<Pending>>;

fn lock(shared: &Shared) -> MutexGuard<'_, Pending> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Broker fed by `(step_id, decision)` signals from another task.
///
/// Signals that arrive before the step asks are held until it does.
pub struct ChannelApprovalBroker {
    shared: Shared,
}

/// Handle used to deliver decisions to a [`ChannelApprovalBroker`].
#[derive(Clone)]
pub struct ApprovalSender {
    shared: Shared,
}

impl ChannelApprovalBroker {
    pub fn new() -> (Self, ApprovalSender) {
        let shared: Shared = Arc::default();
        (
            Self {
                shared: Arc::clone(&shared),
            },
            ApprovalSender { shared },
        )
    }
}

impl ApprovalSender {
    pub fn approve(&self, step_id: &str) {
        self.send(step_id, ApprovalDecision::Approved);
    }

    pub fn reject(&self, step_id: &str, reason: impl Into<String>) {
        self.send(
            step_id,
            ApprovalDecision::Rejected {
                reason: reason.into(),
            },
        );
    }

    pub fn send(&self, step_id: &str, decision: ApprovalDecision) {
        let mut pending = lock(&self.shared);
        match pending.waiters.remove(step_id) {
            Some(waiter) => {
                if let Err(decision) = waiter.send(decision) {
                    pending.early.insert(step_id.to_string(), decision);
                }
            }
            None => {
                pending.early.insert(step_id.to_string(), decision);
            }
        }
    }
}

impl ApprovalBroker for ChannelApprovalBroker {
    fn request_approval<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApprovalDecision>> + Send + 'a>> {
        Box::pin(async move {
            let receiver = {
                let mut pending = lock(&self.shared);
                if let Some(decision) = pending.early.remove(&request.step_id) {
                    return Ok(decision);
                }
                let (sender, receiver) = oneshot::channel();
                pending.waiters.insert(request.step_id.clone(), sender);
                receiver
            };

            receiver
                .await
                .map_err(|_| anyhow!("approval channel closed for step {}", request.step_id))
        })
    }
}
