use crate::error::PersistenceError;
use crate::planner::{Plan, PlanStatus, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub plan: Plan,
}

impl PlanSnapshot {
    pub fn capture(plan: &Plan) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            plan: plan.clone(),
        }
    }
}

/// Durable storage for plan snapshots. `save` must replace the previous
/// snapshot atomically: readers see either the old or the new one.
pub trait StateStore: Send + Sync {
    fn save(&self, snapshot: &PlanSnapshot) -> Result<(), PersistenceError>;

    fn load(&self, plan_id: &str) -> Result<Option<PlanSnapshot>, PersistenceError>;

    fn list(&self) -> Result<Vec<PlanSnapshot>, PersistenceError>;

    /// Leaves a cancel request for `plan_id` where a live run polls for it.
    fn request_cancel(&self, plan_id: &str) -> Result<(), PersistenceError>;

    fn cancel_requested(&self, plan_id: &str) -> Result<bool, PersistenceError>;

    fn clear_cancel(&self, plan_id: &str) -> Result<(), PersistenceError>;
}

/// One JSON file per plan under a directory.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, plan_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(plan_id)))
    }

    fn marker_for(&self, plan_id: &str) -> PathBuf {
        self.dir.join(format!("{}.cancel", encode_file_stem(plan_id)))
    }
}

impl StateStore for FileStateStore {
    fn save(&self, snapshot: &PlanSnapshot) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(snapshot)?;
        write_atomic(&self.path_for(&snapshot.plan.id), &content)
    }

    fn load(&self, plan_id: &str) -> Result<Option<PlanSnapshot>, PersistenceError> {
        let path = self.path_for(plan_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };
        let snapshot: PlanSnapshot = serde_json::from_str(&raw)?;
        if snapshot.plan.id != plan_id {
            return Err(PersistenceError::ForeignSnapshot {
                requested: plan_id.to_string(),
                found: snapshot.plan.id,
            });
        }
        Ok(Some(snapshot))
    }

    fn list(&self) -> Result<Vec<PlanSnapshot>, PersistenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PersistenceError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path).map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_str::<PlanSnapshot>(&raw) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable snapshot");
                }
            }
        }

        snapshots.sort_by(|a, b| a.plan.id.cmp(&b.plan.id));
        Ok(snapshots)
    }

    fn request_cancel(&self, plan_id: &str) -> Result<(), PersistenceError> {
        write_atomic(&self.marker_for(plan_id), &Utc::now().to_rfc3339())
    }

    fn cancel_requested(&self, plan_id: &str) -> Result<bool, PersistenceError> {
        let path = self.marker_for(plan_id);
        path.try_exists()
            .map_err(|source| PersistenceError::Io { path, source })
    }

    fn clear_cancel(&self, plan_id: &str) -> Result<(), PersistenceError> {
        let path = self.marker_for(plan_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }
}

/// Percent-encodes every byte outside `[A-Za-z0-9._-]`, so distinct plan
/// ids never share a file.
fn encode_file_stem(plan_id: &str) -> String {
    let mut stem = String::with_capacity(plan_id.len());
    for byte in plan_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    stem
}

fn write_atomic(path: &Path, content: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("snapshot");
    let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
    fs::write(&temp_path, content).map_err(|source| PersistenceError::Io {
        path: temp_path.clone(),
        source,
    })?;

    if let Err(source) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}

#[derive(Default)]
pub struct MemoryStateStore {
    snapshots: Mutex<BTreeMap<String, PlanSnapshot>>,
    cancels: Mutex<BTreeSet<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PlanSnapshot>> {
        self.snapshots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cancel_guard(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.cancels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, snapshot: &PlanSnapshot) -> Result<(), PersistenceError> {
        self.guard()
            .insert(snapshot.plan.id.clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, plan_id: &str) -> Result<Option<PlanSnapshot>, PersistenceError> {
        Ok(self.guard().get(plan_id).cloned())
    }

    fn list(&self) -> Result<Vec<PlanSnapshot>, PersistenceError> {
        Ok(self.guard().values().cloned().collect())
    }

    fn request_cancel(&self, plan_id: &str) -> Result<(), PersistenceError> {
        self.cancel_guard().insert(plan_id.to_string());
        Ok(())
    }

    fn cancel_requested(&self, plan_id: &str) -> Result<bool, PersistenceError> {
        Ok(self.cancel_guard().contains(plan_id))
    }

    fn clear_cancel(&self, plan_id: &str) -> Result<(), PersistenceError> {
        self.cancel_guard().remove(plan_id);
        Ok(())
    }
}

/// Persists the plan after every transition and rebuilds resumable plans.
///
/// A failed write never aborts a run; it only makes the run non-resumable.
pub struct StateTracker {
    store: Arc<dyn StateStore>,
}

impl StateTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn persist(&self, plan: &Plan) -> Result<(), PersistenceError> {
        self.store.save(&PlanSnapshot::capture(plan))
    }

    /// Polls the store every `every` and trips `cancel` once a cancel
    /// request for `plan_id` appears. Polling stops when the guard drops.
    pub fn watch_cancel(
        &self,
        plan_id: &str,
        cancel: CancellationToken,
        every: Duration,
    ) -> DropGuard {
        let store = Arc::clone(&self.store);
        let plan_id = plan_id.to_string();
        let stop = CancellationToken::new();
        let guard = stop.clone().drop_guard();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => return,
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match store.cancel_requested(&plan_id) {
                    Ok(true) => {
                        tracing::warn!(plan_id = %plan_id, "cancel requested from outside the run");
                        cancel.cancel();
                        return;
                    }
                    Ok(false) => {}
                    Err(error) => tracing::debug!(plan_id = %plan_id, %error, "cancel marker check failed"),
                }
            }
        });

        guard
    }

    /// Loads the stored snapshot for `plan_id` and prepares it for resumption.
    pub fn load_for_resume(
        &self,
        plan_id: &str,
        live: Option<&Plan>,
    ) -> Result<Plan, PersistenceError> {
        let snapshot = self
            .store
            .load(plan_id)?
            .ok_or_else(|| PersistenceError::NotFound(plan_id.to_string()))?;
        prepare_resume(snapshot, live)
    }
}

/// Turns a stored snapshot back into a runnable plan.
///
/// When a live definition is supplied its version must match and every
/// step must have the same definition. In-flight steps go back to
/// `Pending`; a step caught mid-attempt gives that attempt back.
pub fn prepare_resume(
    snapshot: PlanSnapshot,
    live: Option<&Plan>,
) -> Result<Plan, PersistenceError> {
    let mut plan = snapshot.plan;

    if plan.status == PlanStatus::Cancelled {
        return Err(PersistenceError::Cancelled(plan.id));
    }

    if let Some(live) = live {
        if live.version != plan.version {
            return Err(PersistenceError::VersionMismatch {
                plan_id: plan.id,
                stored: plan.version,
                live: live.version,
            });
        }
        if live.steps.len() != plan.steps.len() {
            return Err(PersistenceError::DefinitionMismatch {
                plan_id: plan.id,
                reason: format!(
                    "snapshot has {} steps, live plan has {}",
                    plan.steps.len(),
                    live.steps.len()
                ),
            });
        }
        if let Some(changed) = plan
            .steps
            .iter()
            .zip(&live.steps)
            .find(|(stored, current)| !stored.same_definition(current))
        {
            return Err(PersistenceError::DefinitionMismatch {
                plan_id: plan.id.clone(),
                reason: format!("step {} differs", changed.0.id),
            });
        }
    }

    for step in &mut plan.steps {
        match step.status {
            StepStatus::Running | StepStatus::Ready => {
                if step.status == StepStatus::Running {
                    step.attempts = step.attempts.saturating_sub(1);
                }
                step.status = StepStatus::Pending;
            }
            StepStatus::Retrying => step.status = StepStatus::Pending,
            _ => {}
        }
    }

    plan.status = if plan.status == PlanStatus::Draft {
        PlanStatus::Draft
    } else {
        PlanStatus::Running
    };

    Ok(plan)
}
