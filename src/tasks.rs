//! tasks.rs: in-memory lifecycle store for on-demand analysis requests.
//!
//! The index sits behind a read-write lock that is only held to insert, look
//! up or evict; every record has its own mutex, so updates to different tasks
//! never contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::Decision;
use crate::error::TaskError;
use crate::model::Instrument;
use crate::pipeline::Stage;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!("tasks_tracked", "Task records currently held in memory.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub code: String,
    pub name: String,
    pub state: TaskState,
    /// Latest pipeline stage. Progress only; `state` is authoritative.
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TaskUpdate {
    Start,
    Progress(Stage),
    Succeed(Decision),
    Fail(String),
}

impl TaskUpdate {
    fn target(&self) -> &'static str {
        match self {
            Self::Start | Self::Progress(_) => TaskState::Running.as_str(),
            Self::Succeed(_) => TaskState::Succeeded.as_str(),
            Self::Fail(_) => TaskState::Failed.as_str(),
        }
    }
}

fn default_capacity() -> usize {
    1_000
}
fn default_retention_secs() -> u64 {
    3_600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Terminal records older than this are dropped.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            retention_secs: default_retention_secs(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    record: Mutex<TaskRecord>,
}

impl Entry {
    fn lock(&self) -> MutexGuard<'_, TaskRecord> {
        self.record.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug)]
pub struct TaskTracker {
    index: RwLock<HashMap<String, Arc<Entry>>>,
    seq: AtomicU64,
    cfg: TaskConfig,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new(TaskConfig::default())
    }
}

impl TaskTracker {
    pub fn new(cfg: TaskConfig) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            cfg: TaskConfig {
                capacity: cfg.capacity.max(1),
                ..cfg
            },
        }
    }

    /// Register a queued task and return its id. Fails when every slot is
    /// held by an in-flight task; those are never evicted.
    pub fn create(&self, instrument: &Instrument) -> Result<String, TaskError> {
        ensure_metrics_described();
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let entry = Arc::new(Entry {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            record: Mutex::new(TaskRecord {
                id: id.clone(),
                code: instrument.code.clone(),
                name: instrument.display_name().to_string(),
                state: TaskState::Queued,
                stage: Stage::Pending,
                created_at: now,
                updated_at: now,
                result: None,
                error: None,
            }),
        });

        let mut index = self.index.write().unwrap_or_else(|p| p.into_inner());
        self.evict_locked(&mut index, now);
        if index.len() >= self.cfg.capacity {
            tracing::warn!(target: "tasks", code = %instrument.code, capacity = self.cfg.capacity, "task rejected, store full");
            return Err(TaskError::AtCapacity {
                capacity: self.cfg.capacity,
            });
        }
        index.insert(id.clone(), entry);
        gauge!("tasks_tracked").set(index.len() as f64);
        tracing::debug!(target: "tasks", task_id = %id, code = %instrument.code, "task created");
        Ok(id)
    }

    fn entry(&self, id: &str) -> Result<Arc<Entry>, TaskError> {
        let index = self.index.read().unwrap_or_else(|p| p.into_inner());
        index
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Apply an update. Transitions only move forward:
    /// queued -> running -> succeeded | failed.
    pub fn update(&self, id: &str, update: TaskUpdate) -> Result<TaskRecord, TaskError> {
        let entry = self.entry(id)?;
        let mut rec = entry.lock();

        let allowed = match (&update, rec.state) {
            (TaskUpdate::Start, TaskState::Queued) => true,
            (TaskUpdate::Progress(_), TaskState::Running) => true,
            (TaskUpdate::Succeed(_) | TaskUpdate::Fail(_), TaskState::Running) => true,
            _ => false,
        };
        if !allowed {
            return Err(TaskError::InvalidTransition {
                id: id.to_string(),
                from: rec.state.as_str(),
                to: update.target(),
            });
        }

        match update {
            TaskUpdate::Start => rec.state = TaskState::Running,
            TaskUpdate::Progress(stage) => rec.stage = stage,
            TaskUpdate::Succeed(decision) => {
                rec.state = TaskState::Succeeded;
                rec.stage = Stage::Done;
                rec.result = Some(decision);
            }
            TaskUpdate::Fail(reason) => {
                rec.state = TaskState::Failed;
                rec.stage = Stage::Failed;
                rec.error = Some(reason);
            }
        }
        rec.updated_at = Utc::now();
        Ok(rec.clone())
    }

    /// Record stage progress; ignored once the task has left `running`.
    pub fn set_stage(&self, id: &str, stage: Stage) {
        if let Err(e) = self.update(id, TaskUpdate::Progress(stage)) {
            tracing::debug!(target: "tasks", task_id = id, error = %e, "stage update ignored");
        }
    }

    pub fn get(&self, id: &str) -> Result<TaskRecord, TaskError> {
        Ok(self.entry(id)?.lock().clone())
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut entries: Vec<Arc<Entry>> = {
            let index = self.index.read().unwrap_or_else(|p| p.into_inner());
            index.values().cloned().collect()
        };
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.iter().map(|e| e.lock().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retention(&self) -> ChronoDuration {
        i64::try_from(self.cfg.retention_secs)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or(ChronoDuration::MAX)
    }

    /// Drop expired terminal records, then make room for one more by dropping
    /// the oldest terminal ones. In-flight records are kept.
    fn evict_locked(&self, index: &mut HashMap<String, Arc<Entry>>, now: DateTime<Utc>) {
        let retention = self.retention();
        index.retain(|_, e| {
            let r = e.lock();
            !(r.state.is_terminal() && now - r.updated_at > retention)
        });

        if index.len() < self.cfg.capacity {
            return;
        }
        let mut finished: Vec<(u64, String)> = index
            .iter()
            .filter(|(_, e)| e.lock().state.is_terminal())
            .map(|(id, e)| (e.seq, id.clone()))
            .collect();
        finished.sort();
        let excess = index.len() + 1 - self.cfg.capacity;
        for (_, id) in finished.into_iter().take(excess) {
            index.remove(&id);
        }
    }
}
