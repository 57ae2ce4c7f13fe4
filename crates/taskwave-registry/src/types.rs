//! Registry data model: task/worker/level status and the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default cap on verification-or-crash retries before a task is `Blocked`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state")]
pub enum TaskStatus {
    Pending,
    Claimed {
        worker_id: String,
        claimed_at: DateTime<Utc>,
    },
    InProgress {
        worker_id: String,
        started_at: DateTime<Utc>,
    },
    Completed {
        worker_id: String,
        completed_at: DateTime<Utc>,
        commit_ref: String,
    },
    Failed {
        worker_id: String,
        error: String,
        retry_count: u32,
    },
    Blocked {
        error: String,
        retry_count: u32,
    },
    Checkpointed {
        worker_id: String,
        reason: String,
        context_pct: u8,
    },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed { .. } | TaskStatus::Blocked { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed { .. })
    }

    /// The worker currently holding this task, if any.
    pub fn owner(&self) -> Option<&str> {
        match self {
            TaskStatus::Claimed { worker_id, .. }
            | TaskStatus::InProgress { worker_id, .. }
            | TaskStatus::Completed { worker_id, .. }
            | TaskStatus::Failed { worker_id, .. }
            | TaskStatus::Checkpointed { worker_id, .. } => Some(worker_id),
            TaskStatus::Pending | TaskStatus::Blocked { .. } => None,
        }
    }

    /// `true` if this status represents active, non-terminal in-progress
    /// work a crashed worker might have abandoned.
    pub fn is_recoverable_in_progress(&self) -> bool {
        matches!(
            self,
            TaskStatus::Claimed { .. } | TaskStatus::InProgress { .. } | TaskStatus::Checkpointed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state")]
pub enum WorkerStatus {
    Starting,
    Ready,
    Running { current_task: String },
    Idle,
    Checkpointing,
    Stopped { exit_code: i32 },
    Crashed { reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LevelStatus {
    Pending,
    Running,
    Merging,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelState {
    pub status: LevelStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merge_ref: Option<String>,
}

impl Default for LevelState {
    fn default() -> Self {
        Self {
            status: LevelStatus::Pending,
            started_at: None,
            completed_at: None,
            merge_ref: None,
        }
    }
}

/// A single append-only event log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub detail: String,
}

impl Event {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

/// The on-disk document shape, also used as the in-memory snapshot type —
/// there is exactly one representation of registry state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryDocument {
    pub feature: String,
    pub tasks: BTreeMap<String, TaskStatus>,
    pub workers: BTreeMap<String, WorkerStatus>,
    pub levels: BTreeMap<u32, LevelState>,
    pub events: Vec<Event>,
}

impl RegistryDocument {
    pub fn new(feature: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            ..Default::default()
        }
    }
}
