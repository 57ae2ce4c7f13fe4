//! Error types for the taskwave-registry crate.

use thiserror::Error;

/// Alias for `Result<T, RegistryError>`.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    // -- Persistence errors --
    /// The registry document could not be read or written.
    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry document failed to (de)serialize.
    #[error("registry json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Both the primary document and its `.bak` backup were unreadable.
    #[error("registry corrupted: primary and backup both failed to load ({reason})")]
    RegistryCorruption { reason: String },

    /// A background task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),

    // -- Ownership / CAS errors --
    /// A worker attempted to mutate a task it does not own.
    #[error("worker {worker_id} does not own task {task_id} (owned by {owner:?})")]
    OwnershipViolation {
        task_id: String,
        worker_id: String,
        owner: Option<String>,
    },

    /// The requested task is not present in the registry.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The requested worker is not present in the registry.
    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    /// An invalid state transition was attempted (e.g. resetting a task
    /// that is not in a terminal state).
    #[error("invalid task state transition for {task_id}: {reason}")]
    InvalidTransition { task_id: String, reason: String },
}

impl From<tokio::task::JoinError> for RegistryError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
