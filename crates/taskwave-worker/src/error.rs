//! Error types for the taskwave-worker crate.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Bootstrap could not complete: a required entry-contract environment
    /// variable was missing or the workspace/graph/plan could not be
    /// loaded.
    #[error("worker bootstrap failed: {reason}")]
    Bootstrap { reason: String },

    /// The domain work a `TaskExecutor` performs for a task failed.
    #[error("task {task_id} execution failed: {reason}")]
    ExecutionFailed { task_id: String, reason: String },

    /// The task's verification command exited non-zero or timed out.
    #[error("task {task_id} failed verification")]
    VerificationFailed { task_id: String },

    #[error(transparent)]
    Registry(#[from] taskwave_registry::RegistryError),

    #[error(transparent)]
    Vcs(#[from] taskwave_vcs::VcsError),

    #[error(transparent)]
    Exec(#[from] taskwave_exec::ExecError),

    #[error(transparent)]
    Graph(#[from] taskwave_graph::GraphError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
