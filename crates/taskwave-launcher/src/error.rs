//! Error types for the taskwave-launcher crate.

use thiserror::Error;

pub type LauncherResult<T> = Result<T, LauncherError>;

#[derive(Debug, Error)]
pub enum LauncherError {
    /// The requested backend cannot operate (e.g. `container` was requested
    /// but no container runtime is reachable). Configuration-level failure,
    /// surfaced immediately with no silent fallback.
    #[error("launcher unavailable: {backend} backend requested but {reason}")]
    LauncherUnavailable { backend: String, reason: String },

    /// A worker process or container failed to spawn.
    #[error("failed to spawn worker {worker_id}: {reason}")]
    SpawnFailed { worker_id: String, reason: String },

    /// The worker did not write its readiness sentinel within the grace
    /// period.
    #[error("worker {worker_id} did not become ready within {grace_secs}s")]
    ReadinessTimeout { worker_id: String, grace_secs: u64 },

    /// A lifecycle operation (stop/cleanup) on a live handle failed.
    #[error("launcher operation failed for worker {worker_id}: {reason}")]
    OperationFailed { worker_id: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}
