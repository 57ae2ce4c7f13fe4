//! Error types for the taskwave-exec crate.

use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("command timed out after {seconds}s: {reason}")]
    Timeout { seconds: u64, reason: String },

    #[error("no ports available in range {start}-{end}")]
    PortExhaustion { start: u16, end: u16 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
