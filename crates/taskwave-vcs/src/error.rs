//! Error types for the taskwave-vcs crate.

use thiserror::Error;

pub type VcsResult<T> = Result<T, VcsError>;

#[derive(Debug, Error)]
pub enum VcsError {
    /// A libgit2 call failed.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// A merge stopped with conflicting files.
    #[error("merge conflict in {files:?}")]
    MergeConflict { files: Vec<String> },

    /// A worktree already exists at the requested path for a different
    /// branch than the caller expected.
    #[error("workspace at {path} is bound to branch {actual}, expected {expected}")]
    WorkspaceBranchMismatch {
        path: String,
        actual: String,
        expected: String,
    },

    /// The requested branch does not exist and no base ref was given to
    /// create it from.
    #[error("branch {0} does not exist")]
    BranchNotFound(String),
}
