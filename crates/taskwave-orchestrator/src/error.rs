//! Error types for the taskwave-orchestrator crate.

use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// `taskwave.toml` could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// A level's worker merges collided on conflicting files.
    #[error("merge conflict at level {level} in {files:?}")]
    MergeConflict { level: u32, files: Vec<String> },

    /// A required gate failed during merge.
    #[error("gate failure at level {level}: {gate}")]
    GateFailure { level: u32, gate: String },

    /// A level's merge did not finish within `timeouts.merge_secs`.
    #[error("merge at level {level} exceeded its {timeout_secs}s timeout")]
    MergeTimeout { level: u32, timeout_secs: u64 },

    /// Every task at a level resolved but not all succeeded.
    #[error("level {level} resolved with blocked tasks, halting for human intervention")]
    LevelBlocked { level: u32 },

    /// Another `rush` is already running for this feature.
    #[error("feature {feature} already has a run in progress")]
    FeatureLockHeld { feature: String },

    #[error(transparent)]
    Graph(#[from] taskwave_graph::GraphError),

    #[error(transparent)]
    Registry(#[from] taskwave_registry::RegistryError),

    #[error(transparent)]
    Vcs(#[from] taskwave_vcs::VcsError),

    #[error(transparent)]
    Exec(#[from] taskwave_exec::ExecError),

    #[error(transparent)]
    Launcher(#[from] taskwave_launcher::LauncherError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
