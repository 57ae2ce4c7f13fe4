//! Error types for the taskwave-graph crate.
//!
//! All parsing, validation, and assignment operations return [`GraphError`]
//! via [`GraphResult`].

use thiserror::Error;

/// Alias for `Result<T, GraphError>`.
pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    // -- Parse errors --
    /// The input document is not well-formed JSON.
    #[error("malformed task graph document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field was missing or had the wrong shape.
    #[error("schema error: {0}")]
    SchemaError(String),

    // -- Validation errors --
    /// A task references a prerequisite that does not exist.
    #[error("task {task_id} declares unknown prerequisite {prereq_id}")]
    UnknownPrerequisite { task_id: String, prereq_id: String },

    /// A task's prerequisite is at a level that does not precede it.
    #[error(
        "task {task_id} at level {level} declares prerequisite {prereq_id} at level {prereq_level}, which does not precede it"
    )]
    PrerequisiteLevelViolation {
        task_id: String,
        level: u32,
        prereq_id: String,
        prereq_level: u32,
    },

    /// The declared `level` field disagrees with the longest prerequisite
    /// chain reachable from this task.
    #[error(
        "task {task_id} declares level {declared} but its prerequisite chain implies level {computed}"
    )]
    LevelMismatch {
        task_id: String,
        declared: u32,
        computed: u32,
    },

    /// The prerequisite graph contains a cycle.
    #[error("cycle detected in task graph, involving at least: {task_ids:?}")]
    CycleDetected { task_ids: Vec<String> },

    /// Two tasks at the same level both declare ownership of the same path.
    #[error(
        "tasks {first} and {second} at level {level} both claim path {path:?} (create/modify must be exclusive per level)"
    )]
    OwnershipCollision {
        level: u32,
        first: String,
        second: String,
        path: String,
    },

    /// A task identifier appeared more than once in the document.
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    // -- Assignment errors --
    /// Worker assignment was requested with zero workers.
    #[error("worker count must be at least 1")]
    ZeroWorkers,
}
