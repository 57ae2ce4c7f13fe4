//! Pluggable task execution: the "perform the domain-specific work" step
//! between claiming a task and verifying it.
//!
//! `ShellTaskExecutor` is the one concrete implementation shipped here: it
//! runs a configured build command in the workspace before verification
//! runs, the same way a single-task worker would build its change before
//! running its test suite.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use taskwave_graph::Task;

use crate::error::{WorkerError, WorkerResult};

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Perform the task's domain-specific work in `workspace`. Verification
    /// is a separate step run by the caller afterward.
    async fn execute(&self, task: &Task, workspace: &Path) -> WorkerResult<()>;
}

/// Runs a fixed build command (if any) via a shell, reusing the same
/// timeout/output-capture machinery the Verification Runner uses.
pub struct ShellTaskExecutor {
    build_command: Option<String>,
    timeout: Duration,
}

impl ShellTaskExecutor {
    pub fn new(build_command: Option<String>, timeout: Duration) -> Self {
        Self { build_command, timeout }
    }

    /// No build step: the task's verification command is assumed to
    /// perform all necessary work itself (common for tasks that only
    /// check an already-present artifact).
    pub fn verification_only() -> Self {
        Self {
            build_command: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl TaskExecutor for ShellTaskExecutor {
    async fn execute(&self, task: &Task, workspace: &Path) -> WorkerResult<()> {
        let Some(command) = &self.build_command else {
            return Ok(());
        };

        let output = taskwave_exec::run_command(command, workspace, self.timeout).await?;
        if !output.passed() {
            return Err(WorkerError::ExecutionFailed {
                task_id: task.id.clone(),
                reason: if output.timed_out {
                    "build command timed out".to_string()
                } else {
                    output.stderr
                },
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task() -> Task {
        Task {
            id: "t1".to_string(),
            title: "t1".to_string(),
            description: String::new(),
            level: 1,
            prerequisites: Vec::new(),
            files: taskwave_graph::FileTouches::default(),
            verification: taskwave_graph::VerificationSpec {
                command: "true".to_string(),
                timeout_secs: 5,
            },
            estimated_duration_secs: None,
        }
    }

    #[tokio::test]
    async fn no_build_command_is_a_no_op() {
        let dir = tempdir().unwrap();
        let executor = ShellTaskExecutor::verification_only();
        executor.execute(&task(), dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn failing_build_command_errors() {
        let dir = tempdir().unwrap();
        let executor = ShellTaskExecutor::new(Some("false".to_string()), Duration::from_secs(5));
        let err = executor.execute(&task(), dir.path()).await.unwrap_err();
        assert!(matches!(err, WorkerError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn passing_build_command_succeeds() {
        let dir = tempdir().unwrap();
        let executor = ShellTaskExecutor::new(Some("true".to_string()), Duration::from_secs(5));
        executor.execute(&task(), dir.path()).await.unwrap();
    }
}
