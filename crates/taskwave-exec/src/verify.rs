//! Verification Runner.
//!
//! Runs a task's verification command in its workspace directory with the
//! task's declared timeout and reports a structured pass/fail result. Exit
//! code is not interpreted beyond `0 = PASS, else = FAIL`.

use std::path::Path;
use std::time::Duration;

use crate::error::ExecResult;
use crate::run_command;

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub command: String,
    pub passed: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Run `command` inside `workspace`, killing it if it exceeds `timeout_secs`.
pub async fn run_verification(
    workspace: &Path,
    command: &str,
    timeout_secs: u64,
) -> ExecResult<VerificationResult> {
    let output = run_command(command, workspace, Duration::from_secs(timeout_secs)).await?;
    Ok(VerificationResult {
        command: command.to_string(),
        passed: output.passed(),
        timed_out: output.timed_out,
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        duration: output.duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passing_verification_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let result = run_verification(dir.path(), "test -f a.txt", 5).await.unwrap();
        assert!(result.passed);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn failing_verification_command() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_verification(dir.path(), "test -f missing.txt", 5).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn timed_out_verification_is_not_passed() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_verification(dir.path(), "sleep 5", 0).await;
        // A zero timeout always elapses immediately.
        let result = result.unwrap();
        assert!(result.timed_out);
        assert!(!result.passed);
    }
}
