//! Port Allocator, Verification Runner, and Gate Runner.
//!
//! - [`port`] — ephemeral-port allocation with bind-test reservation.
//! - [`verify`] — runs a task's verification command with a timeout.
//! - [`gate`] — runs a level's ordered gate sequence with timeouts.
//!
//! All process execution funnels through [`run_command`], which mirrors the
//! `tokio::process::Command` + `tokio::time::timeout` + `kill_on_drop(true)`
//! + bounded-output-capture pattern used throughout this codebase's closest
//! relative for subprocess execution.

pub mod error;
pub mod gate;
pub mod port;
pub mod verify;

pub use error::{ExecError, ExecResult};
pub use gate::{run_gates, Gate, GateOutcome, GateResult};
pub use port::{allocate_ports, PortAllocator};
pub use verify::{run_verification, VerificationResult};

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

/// Maximum bytes captured from a single stream (stdout or stderr) before
/// truncation, matching the 100 KB cap used for shell-command output
/// elsewhere in this codebase.
const MAX_OUTPUT_BYTES: usize = 100 * 1024;

/// The outcome of running a single shell command to completion or timeout.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Run `command` (via `sh -c`) in `cwd`, killing the process tree if it
/// exceeds `timeout`. Never returns an `Err` for a non-zero exit or a
/// timeout — both are represented in [`CommandOutput`]; `Err` is reserved
/// for failure to spawn the process at all.
pub async fn run_command(command: &str, cwd: &Path, timeout: Duration) -> ExecResult<CommandOutput> {
    let start = std::time::Instant::now();

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let exit_code = output.status.code();
            tracing::debug!(command, exit_code, "command completed");
            Ok(CommandOutput {
                exit_code,
                stdout: truncate_output(&output.stdout),
                stderr: truncate_output(&output.stderr),
                duration: start.elapsed(),
                timed_out: false,
            })
        }
        Ok(Err(e)) => Err(ExecError::SpawnFailed(e.to_string())),
        Err(_) => {
            tracing::warn!(command, timeout_secs = timeout.as_secs(), "command timed out");
            Ok(CommandOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                duration: start.elapsed(),
                timed_out: true,
            })
        }
    }
}

/// Truncate raw command output to [`MAX_OUTPUT_BYTES`], converting to a
/// lossy UTF-8 string.
fn truncate_output(raw: &[u8]) -> String {
    if raw.len() <= MAX_OUTPUT_BYTES {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        let mut s = String::from_utf8_lossy(&raw[..MAX_OUTPUT_BYTES]).into_owned();
        s.push_str("\n... [output truncated at 100 KB]");
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_passing_command() {
        let out = run_command("true", Path::new("."), Duration::from_secs(5))
            .await
            .expect("spawn ok");
        assert!(out.passed());
    }

    #[tokio::test]
    async fn runs_a_failing_command() {
        let out = run_command("false", Path::new("."), Duration::from_secs(5))
            .await
            .expect("spawn ok");
        assert!(!out.passed());
        assert_eq!(out.exit_code, Some(1));
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_command("echo hello", Path::new("."), Duration::from_secs(5))
            .await
            .expect("spawn ok");
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn times_out_a_slow_command() {
        let out = run_command("sleep 5", Path::new("."), Duration::from_millis(50))
            .await
            .expect("spawn ok");
        assert!(out.timed_out);
        assert!(!out.passed());
    }
}
