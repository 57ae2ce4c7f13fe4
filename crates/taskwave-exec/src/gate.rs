//! Gate Runner.
//!
//! Runs a level's named gate sequence in declared order and classifies each
//! gate's outcome as `PASS`, `FAIL`, `SKIP`, `TIMEOUT`, or `ERROR`. All
//! required gates always run, even after an earlier required gate has
//! already failed, so the report stays complete.

use std::path::Path;
use std::time::Duration;

use crate::error::ExecResult;
use crate::run_command;

/// One gate: a named, timed command that either must pass (`required`) or
/// is advisory.
#[derive(Debug, Clone)]
pub struct Gate {
    pub name: String,
    pub command: String,
    pub timeout_secs: u64,
    pub required: bool,
}

impl Gate {
    pub fn required(name: impl Into<String>, command: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout_secs,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, command: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout_secs,
            required: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    Fail,
    Skip,
    Timeout,
    Error,
}

#[derive(Debug, Clone)]
pub struct GateResult {
    pub name: String,
    pub outcome: GateOutcome,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Run `gates` in order against `cwd`. Returns one [`GateResult`] per gate
/// and `true` iff every required gate passed. A spawn failure (the command
/// itself could not be launched) classifies that gate as `ERROR` rather
/// than aborting the whole run — the caller still gets a complete report.
pub async fn run_gates(gates: &[Gate], cwd: &Path) -> (Vec<GateResult>, bool) {
    let mut results = Vec::with_capacity(gates.len());
    let mut required_failed = false;

    for gate in gates {
        if !gate.required && required_failed {
            results.push(GateResult {
                name: gate.name.clone(),
                outcome: GateOutcome::Skip,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
            });
            continue;
        }

        match run_command(&gate.command, cwd, Duration::from_secs(gate.timeout_secs)).await {
            Ok(output) if output.timed_out => {
                tracing::warn!(gate = %gate.name, "gate timed out");
                if gate.required {
                    required_failed = true;
                }
                results.push(GateResult {
                    name: gate.name.clone(),
                    outcome: GateOutcome::Timeout,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration: output.duration,
                });
            }
            Ok(output) if output.passed() => {
                results.push(GateResult {
                    name: gate.name.clone(),
                    outcome: GateOutcome::Pass,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration: output.duration,
                });
            }
            Ok(output) => {
                tracing::warn!(gate = %gate.name, exit_code = ?output.exit_code, "gate failed");
                if gate.required {
                    required_failed = true;
                }
                results.push(GateResult {
                    name: gate.name.clone(),
                    outcome: GateOutcome::Fail,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration: output.duration,
                });
            }
            Err(e) => {
                tracing::error!(gate = %gate.name, error = %e, "gate errored");
                if gate.required {
                    required_failed = true;
                }
                results.push(GateResult {
                    name: gate.name.clone(),
                    outcome: GateOutcome::Error,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    duration: Duration::ZERO,
                });
            }
        }
    }

    (results, !required_failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_required_gates_pass() {
        let gates = vec![Gate::required("a", "true", 5), Gate::required("b", "true", 5)];
        let (results, ok) = run_gates(&gates, Path::new(".")).await;
        assert!(ok);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.outcome == GateOutcome::Pass));
    }

    #[tokio::test]
    async fn required_failure_still_runs_remaining_required_gates() {
        let gates = vec![
            Gate::required("fails", "false", 5),
            Gate::required("also-runs", "true", 5),
        ];
        let (results, ok) = run_gates(&gates, Path::new(".")).await;
        assert!(!ok);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, GateOutcome::Fail);
        assert_eq!(results[1].outcome, GateOutcome::Pass);
    }

    #[tokio::test]
    async fn optional_gate_after_required_failure_is_skipped() {
        let gates = vec![
            Gate::required("fails", "false", 5),
            Gate::optional("advisory", "true", 5),
        ];
        let (results, ok) = run_gates(&gates, Path::new(".")).await;
        assert!(!ok);
        assert_eq!(results[1].outcome, GateOutcome::Skip);
    }

    #[tokio::test]
    async fn optional_failure_does_not_fail_the_aggregate() {
        let gates = vec![Gate::required("ok", "true", 5), Gate::optional("flaky", "false", 5)];
        let (results, ok) = run_gates(&gates, Path::new(".")).await;
        assert!(ok);
        assert_eq!(results[1].outcome, GateOutcome::Fail);
    }
}
