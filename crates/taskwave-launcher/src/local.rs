//! The subprocess launcher backend. Spawns `taskwave-worker` as a plain
//! child process on the host, matching how the rest of this stack runs
//! shell commands (`taskwave-exec::run_command`) but held open for the
//! worker's whole lifetime instead of run-to-completion.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::{Child, Command};
use tokio::time::sleep;

use crate::error::{LauncherError, LauncherResult};
use crate::traits::{ExitStatus, LaunchEnv, LaunchHandle, Launcher};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawns the worker binary directly on the host. Liveness and lifecycle
/// are tracked through an in-process table keyed by worker id, since a
/// subprocess has no durable identity beyond its PID once it exits.
pub struct LocalSubprocess {
    worker_binary: PathBuf,
    worker_args: Vec<String>,
    children: DashMap<String, Child>,
}

impl LocalSubprocess {
    pub fn new(worker_binary: impl Into<PathBuf>) -> Self {
        Self {
            worker_binary: worker_binary.into(),
            worker_args: Vec::new(),
            children: DashMap::new(),
        }
    }

    pub fn with_args(worker_binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            worker_binary: worker_binary.into(),
            worker_args: args,
            children: DashMap::new(),
        }
    }
}

#[async_trait]
impl Launcher for LocalSubprocess {
    async fn spawn(&self, env: &LaunchEnv) -> LauncherResult<LaunchHandle> {
        let mut command = Command::new(&self.worker_binary);
        command.args(&self.worker_args);
        command.kill_on_drop(false);
        for (key, value) in env.as_pairs() {
            command.env(key, value);
        }
        command.current_dir(&env.workspace_path);

        let child = command.spawn().map_err(|e| LauncherError::SpawnFailed {
            worker_id: env.worker_id.clone(),
            reason: e.to_string(),
        })?;

        let pid = child
            .id()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        tracing::info!(worker_id = %env.worker_id, pid = %pid, "spawned subprocess worker");

        self.children.insert(env.worker_id.clone(), child);

        Ok(LaunchHandle {
            worker_id: env.worker_id.clone(),
            backend_id: pid,
            allocated_ports: Vec::new(),
            workspace_path: env.workspace_path.clone(),
            last_seen: Instant::now(),
        })
    }

    async fn wait_ready(&self, handle: &LaunchHandle, grace_period: Duration) -> LauncherResult<()> {
        let sentinel = handle.workspace_path.join(".ready");
        let deadline = Instant::now() + grace_period;

        while Instant::now() < deadline {
            if sentinel.exists() {
                return Ok(());
            }
            if let Some(status) = self.is_alive(handle).await? {
                return Err(LauncherError::SpawnFailed {
                    worker_id: handle.worker_id.clone(),
                    reason: format!("worker exited before becoming ready: {status:?}"),
                });
            }
            sleep(POLL_INTERVAL).await;
        }

        Err(LauncherError::ReadinessTimeout {
            worker_id: handle.worker_id.clone(),
            grace_secs: grace_period.as_secs(),
        })
    }

    async fn stop(&self, handle: &LaunchHandle, grace_period: Duration) -> LauncherResult<()> {
        let Some(mut entry) = self.children.get_mut(&handle.worker_id) else {
            return Ok(());
        };

        // Best-effort graceful shutdown: the worker polls for a checkpoint
        // opportunity on its own; we only have a hard kill available from
        // outside the process on all platforms, so
        // give it `grace_period` to exit on its own before escalating.
        let deadline = Instant::now() + grace_period;
        loop {
            match entry.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => sleep(POLL_INTERVAL).await,
                Err(e) => {
                    return Err(LauncherError::OperationFailed {
                        worker_id: handle.worker_id.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        entry.start_kill().map_err(|e| LauncherError::OperationFailed {
            worker_id: handle.worker_id.clone(),
            reason: e.to_string(),
        })?;
        let _ = entry.wait().await;
        Ok(())
    }

    async fn is_alive(&self, handle: &LaunchHandle) -> LauncherResult<Option<ExitStatus>> {
        let Some(mut entry) = self.children.get_mut(&handle.worker_id) else {
            return Ok(Some(ExitStatus::Vanished));
        };

        match entry.try_wait() {
            Ok(None) => Ok(None),
            Ok(Some(status)) => Ok(Some(
                status
                    .code()
                    .map(ExitStatus::Exited)
                    .unwrap_or(ExitStatus::Vanished),
            )),
            Err(e) => Err(LauncherError::OperationFailed {
                worker_id: handle.worker_id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn cleanup(&self, handle: &LaunchHandle) -> LauncherResult<()> {
        self.children.remove(&handle.worker_id);
        let sentinel = handle.workspace_path.join(".ready");
        if sentinel.exists() {
            tokio::fs::remove_file(&sentinel).await.map_err(LauncherError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env_for(workspace: PathBuf) -> LaunchEnv {
        LaunchEnv {
            worker_id: "w1".to_string(),
            feature: "demo".to_string(),
            branch: "taskwave/demo".to_string(),
            workspace_path: workspace,
            registry_path: PathBuf::from("/tmp/registry.json"),
            task_list_id: "list-1".to_string(),
            extra_env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn spawn_and_detect_exit() {
        let dir = tempdir().unwrap();
        let launcher = LocalSubprocess::new("true");
        let env = env_for(dir.path().to_path_buf());

        let handle = launcher.spawn(&env).await.unwrap();
        // Poll until the process exits; `true` returns immediately.
        let mut status = None;
        for _ in 0..50 {
            status = launcher.is_alive(&handle).await.unwrap();
            if status.is_some() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, Some(ExitStatus::Exited(0)));
    }

    #[tokio::test]
    async fn wait_ready_times_out_without_sentinel() {
        let dir = tempdir().unwrap();
        let launcher = LocalSubprocess::with_args("sleep", vec!["5".to_string()]);
        let env = env_for(dir.path().to_path_buf());

        let handle = launcher.spawn(&env).await.unwrap();
        let result = launcher.wait_ready(&handle, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(LauncherError::ReadinessTimeout { .. })));
        launcher.stop(&handle, Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn wait_ready_succeeds_once_sentinel_appears() {
        let dir = tempdir().unwrap();
        let launcher = LocalSubprocess::with_args("sleep", vec!["5".to_string()]);
        let env = env_for(dir.path().to_path_buf());
        std::fs::write(dir.path().join(".ready"), b"ok").unwrap();

        let handle = launcher.spawn(&env).await.unwrap();
        launcher.wait_ready(&handle, Duration::from_secs(1)).await.unwrap();
        launcher.stop(&handle, Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_removes_sentinel() {
        let dir = tempdir().unwrap();
        let launcher = LocalSubprocess::new("true");
        let env = env_for(dir.path().to_path_buf());
        std::fs::write(dir.path().join(".ready"), b"ok").unwrap();

        let handle = launcher.spawn(&env).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        launcher.cleanup(&handle).await.unwrap();
        assert!(!dir.path().join(".ready").exists());
    }
}
