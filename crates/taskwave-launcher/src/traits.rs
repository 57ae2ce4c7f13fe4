//! The Launcher abstraction: a polymorphic mechanism to spawn a worker as a
//! local subprocess or a container, with identical lifecycle semantics.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::LauncherResult;

/// The worker entry contract's environment, guaranteed present for every
/// spawned worker regardless of backend.
#[derive(Debug, Clone)]
pub struct LaunchEnv {
    pub worker_id: String,
    pub feature: String,
    pub branch: String,
    pub workspace_path: PathBuf,
    pub registry_path: PathBuf,
    pub task_list_id: String,
    /// Additional backend-agnostic environment variables (e.g. API
    /// credentials), implementation-defined.
    pub extra_env: Vec<(String, String)>,
}

impl LaunchEnv {
    /// Render as `KEY=VALUE` pairs, in the order a subprocess or container
    /// environment block expects.
    pub fn as_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("WORKER_ID".to_string(), self.worker_id.clone()),
            ("FEATURE".to_string(), self.feature.clone()),
            ("BRANCH".to_string(), self.branch.clone()),
            (
                "WORKSPACE_PATH".to_string(),
                self.workspace_path.display().to_string(),
            ),
            (
                "REGISTRY_PATH".to_string(),
                self.registry_path.display().to_string(),
            ),
            ("TASK_LIST_ID".to_string(), self.task_list_id.clone()),
        ];
        pairs.extend(self.extra_env.iter().cloned());
        pairs
    }

    /// Path the worker is expected to write its readiness sentinel to.
    pub fn sentinel_path(&self) -> PathBuf {
        self.workspace_path.join(".ready")
    }
}

/// Backend-specific identifier plus bookkeeping for a live worker.
#[derive(Debug, Clone)]
pub struct LaunchHandle {
    pub worker_id: String,
    /// PID for subprocess, container id for container backend.
    pub backend_id: String,
    pub allocated_ports: Vec<u16>,
    pub workspace_path: PathBuf,
    pub last_seen: Instant,
}

/// Exit status observed for a worker that has stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Clean exit with the process's own exit code (0/1/2/3).
    Exited(i32),
    /// The process/container vanished without a recorded exit code
    /// (OOM-killed, preempted, runtime crash).
    Vanished,
}

/// Capability set every launcher backend implements: spawn, wait_ready,
/// stop, is_alive, cleanup.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn a worker instance. Does not block for readiness.
    async fn spawn(&self, env: &LaunchEnv) -> LauncherResult<LaunchHandle>;

    /// Block until the worker's readiness sentinel appears, or until
    /// `grace_period` elapses.
    async fn wait_ready(&self, handle: &LaunchHandle, grace_period: Duration) -> LauncherResult<()>;

    /// Request a graceful stop; escalate to a forced kill after
    /// `grace_period` if the worker has not exited.
    async fn stop(&self, handle: &LaunchHandle, grace_period: Duration) -> LauncherResult<()>;

    /// Check liveness, returning the exit status if the worker has stopped.
    async fn is_alive(&self, handle: &LaunchHandle) -> LauncherResult<Option<ExitStatus>>;

    /// Remove any sentinel files, temp directories, or backend resources
    /// (container, in the container backend) left behind by `handle`.
    async fn cleanup(&self, handle: &LaunchHandle) -> LauncherResult<()>;
}
