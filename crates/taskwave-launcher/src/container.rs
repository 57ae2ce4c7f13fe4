//! The container launcher backend, used when `launcher_mode = "container"`
//! or `"auto"` resolves to Docker being reachable. Gives each worker its
//! own filesystem and process namespace instead of sharing the host.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use tokio::time::sleep;

use crate::error::{LauncherError, LauncherResult};
use crate::traits::{ExitStatus, LaunchEnv, LaunchHandle, Launcher};

const POLL_INTERVAL: Duration = Duration::from_millis(300);

pub struct Container {
    docker: Docker,
    image: String,
}

impl Container {
    /// Connect to the local Docker daemon over its default socket. Fails
    /// fast with [`LauncherError::LauncherUnavailable`] if unreachable so
    /// `auto` selection can fall back to the subprocess backend.
    pub fn connect(image: impl Into<String>) -> LauncherResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| LauncherError::LauncherUnavailable {
            backend: "container".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            docker,
            image: image.into(),
        })
    }

    pub async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

#[async_trait]
impl Launcher for Container {
    async fn spawn(&self, env: &LaunchEnv) -> LauncherResult<LaunchHandle> {
        let container_name = format!("taskwave-worker-{}", env.worker_id);
        let env_pairs: Vec<String> = env.as_pairs().into_iter().map(|(k, v)| format!("{k}={v}")).collect();

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:/workspace",
                env.workspace_path.display()
            )]),
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(self.image.clone()),
            env: Some(env_pairs),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(host_config),
            labels: Some(HashMap::from([("taskwave.worker_id".to_string(), env.worker_id.clone())])),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| LauncherError::SpawnFailed {
                worker_id: env.worker_id.clone(),
                reason: e.to_string(),
            })?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| LauncherError::SpawnFailed {
                worker_id: env.worker_id.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(worker_id = %env.worker_id, container_id = %created.id, "spawned container worker");

        Ok(LaunchHandle {
            worker_id: env.worker_id.clone(),
            backend_id: created.id,
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
                    reason: format!("container exited before becoming ready: {status:?}"),
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
        let options = StopContainerOptions {
            t: grace_period.as_secs() as i64,
        };
        match self.docker.stop_container(&handle.backend_id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped or gone: not an error from the caller's perspective.
            Err(bollard::errors::Error::DockerResponseServerError { status_code, .. })
                if status_code == 304 || status_code == 404 =>
            {
                Ok(())
            }
            Err(e) => Err(LauncherError::OperationFailed {
                worker_id: handle.worker_id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn is_alive(&self, handle: &LaunchHandle) -> LauncherResult<Option<ExitStatus>> {
        match self.docker.inspect_container(&handle.backend_id, None).await {
            Ok(inspect) => {
                let state = inspect.state.unwrap_or_default();
                if state.running.unwrap_or(false) {
                    Ok(None)
                } else {
                    let code = state.exit_code.map(|c| c as i32);
                    Ok(Some(code.map(ExitStatus::Exited).unwrap_or(ExitStatus::Vanished)))
                }
            }
            Err(bollard::errors::Error::DockerResponseServerError { status_code, .. }) if status_code == 404 => {
                Ok(Some(ExitStatus::Vanished))
            }
            Err(e) => Err(LauncherError::OperationFailed {
                worker_id: handle.worker_id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn cleanup(&self, handle: &LaunchHandle) -> LauncherResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.backend_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code, .. }) if status_code == 404 => {
                Ok(())
            }
            Err(e) => Err(LauncherError::OperationFailed {
                worker_id: handle.worker_id.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
