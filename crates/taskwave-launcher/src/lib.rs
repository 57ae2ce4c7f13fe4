//! Launcher: spawns a worker as either a local subprocess or a container,
//! behind one trait so the orchestrator never branches on backend.
//!
//! `launcher_mode` in configuration is one of `auto`, `subprocess`, or
//! `container`. `auto` probes Docker and falls back to the subprocess
//! backend when no container runtime is reachable, rather than failing
//! the whole run over an optional capability.

pub mod container;
pub mod error;
pub mod local;
pub mod traits;

pub use container::Container;
pub use error::{LauncherError, LauncherResult};
pub use local::LocalSubprocess;
pub use traits::{ExitStatus, LaunchEnv, LaunchHandle, Launcher};

use std::path::PathBuf;
use std::sync::Arc;

/// The three values `launcher_mode` can take in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherMode {
    Auto,
    Subprocess,
    Container,
}

impl std::str::FromStr for LauncherMode {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "subprocess" => Ok(Self::Subprocess),
            "container" => Ok(Self::Container),
            other => Err(LauncherError::LauncherUnavailable {
                backend: other.to_string(),
                reason: "unknown launcher_mode, expected auto|subprocess|container".to_string(),
            }),
        }
    }
}

/// Resolve `mode` to a concrete [`Launcher`] implementation.
///
/// `container` is honored literally: if Docker isn't reachable, the
/// caller asked for something unavailable and gets a hard error rather
/// than a silent downgrade. `auto` probes Docker itself and only falls
/// back to `subprocess` when the probe fails.
pub async fn resolve_launcher(
    mode: LauncherMode,
    worker_binary: PathBuf,
    container_image: &str,
) -> LauncherResult<Arc<dyn Launcher>> {
    match mode {
        LauncherMode::Subprocess => Ok(Arc::new(LocalSubprocess::new(worker_binary))),
        LauncherMode::Container => {
            let backend = Container::connect(container_image)?;
            Ok(Arc::new(backend))
        }
        LauncherMode::Auto => match Container::connect(container_image) {
            Ok(backend) if backend.ping().await => {
                tracing::info!("auto launcher selection: using container backend");
                Ok(Arc::new(backend))
            }
            _ => {
                tracing::info!("auto launcher selection: no reachable container runtime, using subprocess backend");
                Ok(Arc::new(LocalSubprocess::new(worker_binary)))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_known_modes() {
        assert_eq!(LauncherMode::from_str("auto").unwrap(), LauncherMode::Auto);
        assert_eq!(LauncherMode::from_str("subprocess").unwrap(), LauncherMode::Subprocess);
        assert_eq!(LauncherMode::from_str("container").unwrap(), LauncherMode::Container);
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(LauncherMode::from_str("kubernetes").is_err());
    }

    #[tokio::test]
    async fn subprocess_mode_always_resolves() {
        let launcher = resolve_launcher(LauncherMode::Subprocess, PathBuf::from("true"), "taskwave/worker:latest")
            .await
            .unwrap();
        let env = LaunchEnv {
            worker_id: "w1".to_string(),
            feature: "demo".to_string(),
            branch: "taskwave/demo".to_string(),
            workspace_path: std::env::temp_dir(),
            registry_path: PathBuf::from("/tmp/registry.json"),
            task_list_id: "list-1".to_string(),
            extra_env: Vec::new(),
        };
        let _ = launcher.spawn(&env).await.unwrap();
    }
}
