//! `TaskwaveConfig`: the `taskwave.toml` shape, builder-style with
//! [`Default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorResult;

/// Run-time knobs: worker count, launcher backend selection, retry budget,
/// checkpoint threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub workers: usize,
    pub launcher_mode: String,
    pub max_retries: u32,
    pub checkpoint_threshold_pct: u8,
    /// Whether to destroy worker workspaces on a successful teardown.
    /// Implementation-defined; not part of the original control surface.
    pub cleanup_workspaces: bool,
    /// Container image used by the `container` and `auto` launcher
    /// backends. Implementation-defined.
    pub container_image: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            launcher_mode: "auto".to_string(),
            max_retries: taskwave_registry::DEFAULT_MAX_RETRIES,
            checkpoint_threshold_pct: 70,
            cleanup_workspaces: false,
            container_image: "taskwave/worker:latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub worker_ready_secs: u64,
    pub merge_secs: u64,
    /// `0` means unbounded.
    pub level_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            worker_ready_secs: 60,
            merge_secs: 600,
            level_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub workspace_root: PathBuf,
    pub registry_dir: PathBuf,
    pub branch_prefix: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from(".taskwave/workspaces"),
            registry_dir: PathBuf::from(".taskwave/state"),
            branch_prefix: "taskwave".to_string(),
        }
    }
}

/// One gate entry as authored in `taskwave.toml`'s `[[gates.pre_merge]]` /
/// `[[gates.post_merge]]` arrays. The task graph document carries no
/// per-level gate data, so gates live in the run configuration instead
/// and apply uniformly to every level, keeping all policy knobs in one
/// file rather than scattered across inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSpec {
    pub name: String,
    pub command: String,
    #[serde(default = "default_gate_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_gate_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl GateSpec {
    pub fn into_gate(self) -> taskwave_exec::Gate {
        if self.required {
            taskwave_exec::Gate::required(self.name, self.command, self.timeout_secs)
        } else {
            taskwave_exec::Gate::optional(self.name, self.command, self.timeout_secs)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatesConfig {
    pub pre_merge: Vec<GateSpec>,
    pub post_merge: Vec<GateSpec>,
}

impl GatesConfig {
    pub fn pre_merge_gates(&self) -> Vec<taskwave_exec::Gate> {
        self.pre_merge.iter().cloned().map(GateSpec::into_gate).collect()
    }

    pub fn post_merge_gates(&self) -> Vec<taskwave_exec::Gate> {
        self.post_merge.iter().cloned().map(GateSpec::into_gate).collect()
    }
}

/// The complete configuration surface, as loaded from `taskwave.toml`.
/// CLI flags are expected to override individual fields after loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskwaveConfig {
    pub run: RunConfig,
    pub timeouts: TimeoutsConfig,
    pub paths: PathsConfig,
    pub gates: GatesConfig,
}

impl TaskwaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file, falling back to an all-default config if the
    /// file does not exist (`taskwave.toml` is optional).
    pub fn load(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.run.workers = workers;
        self
    }

    pub fn with_launcher_mode(mut self, mode: impl Into<String>) -> Self {
        self.run.launcher_mode = mode.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.run.max_retries = max_retries;
        self
    }

    pub fn with_checkpoint_threshold_pct(mut self, pct: u8) -> Self {
        self.run.checkpoint_threshold_pct = pct;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = TaskwaveConfig::default();
        assert_eq!(cfg.run.workers, 4);
        assert_eq!(cfg.run.launcher_mode, "auto");
        assert_eq!(cfg.run.max_retries, 3);
        assert_eq!(cfg.run.checkpoint_threshold_pct, 70);
        assert_eq!(cfg.timeouts.worker_ready_secs, 60);
        assert_eq!(cfg.timeouts.merge_secs, 600);
        assert_eq!(cfg.timeouts.level_secs, 0);
        assert_eq!(cfg.paths.branch_prefix, "taskwave");
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = TaskwaveConfig::load("/nonexistent/taskwave.toml").unwrap();
        assert_eq!(cfg.run.workers, 4);
    }

    #[test]
    fn load_parses_documented_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskwave.toml");
        std::fs::write(
            &path,
            r#"
[run]
workers = 8
launcher_mode = "container"
max_retries = 5
checkpoint_threshold_pct = 80

[timeouts]
worker_ready_secs = 30
merge_secs = 300
level_secs = 1200

[paths]
workspace_root = "/tmp/ws"
registry_dir = "/tmp/state"
branch_prefix = "feature-x"
"#,
        )
        .unwrap();

        let cfg = TaskwaveConfig::load(&path).unwrap();
        assert_eq!(cfg.run.workers, 8);
        assert_eq!(cfg.run.launcher_mode, "container");
        assert_eq!(cfg.timeouts.level_secs, 1200);
        assert_eq!(cfg.paths.workspace_root, PathBuf::from("/tmp/ws"));
    }

    #[test]
    fn load_parses_gates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskwave.toml");
        std::fs::write(
            &path,
            r#"
[[gates.pre_merge]]
name = "build"
command = "cargo build"
timeout_secs = 300

[[gates.post_merge]]
name = "lint"
command = "cargo clippy"
required = false
"#,
        )
        .unwrap();

        let cfg = TaskwaveConfig::load(&path).unwrap();
        assert_eq!(cfg.gates.pre_merge.len(), 1);
        assert_eq!(cfg.gates.pre_merge[0].name, "build");
        assert!(cfg.gates.pre_merge[0].required);
        assert_eq!(cfg.gates.post_merge[0].timeout_secs, 120);
        assert!(!cfg.gates.post_merge[0].required);
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let cfg = TaskwaveConfig::new().with_workers(2).with_launcher_mode("subprocess");
        assert_eq!(cfg.run.workers, 2);
        assert_eq!(cfg.run.launcher_mode, "subprocess");
    }
}
