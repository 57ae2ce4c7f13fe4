//! Shared helpers: tracing initialization and config loading.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use taskwave_orchestrator::TaskwaveConfig;

/// `0` success, `1` run failure, `2` configuration error.
pub const SUCCESS: i32 = 0;
pub const RUN_FAILURE: i32 = 1;
pub const CONFIG_ERROR: i32 = 2;

/// Initialize the tracing subscriber. Honors `RUST_LOG` if set, otherwise
/// falls back to `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Load `taskwave.toml` from `path`, falling back to defaults if the file
/// is absent (the config file is optional).
pub fn load_config(path: &Path) -> Result<TaskwaveConfig> {
    TaskwaveConfig::load(path).with_context(|| format!("failed to load config from {}", path.display()))
}
