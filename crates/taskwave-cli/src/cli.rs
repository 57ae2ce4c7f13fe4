//! CLI argument definitions for `taskwave`.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands to [`crate::commands`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// taskwave -- level-based orchestrator for parallel worker fleets.
#[derive(Parser)]
#[command(
    name = "taskwave",
    version,
    about = "Orchestrates N isolated workers through a dependency-ordered task graph",
    long_about = "Partitions a task graph into dependency levels, launches worker \
                  processes to claim and execute tasks within a level, runs quality \
                  gates, and merges worker branches into a shared baseline before \
                  advancing."
)]
pub struct Cli {
    /// Path to `taskwave.toml`. Missing file falls back to defaults.
    #[arg(long, global = true, default_value = "taskwave.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a run: parse the graph, compute the plan, spawn workers, and
    /// pump levels to completion.
    Rush {
        /// Path to the task graph document.
        #[arg(long)]
        graph: PathBuf,

        /// Feature identifier; names the registry file and branch prefix.
        #[arg(long)]
        feature: String,

        /// Path to the repository the orchestrator drives merges against.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Path to the worker binary. Defaults to a binary named
        /// `taskwave-worker` resolved via `PATH`.
        #[arg(long, default_value = "taskwave-worker")]
        worker_binary: PathBuf,

        /// Override the configured worker count.
        #[arg(long)]
        workers: Option<usize>,

        /// Override the configured launcher backend.
        #[arg(long, value_name = "auto|subprocess|container")]
        mode: Option<String>,
    },

    /// Print the registry snapshot: per-level, per-task, and per-worker
    /// status.
    Status {
        #[arg(long)]
        feature: String,

        /// Print the raw registry document as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Print the append-only event log, optionally filtered.
    Logs {
        #[arg(long)]
        feature: String,

        /// Only show events whose detail mentions this level.
        #[arg(long)]
        level: Option<u32>,

        /// Only show events at or after this RFC 3339 timestamp.
        #[arg(long)]
        since: Option<String>,
    },

    /// Cancel a run. Workers are signalled to checkpoint and exit at the
    /// next level boundary; `--force` skips the grace period.
    Stop {
        #[arg(long)]
        feature: String,

        /// Terminate workers immediately instead of waiting for a graceful
        /// checkpoint exit.
        #[arg(long)]
        force: bool,
    },

    /// Reset `Blocked` tasks back to `Pending` so they can be reclaimed.
    Retry {
        #[arg(long)]
        feature: String,

        /// Reset only this task. Defaults to every `Blocked` task.
        #[arg(long)]
        task: Option<String>,
    },

    /// Force a merge attempt on a level that has already resolved
    /// successfully but was never promoted (e.g. after a crash between
    /// level resolution and merge).
    Merge {
        #[arg(long)]
        feature: String,

        #[arg(long)]
        level: u32,

        /// Path to the task graph document (needed to recompute the plan).
        #[arg(long)]
        graph: PathBuf,

        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// Destroy every worker workspace and branch for a feature.
    Cleanup {
        #[arg(long)]
        feature: String,

        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Also delete the per-worker branches, not just the worktrees.
        #[arg(long)]
        delete_branches: bool,
    },
}
