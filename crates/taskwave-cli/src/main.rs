//! CLI entry point for `taskwave`.
//!
//! Provides the `taskwave` command with one subcommand per control-surface
//! verb: `rush`, `status`, `logs`, `stop`, `retry`, `merge`, `cleanup`.

mod cli;
mod commands;
mod helpers;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::helpers::{init_tracing, CONFIG_ERROR};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info");

    let cli = Cli::parse();

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            CONFIG_ERROR
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Rush {
            graph,
            feature,
            repo,
            worker_binary,
            workers,
            mode,
        } => commands::rush(&cli.config, graph, feature, repo, worker_binary, workers, mode).await,

        Commands::Status { feature, json } => commands::status(&cli.config, feature, json).await,

        Commands::Logs { feature, level, since } => commands::logs(&cli.config, feature, level, since).await,

        Commands::Stop { feature, force } => commands::stop(&cli.config, feature, force).await,

        Commands::Retry { feature, task } => commands::retry(&cli.config, feature, task).await,

        Commands::Merge { feature, level, graph, repo } => {
            commands::merge(&cli.config, feature, level, graph, repo).await
        }

        Commands::Cleanup { feature, repo, delete_branches } => {
            commands::cleanup(&cli.config, feature, repo, delete_branches).await
        }
    }
}
