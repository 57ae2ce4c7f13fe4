//! The `taskwave-worker` binary: entry point for a single spawned worker
//! process. Reads the worker entry contract from the environment, runs
//! the level loop to completion, and maps the outcome onto the exit
//! codes the orchestrator interprets.

use std::process::ExitCode;
use std::sync::Arc;

use taskwave_worker::{ShellTaskExecutor, Worker, WorkerConfig, WorkerExit};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "worker bootstrap failed");
            return ExitCode::from(1);
        }
    };
    let worker_id = config.worker_id.clone();

    let build_command = std::env::var("BUILD_COMMAND").ok();
    let executor: Arc<dyn taskwave_worker::TaskExecutor> = Arc::new(match build_command {
        Some(cmd) => ShellTaskExecutor::new(Some(cmd), std::time::Duration::from_secs(600)),
        None => ShellTaskExecutor::verification_only(),
    });

    let worker = match Worker::bootstrap(config, executor).await {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(worker_id, error = %e, "worker bootstrap failed");
            return ExitCode::from(1);
        }
    };

    match worker.run().await {
        Ok(WorkerExit::AllDone) => ExitCode::from(0),
        Ok(WorkerExit::Checkpoint) => ExitCode::from(2),
        Ok(WorkerExit::AllBlocked) => ExitCode::from(3),
        Err(e) => {
            tracing::error!(worker_id, error = %e, "worker exited with a fatal error");
            ExitCode::from(1)
        }
    }
}
