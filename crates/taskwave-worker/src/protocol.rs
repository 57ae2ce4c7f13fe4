//! The Worker Protocol's level loop: bootstrap, claim-next, execute,
//! verify, commit, checkpoint, and the exit-code contract.
//!
//! This is the multi-level, retry-capped, checkpoint-aware generalization
//! of a single-task worker's pipeline — claim one task, do the work,
//! verify it, commit it, move on — run independently by every worker
//! process against the shared [`Registry`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use taskwave_exec::run_verification;
use taskwave_graph::{Graph, Plan, Task, assign_workers, parse_and_validate};
use taskwave_registry::{LevelStatus, Registry, TaskStatus, WorkerStatus};
use taskwave_vcs::VcsAdapter;

use crate::checkpoint::{CheckpointMetadata, ContextEstimator, TaskCountEstimator, should_checkpoint};
use crate::error::{WorkerError, WorkerResult};
use crate::executor::TaskExecutor;

/// How a worker reconciles its branch with the merged baseline after a
/// level promotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseStrategy {
    Rebase,
    FastForward,
}

/// Everything the worker entry contract guarantees, plus the
/// implementation-defined policy knobs the orchestrator injects via
/// [`taskwave_launcher::LaunchEnv::extra_env`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub feature: String,
    pub branch: String,
    pub workspace_path: PathBuf,
    pub registry_dir: PathBuf,
    pub task_list_id: String,
    pub worker_count: usize,
    pub max_retries: u32,
    pub checkpoint_threshold_pct: u8,
    pub checkpoint_task_budget: u32,
    pub poll_min: Duration,
    pub poll_max: Duration,
    pub rebase_strategy: RebaseStrategy,
}

impl WorkerConfig {
    /// Read the worker entry contract's environment variables, plus
    /// the orchestrator's optional policy overrides. `WORKER_ID`,
    /// `FEATURE`, `BRANCH`, `WORKSPACE_PATH`, and `REGISTRY_PATH` are
    /// required; everything else has a default.
    pub fn from_env() -> WorkerResult<Self> {
        let worker_id = required_env("WORKER_ID")?;
        let feature = required_env("FEATURE")?;
        let branch = required_env("BRANCH")?;
        let workspace_path = PathBuf::from(required_env("WORKSPACE_PATH")?);
        let registry_dir = PathBuf::from(required_env("REGISTRY_PATH")?);
        let task_list_id = required_env("TASK_LIST_ID")?;

        let worker_count = optional_env("WORKER_COUNT").unwrap_or(1);
        let max_retries = optional_env("MAX_RETRIES").unwrap_or(taskwave_registry::DEFAULT_MAX_RETRIES);
        let checkpoint_threshold_pct = optional_env("CHECKPOINT_THRESHOLD_PCT").unwrap_or(70);
        let checkpoint_task_budget = optional_env("CHECKPOINT_TASK_BUDGET").unwrap_or(10);
        let rebase_strategy = match std::env::var("REBASE_STRATEGY").ok().as_deref() {
            Some("fast-forward") => RebaseStrategy::FastForward,
            _ => RebaseStrategy::Rebase,
        };

        Ok(Self {
            worker_id,
            feature,
            branch,
            workspace_path,
            registry_dir,
            task_list_id,
            worker_count,
            max_retries,
            checkpoint_threshold_pct,
            checkpoint_task_budget,
            poll_min: Duration::from_millis(100),
            poll_max: Duration::from_secs(2),
            rebase_strategy,
        })
    }

    fn worker_index(&self) -> WorkerResult<usize> {
        self.worker_id.parse().map_err(|_| WorkerError::Bootstrap {
            reason: format!("WORKER_ID {:?} is not a non-negative integer", self.worker_id),
        })
    }

    fn graph_path(&self) -> PathBuf {
        self.registry_dir.join(format!("{}.graph.json", self.feature))
    }
}

fn required_env(key: &str) -> WorkerResult<String> {
    std::env::var(key).map_err(|_| WorkerError::Bootstrap {
        reason: format!("missing required environment variable {key}"),
    })
}

fn optional_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// The process exit code the worker protocol assigns to each terminal
/// outcome: `0` all-done, `2` checkpoint, `3` all-remaining-blocked. Fatal
/// errors (`1`) are represented by `Err` rather than a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    AllDone,
    Checkpoint,
    AllBlocked,
}

/// Outcome of draining one level's worth of this worker's assigned tasks.
enum LevelOutcome {
    /// Every assigned task at this level is `Completed`.
    Done,
    /// Every assigned task is terminal but at least one is `Blocked`.
    AllBlocked,
    /// The worker hit its context-pressure threshold mid-task.
    Checkpoint,
}

/// One claimed task's disposition; either way the level loop moves on to
/// the next claim attempt, except `Checkpointed` which ends the run.
enum TaskOutcome {
    Continue,
    Checkpointed,
}

/// Whether the level this worker is waiting on resolved successfully
/// (merged and promoted) or was halted for human intervention.
enum LevelWaitOutcome {
    Complete,
    Failed,
}

/// The worker's bootstrapped state: the immutable Graph and Plan it
/// computed at startup, a handle on the shared Registry, and the pluggable
/// executor performing each task's domain-specific work.
pub struct Worker {
    config: WorkerConfig,
    graph: Graph,
    plan: Plan,
    registry: Registry,
    executor: Arc<dyn TaskExecutor>,
    estimator: Box<dyn ContextEstimator>,
}

impl Worker {
    /// Chdir into the workspace, load the Graph, recompute the Plan
    /// (assignment is a pure function of the
    /// graph and worker count, so it is never itself persisted), open the
    /// Registry, write the readiness sentinel, and report `Ready`.
    pub async fn bootstrap(config: WorkerConfig, executor: Arc<dyn TaskExecutor>) -> WorkerResult<Self> {
        std::env::set_current_dir(&config.workspace_path).map_err(|e| WorkerError::Bootstrap {
            reason: format!("failed to chdir into workspace {}: {e}", config.workspace_path.display()),
        })?;

        let graph_bytes = std::fs::read(config.graph_path()).map_err(|e| WorkerError::Bootstrap {
            reason: format!("failed to read task graph at {}: {e}", config.graph_path().display()),
        })?;
        let graph = parse_and_validate(&graph_bytes)?;
        let plan = assign_workers(&graph, config.worker_count)?;

        let registry = Registry::open_with_retries(&config.registry_dir, &config.feature, config.max_retries).await?;

        std::fs::write(config.workspace_path.join(".ready"), b"ready\n").map_err(|e| WorkerError::Bootstrap {
            reason: format!("failed to write readiness sentinel: {e}"),
        })?;

        registry.set_worker(&config.worker_id, WorkerStatus::Ready).await?;
        tracing::info!(worker_id = %config.worker_id, feature = %config.feature, "worker ready");

        let estimator: Box<dyn ContextEstimator> =
            Box::new(TaskCountEstimator::new(config.checkpoint_task_budget));

        Ok(Self {
            config,
            graph,
            plan,
            registry,
            executor,
            estimator,
        })
    }

    /// Stages 2-5: run the level loop until the graph is exhausted, a
    /// checkpoint is requested, or this worker's remaining tasks are all
    /// blocked.
    pub async fn run(mut self) -> WorkerResult<WorkerExit> {
        let worker_index = self.config.worker_index()?;
        let max_level = self.graph.max_level();
        let mut level = 1u32;

        while level <= max_level {
            let assigned = self.plan.tasks_for(worker_index, level).to_vec();

            if !assigned.is_empty() {
                match self.run_level(&assigned).await? {
                    LevelOutcome::Checkpoint => return Ok(WorkerExit::Checkpoint),
                    LevelOutcome::AllBlocked => return Ok(WorkerExit::AllBlocked),
                    LevelOutcome::Done => {}
                }
            }

            match self.await_level_complete(level).await? {
                LevelWaitOutcome::Complete => {
                    self.sync_baseline(level)?;
                }
                LevelWaitOutcome::Failed => return Ok(WorkerExit::AllBlocked),
            }

            level += 1;
        }

        self.registry
            .set_worker(&self.config.worker_id, WorkerStatus::Stopped { exit_code: 0 })
            .await?;
        Ok(WorkerExit::AllDone)
    }

    /// Drain every assigned task at this level: claim-next with bounded
    /// backoff, execute the claimed task to a terminal status one at a
    /// time, repeat until none remain.
    async fn run_level(&mut self, assigned: &[String]) -> WorkerResult<LevelOutcome> {
        let mut backoff = self.config.poll_min;

        loop {
            if self.registry.stop_requested() {
                tracing::info!("stop requested, exiting between claims with no WIP to commit");
                self.registry.set_worker(&self.config.worker_id, WorkerStatus::Idle).await?;
                return Ok(LevelOutcome::Checkpoint);
            }

            let snapshot = self.registry.snapshot();
            let remaining: Vec<String> = assigned
                .iter()
                .filter(|id| !snapshot.tasks.get(id.as_str()).map(TaskStatus::is_terminal).unwrap_or(false))
                .cloned()
                .collect();

            if remaining.is_empty() {
                let all_completed = assigned
                    .iter()
                    .all(|id| matches!(snapshot.tasks.get(id), Some(TaskStatus::Completed { .. })));
                return Ok(if all_completed { LevelOutcome::Done } else { LevelOutcome::AllBlocked });
            }

            let mut claimed: Option<String> = None;
            for id in &remaining {
                let task = self
                    .graph
                    .task(id)
                    .expect("assigned task id always exists in the validated graph");
                if self.registry.claim(id, &self.config.worker_id, &task.prerequisites).await? {
                    claimed = Some(id.clone());
                    break;
                }
            }

            let Some(task_id) = claimed else {
                self.registry.set_worker(&self.config.worker_id, WorkerStatus::Idle).await?;
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, self.config.poll_max);
                continue;
            };

            backoff = self.config.poll_min;
            match self.execute_claimed(&task_id).await? {
                TaskOutcome::Continue => continue,
                TaskOutcome::Checkpointed => return Ok(LevelOutcome::Checkpoint),
            }
        }
    }

    /// Execute → verify → commit a single claimed task, or checkpoint if
    /// context pressure has crossed the configured threshold.
    async fn execute_claimed(&mut self, task_id: &str) -> WorkerResult<TaskOutcome> {
        let task = self
            .graph
            .task(task_id)
            .expect("assigned task id always exists in the validated graph")
            .clone();

        self.registry
            .set_worker(
                &self.config.worker_id,
                WorkerStatus::Running { current_task: task_id.to_string() },
            )
            .await?;
        self.registry
            .update_task(
                task_id,
                Some(&self.config.worker_id),
                TaskStatus::InProgress {
                    worker_id: self.config.worker_id.clone(),
                    started_at: Utc::now(),
                },
            )
            .await?;

        if let Err(e) = self.executor.execute(&task, &self.config.workspace_path).await {
            tracing::warn!(task_id, error = %e, "task execution failed");
            self.registry
                .record_failure(task_id, &self.config.worker_id, e.to_string())
                .await?;
            return Ok(TaskOutcome::Continue);
        }

        if should_checkpoint(self.estimator.percent_used(), self.config.checkpoint_threshold_pct) {
            self.checkpoint(&task, task_id).await?;
            return Ok(TaskOutcome::Checkpointed);
        }

        let verification = run_verification(
            &self.config.workspace_path,
            &task.verification.command,
            task.verification.timeout_secs,
        )
        .await?;

        if self.registry.stop_requested() {
            self.checkpoint(&task, task_id).await?;
            return Ok(TaskOutcome::Checkpointed);
        }

        if verification.passed {
            let files = owned_files(&task);
            let vcs = VcsAdapter::open(&self.config.workspace_path)?;
            let message = format!(
                "Task-ID: {task_id}\nWorker: {}\nLevel: {}\nVerification: {}\n\n{}",
                self.config.worker_id, task.level, task.verification.command, task.title,
            );
            let commit_ref = vcs.commit(&files, &message, &format!("worker-{}", self.config.worker_id))?;
            self.registry
                .update_task(
                    task_id,
                    Some(&self.config.worker_id),
                    TaskStatus::Completed {
                        worker_id: self.config.worker_id.clone(),
                        completed_at: Utc::now(),
                        commit_ref,
                    },
                )
                .await?;
            self.estimator.record_task_completed();
        } else {
            tracing::warn!(task_id, exit_code = ?verification.exit_code, "task verification failed");
            self.registry
                .record_failure(
                    task_id,
                    &self.config.worker_id,
                    format!("verification failed (exit {:?}): {}", verification.exit_code, verification.stderr),
                )
                .await?;
        }

        Ok(TaskOutcome::Continue)
    }

    /// Commit work-in-progress and transition the task to `Checkpointed`
    /// so a replacement worker can re-claim it.
    async fn checkpoint(&mut self, task: &Task, task_id: &str) -> WorkerResult<()> {
        let metadata = CheckpointMetadata {
            percent_complete: self.estimator.percent_used(),
            next_action: format!("resume execution and verification for {task_id}"),
        };
        tracing::info!(task_id, pct = metadata.percent_complete, "checkpointing under context pressure");

        let vcs = VcsAdapter::open(&self.config.workspace_path)?;
        let message = format!(
            "WIP checkpoint\nTask-ID: {task_id}\nWorker: {}\nPercent-Complete: {}\nNext-Action: {}",
            self.config.worker_id, metadata.percent_complete, metadata.next_action,
        );
        let files = owned_files(task);
        vcs.commit(&files, &message, &format!("worker-{}", self.config.worker_id))?;

        self.registry
            .update_task(
                task_id,
                Some(&self.config.worker_id),
                TaskStatus::Checkpointed {
                    worker_id: self.config.worker_id.clone(),
                    reason: "context pressure".to_string(),
                    context_pct: metadata.percent_complete,
                },
            )
            .await?;
        self.registry.set_worker(&self.config.worker_id, WorkerStatus::Checkpointing).await?;
        Ok(())
    }

    /// Stage 3: poll the level's registry state until the orchestrator
    /// marks it `Complete` (merge promoted) or `Failed` (halted).
    async fn await_level_complete(&self, level: u32) -> WorkerResult<LevelWaitOutcome> {
        self.registry.set_worker(&self.config.worker_id, WorkerStatus::Idle).await?;
        loop {
            let snapshot = self.registry.snapshot();
            match snapshot.levels.get(&level).map(|l| l.status) {
                Some(LevelStatus::Complete) => return Ok(LevelWaitOutcome::Complete),
                Some(LevelStatus::Failed) => {
                    tracing::warn!(level, "level halted, worker has no further work to contribute");
                    return Ok(LevelWaitOutcome::Failed);
                }
                _ => tokio::time::sleep(self.config.poll_min).await,
            }
        }
    }

    /// Pull the newly-promoted baseline into the worker's own branch
    /// before advancing to the next level.
    fn sync_baseline(&self, level: u32) -> WorkerResult<()> {
        let snapshot = self.registry.snapshot();
        let Some(baseline_ref) = snapshot.levels.get(&level).and_then(|l| l.merge_ref.clone()) else {
            return Ok(());
        };
        let vcs = VcsAdapter::open(&self.config.workspace_path)?;
        match self.config.rebase_strategy {
            RebaseStrategy::Rebase => vcs.rebase_onto(&baseline_ref)?,
            RebaseStrategy::FastForward => {
                vcs.merge(&baseline_ref, &self.config.branch)?;
            }
        }
        Ok(())
    }
}

fn owned_files(task: &Task) -> Vec<String> {
    task.files.create.iter().chain(task.files.modify.iter()).cloned().collect()
}

/// Doubles the backoff, capped at `max`. Used between unsuccessful claim
/// attempts (100ms -> 2s).
fn next_backoff(current: Duration, max: Duration) -> Duration {
    let doubled = current.saturating_mul(2);
    if doubled > max { max } else { doubled }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let max = Duration::from_secs(2);
        let mut d = Duration::from_millis(100);
        d = next_backoff(d, max);
        assert_eq!(d, Duration::from_millis(200));
        d = next_backoff(d, max);
        assert_eq!(d, Duration::from_millis(400));
        d = next_backoff(d, max);
        assert_eq!(d, Duration::from_millis(800));
        d = next_backoff(d, max);
        assert_eq!(d, Duration::from_millis(1600));
        d = next_backoff(d, max);
        assert_eq!(d, max);
        d = next_backoff(d, max);
        assert_eq!(d, max);
    }

    #[test]
    fn worker_index_parses_numeric_id() {
        let config = sample_config("3");
        assert_eq!(config.worker_index().unwrap(), 3);
    }

    #[test]
    fn worker_index_rejects_non_numeric_id() {
        let config = sample_config("worker-a");
        assert!(config.worker_index().is_err());
    }

    fn sample_config(worker_id: &str) -> WorkerConfig {
        WorkerConfig {
            worker_id: worker_id.to_string(),
            feature: "demo".to_string(),
            branch: "taskwave/demo/worker-0".to_string(),
            workspace_path: PathBuf::from("/tmp/demo-worker-0"),
            registry_dir: PathBuf::from("/tmp/demo-state"),
            task_list_id: "list-1".to_string(),
            worker_count: 1,
            max_retries: 3,
            checkpoint_threshold_pct: 70,
            checkpoint_task_budget: 10,
            poll_min: Duration::from_millis(100),
            poll_max: Duration::from_secs(2),
            rebase_strategy: RebaseStrategy::Rebase,
        }
    }
}
