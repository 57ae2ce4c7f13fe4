//! The Orchestrator: init, the per-level pump, and teardown.
//!
//! A dispatch-then-collect loop — spawn workers, wait for their results,
//! advance once a batch resolves — run level by level with a merge gate
//! between levels. There is no in-process worker pool here: every worker
//! is a full, isolated process launched through the
//! [`taskwave_launcher::Launcher`] abstraction.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;

use taskwave_exec::Gate;
use taskwave_graph::{assign_workers, parse_and_validate, Graph, Plan};
use taskwave_launcher::{resolve_launcher, ExitStatus, LaunchEnv, LaunchHandle, Launcher, LauncherMode};
use taskwave_registry::level::{is_level_resolved, is_level_success};
use taskwave_registry::{LevelStatus, Registry, RegistryDocument, WorkerStatus};
use taskwave_vcs::{VcsAdapter, Workspace, WorkspaceManager};

use crate::config::TaskwaveConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::merge::{MergeCoordinator, MergeOutcome};

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every level reached `Complete` and was promoted.
    Completed,
    /// A level could not be resolved successfully; the run stopped for
    /// human intervention. `reason` is a human-readable summary.
    Halted { level: u32, reason: String },
    /// A `stop` request was observed mid-level; workers were signalled to
    /// checkpoint (or killed, in force mode) rather than left running.
    Cancelled { level: u32, force: bool },
}

struct LiveWorker {
    handle: LaunchHandle,
    workspace: Workspace,
}

/// Owns one feature's run end to end: the graph, the plan, the registry,
/// the launcher, and the merge coordinator.
pub struct Orchestrator {
    config: TaskwaveConfig,
    feature: String,
    repo_path: PathBuf,
    graph: Graph,
    plan: Plan,
    registry: Registry,
    launcher: Arc<dyn Launcher>,
    workspace_manager: WorkspaceManager,
    merge: MergeCoordinator,
    created_workspaces: Vec<Workspace>,
    _run_lock: File,
}

impl Orchestrator {
    /// Loads configuration-adjacent state, opens
    /// the registry, computes the plan, and resolves the launcher backend.
    /// `repo_path` is the orchestrator's own working copy of the
    /// repository — distinct from any worker's workspace — used to drive
    /// merges.
    pub async fn init(
        config: TaskwaveConfig,
        repo_path: impl Into<PathBuf>,
        graph_path: impl AsRef<Path>,
        feature: impl Into<String>,
        worker_binary: impl Into<PathBuf>,
        pre_merge_gates: Vec<Gate>,
        post_merge_gates: Vec<Gate>,
    ) -> OrchestratorResult<Self> {
        let repo_path = repo_path.into();
        let feature = feature.into();

        std::fs::create_dir_all(&config.paths.registry_dir)?;
        let run_lock = Self::acquire_feature_lock(&config.paths.registry_dir, &feature)?;

        let graph_bytes = std::fs::read(graph_path.as_ref())?;
        let graph = parse_and_validate(&graph_bytes)?;
        let plan = assign_workers(&graph, config.run.workers)?;

        let registry = Registry::open_with_retries(&config.paths.registry_dir, &feature, config.run.max_retries).await?;
        registry.clear_stop()?;
        let levels: Vec<(u32, Vec<String>)> = graph.levels().map(|l| (l, graph.tasks_at_level(l).to_vec())).collect();
        registry.seed_from_levels(&levels).await?;

        let graph_cache_path = config.paths.registry_dir.join(format!("{feature}.graph.json"));
        std::fs::write(&graph_cache_path, &graph_bytes)?;

        let mode: LauncherMode = config.run.launcher_mode.parse()?;
        let launcher = resolve_launcher(mode, worker_binary.into(), &config.run.container_image).await?;

        let workspace_manager =
            WorkspaceManager::new(&repo_path, &config.paths.workspace_root, config.paths.branch_prefix.clone())?;

        let vcs = VcsAdapter::open(&repo_path)?;
        let starting_ref = vcs.current_branch()?;
        let merge = MergeCoordinator::new(
            repo_path.clone(),
            config.paths.branch_prefix.clone(),
            feature.clone(),
            pre_merge_gates,
            post_merge_gates,
        );
        vcs.create_branch(&merge.baseline_branch(), &starting_ref)?;

        tracing::info!(feature = %feature, workers = plan.worker_count, max_level = graph.max_level(), "orchestrator initialized");

        Ok(Self {
            config,
            feature,
            repo_path,
            graph,
            plan,
            registry,
            launcher,
            workspace_manager,
            merge,
            created_workspaces: Vec::new(),
            _run_lock: run_lock,
        })
    }

    fn acquire_feature_lock(registry_dir: &Path, feature: &str) -> OrchestratorResult<File> {
        let lock_path = registry_dir.join(format!("{feature}.run.lock"));
        let file = File::create(&lock_path)?;
        file.try_lock_exclusive().map_err(|_| OrchestratorError::FeatureLockHeld {
            feature: feature.to_string(),
        })?;
        Ok(file)
    }

    /// Stages 2-3: spawn every worker once, pump levels to resolution and
    /// merge, then tear down.
    ///
    /// Workers are long-lived: once launched, a worker's own process loops
    /// through every level on its own (claim/execute/verify at levels it
    /// has tasks, wait-and-rebase at levels it doesn't) until it runs out
    /// of levels or exits early. The orchestrator's job per level is to
    /// wait for every task at that level to resolve, merge the result, and
    /// unblock the waiting workers by advancing the registry's level
    /// status — not to spawn a fresh worker set per level.
    pub async fn run(&mut self) -> OrchestratorResult<RunOutcome> {
        let max_level = self.graph.max_level();
        let base_ref = self.merge.baseline_branch();

        let mut live: HashMap<usize, LiveWorker> = HashMap::new();
        for worker_id in 0..self.plan.worker_count {
            let worker = self.spawn_worker(worker_id, &base_ref).await?;
            self.created_workspaces.push(worker.workspace.clone());
            live.insert(worker_id, worker);
        }

        let outcome = self.pump_levels(max_level, &mut live).await?;

        let grace = match &outcome {
            RunOutcome::Cancelled { force: true, .. } => Duration::ZERO,
            _ => Duration::from_secs(self.config.timeouts.worker_ready_secs),
        };
        for worker in live.values() {
            let _ = self.launcher.stop(&worker.handle, grace).await;
            let _ = self.launcher.cleanup(&worker.handle).await;
        }

        Ok(self.teardown(outcome).await)
    }

    /// Iterate every level, waiting for task resolution while supervising
    /// worker liveness, then merge. Stops at the first level that fails to
    /// resolve successfully or whose merge fails.
    async fn pump_levels(&mut self, max_level: u32, live: &mut HashMap<usize, LiveWorker>) -> OrchestratorResult<RunOutcome> {
        for level in 1..=max_level {
            self.registry.set_level_status(level, LevelStatus::Running).await?;
            let task_ids = self.graph.tasks_at_level(level).to_vec();
            let active = self.plan.active_workers_at(level);

            if task_ids.is_empty() {
                self.registry.set_level_status(level, LevelStatus::Complete).await?;
                continue;
            }

            let level_deadline = (self.config.timeouts.level_secs != 0)
                .then(|| tokio::time::Instant::now() + Duration::from_secs(self.config.timeouts.level_secs));

            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;

                if self.registry.stop_requested() {
                    let force = self.registry.stop_is_forced();
                    tracing::warn!(level, force, "stop requested, halting run and tearing down workers");
                    return Ok(RunOutcome::Cancelled { level, force });
                }

                if let Some(deadline) = level_deadline {
                    if tokio::time::Instant::now() >= deadline {
                        tracing::error!(level, timeout_secs = self.config.timeouts.level_secs, "level exceeded its timeout, halting run");
                        self.registry.set_level_status(level, LevelStatus::Failed).await?;
                        return Ok(RunOutcome::Halted {
                            level,
                            reason: format!("level exceeded its {}s timeout", self.config.timeouts.level_secs),
                        });
                    }
                }

                let exited: Vec<(usize, ExitStatus)> = {
                    let mut found = Vec::new();
                    for (&worker_id, worker) in live.iter() {
                        if let Some(status) = self.launcher.is_alive(&worker.handle).await? {
                            found.push((worker_id, status));
                        }
                    }
                    found
                };

                for (worker_id, status) in exited {
                    self.handle_worker_exit(level, worker_id, status, live).await?;
                }

                let snapshot = self.registry.snapshot();
                if is_level_resolved(&snapshot, &task_ids) {
                    break;
                }
            }

            let snapshot = self.registry.snapshot();
            if !is_level_success(&snapshot, &task_ids) {
                self.registry.set_level_status(level, LevelStatus::Failed).await?;
                return Ok(RunOutcome::Halted {
                    level,
                    reason: "level resolved with one or more blocked tasks".to_string(),
                });
            }

            self.registry.set_level_status(level, LevelStatus::Merging).await?;
            match self.merge_with_timeout(level, &active).await {
                Ok(outcome) => {
                    self.registry.set_level_merge_ref(level, outcome.merge_ref).await?;
                    self.registry.set_level_status(level, LevelStatus::Complete).await?;
                }
                Err(e) => {
                    tracing::error!(level, error = %e, "merge failed, halting run");
                    self.registry.set_level_status(level, LevelStatus::Failed).await?;
                    return Ok(RunOutcome::Halted { level, reason: e.to_string() });
                }
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Run `merge_level`, bounded by `timeouts.merge_secs` (`0` means
    /// unbounded).
    async fn merge_with_timeout(
        &self,
        level: u32,
        active: &[usize],
    ) -> OrchestratorResult<MergeOutcome> {
        let merge_secs = self.config.timeouts.merge_secs;
        if merge_secs == 0 {
            return self.merge.merge_level(level, active).await;
        }
        match tokio::time::timeout(Duration::from_secs(merge_secs), self.merge.merge_level(level, active)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::MergeTimeout { level, timeout_secs: merge_secs }),
        }
    }

    async fn spawn_worker(&self, worker_id: usize, base_ref: &str) -> OrchestratorResult<LiveWorker> {
        let workspace = self.workspace_manager.create(&self.feature, &worker_id.to_string(), base_ref)?;
        let env = self.build_launch_env(worker_id, &workspace);
        let handle = self.launcher.spawn(&env).await?;
        let grace = Duration::from_secs(self.config.timeouts.worker_ready_secs);
        self.launcher.wait_ready(&handle, grace).await?;
        Ok(LiveWorker { handle, workspace })
    }

    fn build_launch_env(&self, worker_id: usize, workspace: &Workspace) -> LaunchEnv {
        LaunchEnv {
            worker_id: worker_id.to_string(),
            feature: self.feature.clone(),
            branch: workspace.branch.clone(),
            workspace_path: workspace.path.clone(),
            registry_path: self.config.paths.registry_dir.clone(),
            task_list_id: format!("{}-tasks", self.feature),
            extra_env: vec![
                ("WORKER_COUNT".to_string(), self.plan.worker_count.to_string()),
                ("MAX_RETRIES".to_string(), self.config.run.max_retries.to_string()),
                (
                    "CHECKPOINT_THRESHOLD_PCT".to_string(),
                    self.config.run.checkpoint_threshold_pct.to_string(),
                ),
                ("CHECKPOINT_TASK_BUDGET".to_string(), "10".to_string()),
            ],
        }
    }

    /// Classify one worker's exit and either retire or respawn it.
    async fn handle_worker_exit(
        &mut self,
        level: u32,
        worker_id: usize,
        status: ExitStatus,
        live: &mut HashMap<usize, LiveWorker>,
    ) -> OrchestratorResult<()> {
        let Some(worker) = live.remove(&worker_id) else {
            return Ok(());
        };
        let _ = self.launcher.cleanup(&worker.handle).await;
        let worker_key = worker_id.to_string();

        match status {
            ExitStatus::Exited(0) => {
                tracing::info!(worker_id, level, "worker ran out of levels to process, exiting clean");
                self.registry.set_worker(&worker_key, WorkerStatus::Stopped { exit_code: 0 }).await?;
            }
            ExitStatus::Exited(3) => {
                tracing::warn!(worker_id, level, "worker exited with all remaining tasks blocked");
                self.registry.set_worker(&worker_key, WorkerStatus::Stopped { exit_code: 3 }).await?;
            }
            ExitStatus::Exited(2) => {
                tracing::info!(worker_id, level, "worker checkpointed under context pressure, respawning");
                self.registry.reclaim_checkpointed(&worker_key).await?;
                let respawned = self.spawn_worker(worker_id, &worker.workspace.branch).await?;
                live.insert(worker_id, respawned);
            }
            other => {
                tracing::error!(worker_id, level, exit = ?other, "worker crashed, reclaiming its tasks");
                self.registry
                    .set_worker(&worker_key, WorkerStatus::Crashed { reason: format!("{other:?}") })
                    .await?;
                let snapshot = self.registry.snapshot();
                for task_id in tasks_owned_by(&snapshot, &worker_key) {
                    self.registry.record_failure(&task_id, &worker_key, "worker crashed").await?;
                }
                let respawned = self.spawn_worker(worker_id, &worker.workspace.branch).await?;
                live.insert(worker_id, respawned);
            }
        }

        Ok(())
    }

    /// Stage 3: teardown. Every worker has already been stopped by `run`;
    /// this just optionally destroys workspaces and releases the feature
    /// lock (implicitly, via `self`'s own drop).
    async fn teardown(&self, outcome: RunOutcome) -> RunOutcome {
        if self.config.run.cleanup_workspaces {
            for workspace in &self.created_workspaces {
                if let Err(e) = self.workspace_manager.destroy(workspace, false) {
                    tracing::warn!(worker_id = %workspace.worker_id, error = %e, "failed to destroy workspace");
                }
            }
        }
        tracing::info!(feature = %self.feature, ?outcome, "orchestrator teardown complete");
        outcome
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}

fn tasks_owned_by(doc: &RegistryDocument, worker_id: &str) -> Vec<String> {
    doc.tasks
        .iter()
        .filter(|(_, status)| status.owner() == Some(worker_id) && status.is_recoverable_in_progress())
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskwave_registry::TaskStatus;

    #[test]
    fn tasks_owned_by_filters_recoverable_statuses() {
        let mut doc = RegistryDocument::new("demo");
        doc.tasks.insert(
            "t1".to_string(),
            TaskStatus::InProgress { worker_id: "0".to_string(), started_at: Utc::now() },
        );
        doc.tasks.insert(
            "t2".to_string(),
            TaskStatus::Completed {
                worker_id: "0".to_string(),
                completed_at: Utc::now(),
                commit_ref: "x".to_string(),
            },
        );
        doc.tasks.insert("t3".to_string(), TaskStatus::Pending);

        let owned = tasks_owned_by(&doc, "0");
        assert_eq!(owned, vec!["t1".to_string()]);
    }
}
