//! Implementations of the seven control-surface verbs. Each function
//! returns the process exit code it wants (`0` success, `1` run failure,
//! `2` configuration error); `main.rs` just calls `std::process::exit` on
//! whatever comes back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use taskwave_exec::Gate;
use taskwave_graph::{assign_workers, parse_and_validate};
use taskwave_orchestrator::{Orchestrator, RunOutcome};
use taskwave_registry::{LevelStatus, Registry, TaskStatus};
use taskwave_vcs::{VcsAdapter, WorkspaceManager};

use crate::helpers::{load_config, RUN_FAILURE, SUCCESS};

pub async fn rush(
    config_path: &Path,
    graph_path: PathBuf,
    feature: String,
    repo: PathBuf,
    worker_binary: PathBuf,
    workers: Option<usize>,
    mode: Option<String>,
) -> Result<i32> {
    let mut config = load_config(config_path)?;
    if let Some(w) = workers {
        config.run.workers = w;
    }
    if let Some(m) = mode {
        config.run.launcher_mode = m;
    }

    let pre_gates: Vec<Gate> = config.gates.pre_merge_gates();
    let post_gates: Vec<Gate> = config.gates.post_merge_gates();

    let mut orchestrator = Orchestrator::init(
        config,
        repo,
        &graph_path,
        feature.clone(),
        worker_binary,
        pre_gates,
        post_gates,
    )
    .await
    .with_context(|| format!("failed to initialize orchestrator for feature {feature}"))?;

    let outcome = orchestrator.run().await.context("orchestrator run failed")?;

    match outcome {
        RunOutcome::Completed => {
            println!("feature {feature}: all levels completed and promoted");
            Ok(SUCCESS)
        }
        RunOutcome::Halted { level, reason } => {
            eprintln!("feature {feature}: halted at level {level}: {reason}");
            eprintln!("run `taskwave status --feature {feature}` for details");
            Ok(RUN_FAILURE)
        }
        RunOutcome::Cancelled { level, force } => {
            let mode = if force { "forced" } else { "graceful" };
            eprintln!("feature {feature}: cancelled by {mode} stop request at level {level}");
            Ok(RUN_FAILURE)
        }
    }
}

pub async fn status(config_path: &Path, feature: String, json: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let registry = Registry::open(&config.paths.registry_dir, &feature)
        .await
        .context("failed to open registry")?;
    let doc = registry.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(SUCCESS);
    }

    println!("feature: {}", doc.feature);
    println!("levels:");
    for (level, state) in &doc.levels {
        println!("  L{level}: {:?}{}", state.status, merge_ref_suffix(&state.merge_ref));
    }
    println!("tasks:");
    for (task_id, status) in &doc.tasks {
        println!("  {task_id}: {}", describe_task_status(status));
    }
    println!("workers:");
    for (worker_id, status) in &doc.workers {
        println!("  {worker_id}: {status:?}");
    }

    Ok(SUCCESS)
}

fn merge_ref_suffix(merge_ref: &Option<String>) -> String {
    merge_ref
        .as_ref()
        .map(|r| format!(" (merge_ref={r})"))
        .unwrap_or_default()
}

fn describe_task_status(status: &TaskStatus) -> String {
    match status {
        TaskStatus::Pending => "Pending".to_string(),
        TaskStatus::Claimed { worker_id, claimed_at } => format!("Claimed by {worker_id} at {claimed_at}"),
        TaskStatus::InProgress { worker_id, started_at } => format!("InProgress on {worker_id} since {started_at}"),
        TaskStatus::Completed { worker_id, completed_at, commit_ref } => {
            format!("Completed by {worker_id} at {completed_at} ({commit_ref})")
        }
        TaskStatus::Failed { worker_id, error, retry_count } => {
            format!("Failed on {worker_id} (retry {retry_count}): {error}")
        }
        TaskStatus::Blocked { error, retry_count } => format!("Blocked (retry {retry_count}): {error}"),
        TaskStatus::Checkpointed { worker_id, reason, context_pct } => {
            format!("Checkpointed by {worker_id} at {context_pct}% ({reason})")
        }
    }
}

pub async fn logs(config_path: &Path, feature: String, level: Option<u32>, since: Option<String>) -> Result<i32> {
    let config = load_config(config_path)?;
    let registry = Registry::open(&config.paths.registry_dir, &feature)
        .await
        .context("failed to open registry")?;
    let doc = registry.snapshot();

    let since_ts: Option<DateTime<Utc>> = match since {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("invalid --since timestamp: {s}"))?,
        ),
        None => None,
    };

    for event in &doc.events {
        if let Some(ts) = since_ts {
            if event.at < ts {
                continue;
            }
        }
        if let Some(level) = level {
            if !event.detail.contains(&format!("level {level}")) && !event.detail.contains(&format!(" L{level}")) {
                continue;
            }
        }
        println!("{} [{}] {}", event.at.to_rfc3339(), event.kind, event.detail);
    }

    Ok(SUCCESS)
}

pub async fn stop(config_path: &Path, feature: String, force: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let registry = Registry::open(&config.paths.registry_dir, &feature)
        .await
        .context("failed to open registry")?;
    registry.request_stop(force)?;
    if force {
        println!("stop requested for feature {feature} (force: workers will be killed without a checkpoint grace period)");
    } else {
        println!("stop requested for feature {feature} (graceful: workers get one grace period to checkpoint)");
    }
    Ok(SUCCESS)
}

pub async fn retry(config_path: &Path, feature: String, task: Option<String>) -> Result<i32> {
    let config = load_config(config_path)?;
    let registry = Registry::open(&config.paths.registry_dir, &feature)
        .await
        .context("failed to open registry")?;

    let targets: Vec<String> = match task {
        Some(id) => vec![id],
        None => registry
            .snapshot()
            .tasks
            .iter()
            .filter(|(_, status)| matches!(status, TaskStatus::Blocked { .. }))
            .map(|(id, _)| id.clone())
            .collect(),
    };

    if targets.is_empty() {
        println!("no blocked tasks to retry for feature {feature}");
        return Ok(SUCCESS);
    }

    for task_id in &targets {
        registry
            .reset_task(task_id)
            .await
            .with_context(|| format!("failed to reset task {task_id}"))?;
        println!("reset {task_id} to Pending");
    }

    Ok(SUCCESS)
}

pub async fn merge(config_path: &Path, feature: String, level: u32, graph_path: PathBuf, repo: PathBuf) -> Result<i32> {
    let config = load_config(config_path)?;
    let graph_bytes = std::fs::read(&graph_path).with_context(|| format!("reading {}", graph_path.display()))?;
    let graph = parse_and_validate(&graph_bytes).context("graph failed validation")?;
    let plan = assign_workers(&graph, config.run.workers).context("failed to compute worker assignment")?;

    let registry = Registry::open(&config.paths.registry_dir, &feature)
        .await
        .context("failed to open registry")?;
    let task_ids = graph.tasks_at_level(level).to_vec();
    let snapshot = registry.snapshot();
    if !taskwave_registry::level::is_level_success(&snapshot, &task_ids) {
        eprintln!("level {level} has not resolved successfully; refusing to force a merge");
        return Ok(RUN_FAILURE);
    }

    let vcs = VcsAdapter::open(&repo)?;
    let starting_ref = vcs.current_branch()?;
    let coordinator = taskwave_orchestrator::MergeCoordinator::new(
        repo.clone(),
        config.paths.branch_prefix.clone(),
        feature.clone(),
        config.gates.pre_merge_gates(),
        config.gates.post_merge_gates(),
    );
    vcs.create_branch(&coordinator.baseline_branch(), &starting_ref)?;

    let active = plan.active_workers_at(level);
    match coordinator.merge_level(level, &active).await {
        Ok(outcome) => {
            registry.set_level_merge_ref(level, outcome.merge_ref.clone()).await?;
            registry.set_level_status(level, LevelStatus::Complete).await?;
            println!("level {level} merged, baseline now at {}", outcome.merge_ref);
            Ok(SUCCESS)
        }
        Err(e) => {
            registry.set_level_status(level, LevelStatus::Failed).await?;
            eprintln!("merge failed for level {level}: {e}");
            Ok(RUN_FAILURE)
        }
    }
}

pub async fn cleanup(config_path: &Path, feature: String, repo: PathBuf, delete_branches: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let manager = WorkspaceManager::new(&repo, &config.paths.workspace_root, config.paths.branch_prefix.clone())?;

    let workspaces = manager.list_for_feature(&feature)?;
    if workspaces.is_empty() {
        println!("no workspaces found for feature {feature}");
    }
    for workspace in &workspaces {
        manager
            .destroy(workspace, delete_branches)
            .with_context(|| format!("failed to destroy workspace for worker {}", workspace.worker_id))?;
        println!("destroyed workspace for worker {}", workspace.worker_id);
    }

    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn merge_ref_suffix_formats_present_and_absent() {
        assert_eq!(merge_ref_suffix(&None), "");
        assert_eq!(merge_ref_suffix(&Some("abc123".to_string())), " (merge_ref=abc123)");
    }

    #[test]
    fn describe_task_status_covers_every_variant() {
        assert_eq!(describe_task_status(&TaskStatus::Pending), "Pending");
        assert!(describe_task_status(&TaskStatus::Blocked {
            error: "boom".to_string(),
            retry_count: 3
        })
        .contains("boom"));
        assert!(describe_task_status(&TaskStatus::Completed {
            worker_id: "0".to_string(),
            completed_at: Utc::now(),
            commit_ref: "deadbeef".to_string(),
        })
        .contains("deadbeef"));
    }
}
