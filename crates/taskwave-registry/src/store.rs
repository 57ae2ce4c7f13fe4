//! The file-backed Task Registry.
//!
//! The registry document lives at `<dir>/<feature>.json`. Every mutation:
//!
//! 1. acquires an exclusive [`fs2`] lock on `<feature>.json.lock` (the only
//!    point of mutual exclusion between processes — there is no database,
//!    per the design note that a single file under an OS advisory lock is
//!    enough for one writer at a time),
//! 2. reads the current document (falling back to `.bak` if the primary is
//!    corrupt),
//! 3. applies the closure,
//! 4. copies the current primary to `.bak`, writes the new document to
//!    `.tmp`, and renames `.tmp` over the primary.
//!
//! All of this runs inside [`tokio::task::spawn_blocking`], mirroring the
//! async-wrapped-blocking-IO pattern used for this crate's closest relative
//! in spirit.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use fs2::FileExt;

use crate::error::{RegistryError, RegistryResult};
use crate::types::{
    Event, LevelState, LevelStatus, RegistryDocument, TaskStatus, WorkerStatus, DEFAULT_MAX_RETRIES,
};

/// Handle to a feature's on-disk registry, plus an in-memory snapshot cache
/// kept current after every successful mutation so readers that only need
/// an approximate view (e.g. a status dashboard) don't have to go through
/// the lock.
#[derive(Clone)]
pub struct Registry {
    primary: PathBuf,
    backup: PathBuf,
    tmp: PathBuf,
    lock: PathBuf,
    stop: PathBuf,
    max_retries: u32,
    cache: Arc<DashMap<(), RegistryDocument>>,
}

const CACHE_KEY: () = ();

impl Registry {
    /// Open (or create) the registry for `feature` under `dir`.
    pub async fn open(dir: impl AsRef<Path>, feature: &str) -> RegistryResult<Self> {
        Self::open_with_retries(dir, feature, DEFAULT_MAX_RETRIES).await
    }

    pub async fn open_with_retries(
        dir: impl AsRef<Path>,
        feature: &str,
        max_retries: u32,
    ) -> RegistryResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let dir_for_create = dir.clone();
        tokio::task::spawn_blocking(move || fs::create_dir_all(&dir_for_create)).await??;
        let reg = Self::paths_for(&dir, feature, max_retries);
        let doc = reg.load_or_init(feature)?;
        reg.cache.insert(CACHE_KEY, doc);
        Ok(reg)
    }

    fn paths_for(dir: &Path, feature: &str, max_retries: u32) -> Self {
        let primary = dir.join(format!("{feature}.json"));
        let backup = dir.join(format!("{feature}.json.bak"));
        let tmp = dir.join(format!("{feature}.json.tmp"));
        let lock = dir.join(format!("{feature}.json.lock"));
        let stop = dir.join(format!("{feature}.stop"));
        Self {
            primary,
            backup,
            tmp,
            lock,
            stop,
            max_retries,
            cache: Arc::new(DashMap::new()),
        }
    }

    fn load_or_init(&self, feature: &str) -> RegistryResult<RegistryDocument> {
        if !self.primary.exists() {
            return Ok(RegistryDocument::new(feature));
        }
        match read_json(&self.primary) {
            Ok(doc) => Ok(doc),
            Err(primary_err) => {
                tracing::warn!(error = %primary_err, "primary registry document unreadable, trying backup");
                match read_json(&self.backup) {
                    Ok(doc) => Ok(doc),
                    Err(backup_err) => Err(RegistryError::RegistryCorruption {
                        reason: format!("primary: {primary_err}; backup: {backup_err}"),
                    }),
                }
            }
        }
    }

    /// Current snapshot, from the in-memory cache (no lock taken).
    pub fn snapshot(&self) -> RegistryDocument {
        self.cache
            .get(&CACHE_KEY)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Run `f` against a freshly-locked, freshly-read document; persist the
    /// result atomically and refresh the cache.
    async fn mutate<T, F>(&self, f: F) -> RegistryResult<T>
    where
        F: FnOnce(&mut RegistryDocument) -> RegistryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let primary = self.primary.clone();
        let backup = self.backup.clone();
        let tmp = self.tmp.clone();
        let lock_path = self.lock.clone();

        let (doc, result) = tokio::task::spawn_blocking(move || -> RegistryResult<(RegistryDocument, T)> {
            let lock_file = File::create(&lock_path)?;
            lock_file.lock_exclusive()?;
            let _guard = scopeguard(&lock_file);

            let mut doc = match read_json(&primary) {
                Ok(doc) => doc,
                Err(_) if !primary.exists() => RegistryDocument::default(),
                Err(_) => match read_json(&backup) {
                    Ok(doc) => doc,
                    Err(e) => {
                        return Err(RegistryError::RegistryCorruption {
                            reason: e.to_string(),
                        })
                    }
                },
            };

            let result = f(&mut doc)?;
            write_atomic(&primary, &backup, &tmp, &doc)?;
            Ok((doc, result))
        })
        .await??;

        self.cache.insert(CACHE_KEY, doc);
        Ok(result)
    }

    /// Seed the registry with every task from a validated graph, all
    /// `Pending`, plus one `LevelState::Pending` per level. No-op for tasks
    /// already present (idempotent across restarts).
    pub async fn seed_from_levels(&self, levels: &[(u32, Vec<String>)]) -> RegistryResult<()> {
        let levels = levels.to_vec();
        self.mutate(move |doc| {
            for (level, task_ids) in &levels {
                doc.levels.entry(*level).or_insert_with(LevelState::default);
                for task_id in task_ids {
                    doc.tasks.entry(task_id.clone()).or_insert(TaskStatus::Pending);
                }
            }
            Ok(())
        })
        .await
    }

    /// Atomically claim `task_id` for `worker_id`. Succeeds (`true`) only
    /// if the task is currently `Pending` and every prerequisite is
    /// `Completed`.
    pub async fn claim(
        &self,
        task_id: &str,
        worker_id: &str,
        prerequisites: &[String],
    ) -> RegistryResult<bool> {
        let task_id = task_id.to_string();
        let worker_id = worker_id.to_string();
        let prerequisites = prerequisites.to_vec();
        self.mutate(move |doc| {
            let all_deps_done = prerequisites
                .iter()
                .all(|p| doc.tasks.get(p).map(TaskStatus::is_success).unwrap_or(false));
            let is_pending = matches!(doc.tasks.get(&task_id), Some(TaskStatus::Pending) | None);
            if !is_pending || !all_deps_done {
                return Ok(false);
            }
            doc.tasks.insert(
                task_id.clone(),
                TaskStatus::Claimed {
                    worker_id: worker_id.clone(),
                    claimed_at: Utc::now(),
                },
            );
            doc.events.push(Event::new(
                "claim",
                format!("{worker_id} claimed {task_id}"),
            ));
            Ok(true)
        })
        .await
    }

    /// Update a task's status. Succeeds only if `caller` owns the task's
    /// current status, or `caller` is `None` (the orchestrator acting with
    /// authority).
    pub async fn update_task(
        &self,
        task_id: &str,
        caller: Option<&str>,
        new_status: TaskStatus,
    ) -> RegistryResult<()> {
        let task_id = task_id.to_string();
        let caller = caller.map(|s| s.to_string());
        self.mutate(move |doc| {
            let current = doc
                .tasks
                .get(&task_id)
                .ok_or_else(|| RegistryError::TaskNotFound(task_id.clone()))?;
            if let Some(caller) = &caller {
                let owner = current.owner();
                if owner != Some(caller.as_str()) {
                    return Err(RegistryError::OwnershipViolation {
                        task_id: task_id.clone(),
                        worker_id: caller.clone(),
                        owner: owner.map(|s| s.to_string()),
                    });
                }
            }
            doc.events.push(Event::new(
                "status_change",
                format!("{task_id}: {current:?} -> {new_status:?}"),
            ));
            doc.tasks.insert(task_id.clone(), new_status);
            Ok(())
        })
        .await
    }

    /// Record a verification failure or crash against `task_id`, bumping
    /// its retry counter and transitioning to `Pending` (if budget
    /// remains) or `Blocked` otherwise. Returns the resulting status.
    pub async fn record_failure(
        &self,
        task_id: &str,
        worker_id: &str,
        error: impl Into<String>,
    ) -> RegistryResult<TaskStatus> {
        let task_id = task_id.to_string();
        let worker_id = worker_id.to_string();
        let error = error.into();
        let max_retries = self.max_retries;
        self.mutate(move |doc| {
            let prior_retries = match doc.tasks.get(&task_id) {
                Some(TaskStatus::Failed { retry_count, .. }) => *retry_count,
                Some(TaskStatus::Blocked { retry_count, .. }) => *retry_count,
                _ => 0,
            };
            let retry_count = prior_retries + 1;
            let next = if retry_count < max_retries {
                TaskStatus::Pending
            } else {
                TaskStatus::Blocked {
                    error: error.clone(),
                    retry_count,
                }
            };
            doc.events.push(Event::new(
                "failure",
                format!("{task_id} failed for {worker_id} (retry {retry_count}): {error}"),
            ));
            doc.tasks.insert(task_id.clone(), next.clone());
            Ok(next)
        })
        .await
    }

    /// Set a worker's status.
    pub async fn set_worker(&self, worker_id: &str, status: WorkerStatus) -> RegistryResult<()> {
        let worker_id = worker_id.to_string();
        self.mutate(move |doc| {
            doc.events.push(Event::new(
                "worker_status",
                format!("{worker_id}: {status:?}"),
            ));
            doc.workers.insert(worker_id, status);
            Ok(())
        })
        .await
    }

    /// Set a level's status, stamping `started_at`/`completed_at` as
    /// appropriate.
    pub async fn set_level_status(&self, level: u32, status: LevelStatus) -> RegistryResult<()> {
        self.mutate(move |doc| {
            let entry = doc.levels.entry(level).or_insert_with(LevelState::default);
            entry.status = status;
            match status {
                LevelStatus::Running if entry.started_at.is_none() => {
                    entry.started_at = Some(Utc::now());
                }
                LevelStatus::Complete | LevelStatus::Failed => {
                    entry.completed_at = Some(Utc::now());
                }
                _ => {}
            }
            doc.events.push(Event::new(
                "level_status",
                format!("level {level}: {status:?}"),
            ));
            Ok(())
        })
        .await
    }

    /// Record the merge ref produced for a now-`Complete` level.
    pub async fn set_level_merge_ref(&self, level: u32, merge_ref: impl Into<String>) -> RegistryResult<()> {
        let merge_ref = merge_ref.into();
        self.mutate(move |doc| {
            let entry = doc.levels.entry(level).or_insert_with(LevelState::default);
            entry.merge_ref = Some(merge_ref);
            Ok(())
        })
        .await
    }

    /// Reset `task_id` to `Pending`, clearing any retry/error state. Used by
    /// the `retry` control-surface command.
    pub async fn reset_task(&self, task_id: &str) -> RegistryResult<()> {
        let task_id = task_id.to_string();
        self.mutate(move |doc| {
            match doc.tasks.get(&task_id) {
                Some(TaskStatus::Blocked { .. }) | Some(TaskStatus::Failed { .. }) => {}
                Some(other) => {
                    return Err(RegistryError::InvalidTransition {
                        task_id: task_id.clone(),
                        reason: format!("cannot reset task in state {other:?}"),
                    })
                }
                None => return Err(RegistryError::TaskNotFound(task_id.clone())),
            }
            doc.events.push(Event::new("reset", task_id.clone()));
            doc.tasks.insert(task_id.clone(), TaskStatus::Pending);
            Ok(())
        })
        .await
    }

    /// Move every `Checkpointed` task owned by `worker_id` back to
    /// `Pending`, returning the task ids affected. Called by the
    /// orchestrator after a worker exits with a checkpoint code (2) and a
    /// replacement worker is about to be spawned for the same level.
    pub async fn reclaim_checkpointed(&self, worker_id: &str) -> RegistryResult<Vec<String>> {
        let worker_id = worker_id.to_string();
        self.mutate(move |doc| {
            let ids: Vec<String> = doc
                .tasks
                .iter()
                .filter(|(_, status)| {
                    matches!(status, TaskStatus::Checkpointed { worker_id: owner, .. } if owner == &worker_id)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                doc.events.push(Event::new("reclaim", format!("{id} reclaimed from checkpointed {worker_id}")));
                doc.tasks.insert(id.clone(), TaskStatus::Pending);
            }
            Ok(ids)
        })
        .await
    }

    /// Tasks left in a recoverable in-progress status — candidates for
    /// reassignment after a worker crash or a controller restart.
    pub fn list_recoverable(&self) -> Vec<String> {
        self.snapshot()
            .tasks
            .iter()
            .filter(|(_, status)| status.is_recoverable_in_progress())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Request that a running orchestrator stop at the next tick. A plain
    /// sentinel file alongside the registry document, not a field inside
    /// it — cooperative cancellation is cross-process and doesn't need
    /// CAS. The file's content records whether the stop is `force` (kill
    /// workers immediately) or graceful (give them one grace period to
    /// checkpoint).
    pub fn request_stop(&self, force: bool) -> RegistryResult<()> {
        let content: &[u8] = if force { b"force" } else { b"graceful" };
        std::fs::write(&self.stop, content)?;
        Ok(())
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.exists()
    }

    /// Whether the pending stop request was made with `--force`. Only
    /// meaningful when [`Self::stop_requested`] is `true`.
    pub fn stop_is_forced(&self) -> bool {
        std::fs::read(&self.stop).map(|content| content == b"force").unwrap_or(false)
    }

    /// Clear a stop request. Called at the start of a fresh `rush` so a
    /// stale sentinel from a prior cancelled run doesn't immediately halt
    /// the new one.
    pub fn clear_stop(&self) -> RegistryResult<()> {
        if self.stop.exists() {
            fs::remove_file(&self.stop)?;
        }
        Ok(())
    }
}

fn read_json(path: &Path) -> RegistryResult<RegistryDocument> {
    let mut file = File::open(path)?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(serde_json::from_str(&buf)?)
}

fn write_atomic(
    primary: &Path,
    backup: &Path,
    tmp: &Path,
    doc: &RegistryDocument,
) -> RegistryResult<()> {
    if primary.exists() {
        fs::copy(primary, backup)?;
    }
    let mut tmp_file = File::create(tmp)?;
    let bytes = serde_json::to_vec_pretty(doc)?;
    tmp_file.write_all(&bytes)?;
    tmp_file.sync_all()?;
    fs::rename(tmp, primary)?;
    Ok(())
}

/// Releases the advisory lock when dropped, even on an early return via `?`.
struct LockGuard<'a>(&'a File);

fn scopeguard(file: &File) -> LockGuard<'_> {
    LockGuard(file)
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.0);
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn check<T: Send + Sync>() {}
    check::<Registry>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkerStatus;
    use tempfile::tempdir;

    async fn registry() -> (tempfile::TempDir, Registry) {
        let dir = tempdir().unwrap();
        let reg = Registry::open(dir.path(), "demo").await.unwrap();
        (dir, reg)
    }

    #[tokio::test]
    async fn seed_then_claim_then_complete() {
        let (_dir, reg) = registry().await;
        reg.seed_from_levels(&[(1, vec!["t1".to_string()])]).await.unwrap();

        assert!(reg.claim("t1", "w0", &[]).await.unwrap());
        // Already claimed: a second claim attempt fails.
        assert!(!reg.claim("t1", "w1", &[]).await.unwrap());

        reg.update_task(
            "t1",
            Some("w0"),
            TaskStatus::InProgress {
                worker_id: "w0".to_string(),
                started_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        reg.update_task(
            "t1",
            Some("w0"),
            TaskStatus::Completed {
                worker_id: "w0".to_string(),
                completed_at: Utc::now(),
                commit_ref: "abc123".to_string(),
            },
        )
        .await
        .unwrap();

        let doc = reg.snapshot();
        assert!(matches!(doc.tasks.get("t1"), Some(TaskStatus::Completed { .. })));
    }

    #[tokio::test]
    async fn claim_requires_prerequisites_completed() {
        let (_dir, reg) = registry().await;
        reg.seed_from_levels(&[(1, vec!["t1".to_string()]), (2, vec!["t2".to_string()])])
            .await
            .unwrap();

        assert!(!reg.claim("t2", "w0", &["t1".to_string()]).await.unwrap());

        reg.claim("t1", "w0", &[]).await.unwrap();
        reg.update_task(
            "t1",
            Some("w0"),
            TaskStatus::Completed {
                worker_id: "w0".to_string(),
                completed_at: Utc::now(),
                commit_ref: "x".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(reg.claim("t2", "w1", &["t1".to_string()]).await.unwrap());
    }

    #[tokio::test]
    async fn update_task_rejects_non_owner() {
        let (_dir, reg) = registry().await;
        reg.seed_from_levels(&[(1, vec!["t1".to_string()])]).await.unwrap();
        reg.claim("t1", "w0", &[]).await.unwrap();

        let err = reg
            .update_task(
                "t1",
                Some("w1"),
                TaskStatus::InProgress {
                    worker_id: "w1".to_string(),
                    started_at: Utc::now(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::OwnershipViolation { .. }));
    }

    #[tokio::test]
    async fn record_failure_retries_then_blocks() {
        let dir = tempdir().unwrap();
        let reg = Registry::open_with_retries(dir.path(), "demo", 2).await.unwrap();
        reg.seed_from_levels(&[(1, vec!["t1".to_string()])]).await.unwrap();
        reg.claim("t1", "w0", &[]).await.unwrap();

        let status = reg.record_failure("t1", "w0", "boom").await.unwrap();
        assert!(matches!(status, TaskStatus::Pending));

        reg.claim("t1", "w0", &[]).await.unwrap();
        let status = reg.record_failure("t1", "w0", "boom again").await.unwrap();
        assert!(matches!(status, TaskStatus::Blocked { retry_count: 2, .. }));
    }

    #[tokio::test]
    async fn reclaim_checkpointed_returns_tasks_to_pending() {
        let (_dir, reg) = registry().await;
        reg.seed_from_levels(&[(1, vec!["t1".to_string(), "t2".to_string()])])
            .await
            .unwrap();
        reg.claim("t1", "w0", &[]).await.unwrap();
        reg.claim("t2", "w0", &[]).await.unwrap();

        reg.update_task(
            "t1",
            Some("w0"),
            TaskStatus::Checkpointed {
                worker_id: "w0".to_string(),
                reason: "context pressure".to_string(),
                context_pct: 75,
            },
        )
        .await
        .unwrap();

        let reclaimed = reg.reclaim_checkpointed("w0").await.unwrap();
        assert_eq!(reclaimed, vec!["t1".to_string()]);

        let doc = reg.snapshot();
        assert!(matches!(doc.tasks.get("t1"), Some(TaskStatus::Pending)));
        assert!(matches!(doc.tasks.get("t2"), Some(TaskStatus::Claimed { .. })));
    }

    #[tokio::test]
    async fn set_worker_and_level_status_round_trip() {
        let (_dir, reg) = registry().await;
        reg.set_worker("w0", WorkerStatus::Ready).await.unwrap();
        reg.set_level_status(1, LevelStatus::Running).await.unwrap();
        reg.set_level_merge_ref(1, "deadbeef").await.unwrap();

        let doc = reg.snapshot();
        assert_eq!(doc.workers.get("w0"), Some(&WorkerStatus::Ready));
        let level = doc.levels.get(&1).unwrap();
        assert_eq!(level.status, LevelStatus::Running);
        assert!(level.started_at.is_some());
        assert_eq!(level.merge_ref.as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn request_stop_records_force_mode() {
        let (_dir, reg) = registry().await;
        assert!(!reg.stop_requested());

        reg.request_stop(false).unwrap();
        assert!(reg.stop_requested());
        assert!(!reg.stop_is_forced());

        reg.request_stop(true).unwrap();
        assert!(reg.stop_requested());
        assert!(reg.stop_is_forced());

        reg.clear_stop().unwrap();
        assert!(!reg.stop_requested());
    }

    #[tokio::test]
    async fn corrupted_primary_falls_back_to_backup() {
        let dir = tempdir().unwrap();
        let reg = Registry::open(dir.path(), "demo").await.unwrap();
        reg.seed_from_levels(&[(1, vec!["t1".to_string()])]).await.unwrap();
        reg.claim("t1", "w0", &[]).await.unwrap();

        // Corrupt the primary; the backup written on the prior mutation
        // should still be a valid read.
        fs::write(dir.path().join("demo.json"), b"{ not json").unwrap();
        let reopened = Registry::open(dir.path(), "demo").await.unwrap();
        let doc = reopened.snapshot();
        assert!(doc.tasks.contains_key("t1"));
    }
}
