//! Core data types: [`Task`], [`Graph`], and [`Plan`].
//!
//! These mirror the document shape a task graph file is authored in, plus
//! the derived structures the parser and assignment calculator compute from
//! it. Instances are immutable once constructed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single verification command and its timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationSpec {
    pub command: String,
    pub timeout_secs: u64,
}

/// File ownership declared by a task: the paths it creates, modifies, or
/// merely reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FileTouches {
    #[serde(default)]
    pub create: Vec<String>,
    #[serde(default)]
    pub modify: Vec<String>,
    #[serde(default)]
    pub read: Vec<String>,
}

impl FileTouches {
    /// Paths this task exclusively owns at its level (`create ∪ modify`).
    pub fn owned_paths(&self) -> impl Iterator<Item = &str> {
        self.create.iter().chain(self.modify.iter()).map(|s| s.as_str())
    }
}

/// One node of the task graph, as authored in the input document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub level: u32,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub files: FileTouches,
    pub verification: VerificationSpec,
    #[serde(default)]
    pub estimated_duration_secs: Option<u64>,
}

/// The raw document shape a task graph file is parsed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    pub feature: String,
    pub version: u32,
    pub tasks: Vec<Task>,
}

/// A validated, immutable task graph.
///
/// Construction is only possible through [`crate::validate::validate`],
/// which guarantees every invariant documented on [`Task`] and
/// [`GraphDocument`] holds.
#[derive(Debug, Clone)]
pub struct Graph {
    pub feature: String,
    pub version: u32,
    tasks: Vec<Task>,
    levels: BTreeMap<u32, Vec<String>>,
}

impl Graph {
    pub(crate) fn new(feature: String, version: u32, tasks: Vec<Task>) -> Self {
        let mut levels: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for task in &tasks {
            levels.entry(task.level).or_default().push(task.id.clone());
        }
        for ids in levels.values_mut() {
            ids.sort();
        }
        Self {
            feature,
            version,
            tasks,
            levels,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Task identifiers at `level`, in deterministic (sorted) order.
    pub fn tasks_at_level(&self, level: u32) -> &[String] {
        self.levels.get(&level).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn max_level(&self) -> u32 {
        self.levels.keys().copied().max().unwrap_or(0)
    }

    pub fn max_parallelism_at_level(&self, level: u32) -> usize {
        self.tasks_at_level(level).len()
    }

    pub fn levels(&self) -> impl Iterator<Item = u32> + '_ {
        self.levels.keys().copied()
    }
}

/// Assignment of tasks to workers, one cell per `(worker, level)`.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Number of workers actually used (may be less than requested, capped
    /// to the graph's maximum per-level parallelism).
    pub worker_count: usize,
    /// `cells[(worker_id, level)] = ordered task ids`.
    cells: BTreeMap<(usize, u32), Vec<String>>,
}

impl Plan {
    pub(crate) fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            cells: BTreeMap::new(),
        }
    }

    pub(crate) fn assign(&mut self, worker_id: usize, level: u32, task_id: String) {
        self.cells.entry((worker_id, level)).or_default().push(task_id);
    }

    /// Tasks assigned to `worker_id` at `level`, in execution order.
    pub fn tasks_for(&self, worker_id: usize, level: u32) -> &[String] {
        self.cells
            .get(&(worker_id, level))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Worker ids that have at least one task at `level`.
    pub fn active_workers_at(&self, level: u32) -> Vec<usize> {
        let mut workers: Vec<usize> = self
            .cells
            .keys()
            .filter(|(_, l)| *l == level)
            .map(|(w, _)| *w)
            .collect();
        workers.sort_unstable();
        workers.dedup();
        workers
    }
}
