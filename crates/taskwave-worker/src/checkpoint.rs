//! Context-pressure checkpoint heuristic.
//!
//! The worker voluntarily exits rather than being killed mid-task once an
//! estimate of its remaining context budget crosses a configurable
//! threshold. The estimate itself is a pluggable [`ContextEstimator`] — the
//! default counts completed tasks against a fixed budget per level, a
//! coarse proxy that is cheap to compute and good enough to trigger a
//! checkpoint well before genuine exhaustion.

/// Tracks how much of a worker's estimated budget has been consumed.
pub trait ContextEstimator: Send + Sync {
    /// Current saturation estimate, 0-100.
    fn percent_used(&self) -> u8;

    fn record_task_completed(&mut self);
}

/// Counts completed tasks against a fixed ceiling.
pub struct TaskCountEstimator {
    completed: u32,
    budget: u32,
}

impl TaskCountEstimator {
    pub fn new(budget: u32) -> Self {
        Self { completed: 0, budget: budget.max(1) }
    }
}

impl ContextEstimator for TaskCountEstimator {
    fn percent_used(&self) -> u8 {
        let pct = (self.completed * 100) / self.budget;
        pct.min(100) as u8
    }

    fn record_task_completed(&mut self) {
        self.completed += 1;
    }
}

/// `true` once `percent_used` has crossed `threshold_pct`.
pub fn should_checkpoint(percent_used: u8, threshold_pct: u8) -> bool {
    percent_used >= threshold_pct
}

/// Metadata committed alongside a checkpointed task's work-in-progress.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata {
    pub percent_complete: u8,
    pub next_action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimator_climbs_with_completed_tasks() {
        let mut est = TaskCountEstimator::new(10);
        assert_eq!(est.percent_used(), 0);
        for _ in 0..7 {
            est.record_task_completed();
        }
        assert_eq!(est.percent_used(), 70);
    }

    #[test]
    fn checkpoint_triggers_at_threshold() {
        assert!(!should_checkpoint(69, 70));
        assert!(should_checkpoint(70, 70));
        assert!(should_checkpoint(95, 70));
    }

    #[test]
    fn estimator_never_exceeds_100() {
        let mut est = TaskCountEstimator::new(3);
        for _ in 0..10 {
            est.record_task_completed();
        }
        assert_eq!(est.percent_used(), 100);
    }
}
