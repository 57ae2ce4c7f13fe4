//! Merge Coordinator: snapshot the baseline, merge every worker's branch
//! into an ephemeral staging branch in deterministic order, run gates, and
//! fast-forward the baseline only once everything has passed.

use std::path::PathBuf;

use taskwave_exec::{run_gates, Gate};
use taskwave_vcs::VcsAdapter;

use crate::error::{OrchestratorError, OrchestratorResult};

/// One level's successful merge: the promoted baseline commit.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub merge_ref: String,
}

/// Drives the level-merge sequence against the orchestrator's own working
/// copy of the repository (distinct from any worker's workspace).
pub struct MergeCoordinator {
    repo_path: PathBuf,
    branch_prefix: String,
    feature: String,
    pre_merge_gates: Vec<Gate>,
    post_merge_gates: Vec<Gate>,
}

impl MergeCoordinator {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        branch_prefix: impl Into<String>,
        feature: impl Into<String>,
        pre_merge_gates: Vec<Gate>,
        post_merge_gates: Vec<Gate>,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            branch_prefix: branch_prefix.into(),
            feature: feature.into(),
            pre_merge_gates,
            post_merge_gates,
        }
    }

    pub fn baseline_branch(&self) -> String {
        format!("{}/{}/baseline", self.branch_prefix, self.feature)
    }

    fn staging_branch(&self, level: u32) -> String {
        format!("{}/{}/staging-L{level}", self.branch_prefix, self.feature)
    }

    fn worker_branch(&self, worker_id: usize) -> String {
        format!("{}/{}/worker-{worker_id}", self.branch_prefix, self.feature)
    }

    fn pre_tag(&self, level: u32) -> String {
        format!("{}-{}-snapshot-L{level}-pre", self.branch_prefix, self.feature)
    }

    fn post_tag(&self, level: u32) -> String {
        format!("{}-{}-snapshot-L{level}-post", self.branch_prefix, self.feature)
    }

    /// Merge a level whose tasks have all already been checked as
    /// `is_level_success`. Returns the promoted baseline commit
    /// id, or a structured [`OrchestratorError::MergeConflict`] /
    /// [`OrchestratorError::GateFailure`] on failure — in both cases the
    /// repository is left on an unpromoted baseline, never half-merged.
    pub async fn merge_level(&self, level: u32, worker_ids: &[usize]) -> OrchestratorResult<MergeOutcome> {
        let vcs = VcsAdapter::open(&self.repo_path)?;
        let baseline = self.baseline_branch();

        vcs.checkout(&baseline)?;
        vcs.snapshot_tag(&self.pre_tag(level))?;

        let staging = self.staging_branch(level);
        vcs.create_branch(&staging, &baseline)?;

        let mut ordered = worker_ids.to_vec();
        ordered.sort_unstable();
        for worker_id in ordered {
            let worker_branch = self.worker_branch(worker_id);
            if let Err(e) = vcs.merge(&worker_branch, &staging) {
                self.abort_to_pre(&vcs, level)?;
                return Err(self.classify_merge_error(level, e));
            }
        }

        let (results, ok) = run_gates(&self.pre_merge_gates, &self.repo_path).await;
        if !ok {
            self.abort_to_pre(&vcs, level)?;
            return Err(self.first_gate_failure(level, &results));
        }

        vcs.checkout(&baseline)?;
        let merge_ref = vcs.merge(&staging, &baseline)?;
        vcs.snapshot_tag(&self.post_tag(level))?;

        let (post_results, post_ok) = run_gates(&self.post_merge_gates, &self.repo_path).await;
        if !post_ok {
            vcs.restore(&self.pre_tag(level))?;
            return Err(self.first_gate_failure(level, &post_results));
        }

        Ok(MergeOutcome { merge_ref })
    }

    fn abort_to_pre(&self, vcs: &VcsAdapter, level: u32) -> OrchestratorResult<()> {
        vcs.restore(&self.pre_tag(level))?;
        Ok(())
    }

    fn classify_merge_error(&self, level: u32, err: taskwave_vcs::VcsError) -> OrchestratorError {
        match err {
            taskwave_vcs::VcsError::MergeConflict { files } => {
                OrchestratorError::MergeConflict { level, files }
            }
            other => OrchestratorError::Vcs(other),
        }
    }

    fn first_gate_failure(&self, level: u32, results: &[taskwave_exec::GateResult]) -> OrchestratorError {
        let gate = results
            .iter()
            .find(|r| !matches!(r.outcome, taskwave_exec::GateOutcome::Pass | taskwave_exec::GateOutcome::Skip))
            .map(|r| r.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        OrchestratorError::GateFailure { level, gate }
    }
}

pub fn branch_for_worker(prefix: &str, feature: &str, worker_id: usize) -> String {
    format!("{prefix}/{feature}/worker-{worker_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_naming_is_deterministic() {
        assert_eq!(branch_for_worker("taskwave", "demo", 2), "taskwave/demo/worker-2");
        let coord = MergeCoordinator::new("/repo", "taskwave", "demo", Vec::new(), Vec::new());
        assert_eq!(coord.baseline_branch(), "taskwave/demo/baseline");
        assert_eq!(coord.staging_branch(1), "taskwave/demo/staging-L1");
        assert_eq!(coord.pre_tag(1), "taskwave-demo-snapshot-L1-pre");
        assert_eq!(coord.post_tag(1), "taskwave-demo-snapshot-L1-post");
    }
}
