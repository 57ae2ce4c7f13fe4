//! Workspace Manager.
//!
//! Each worker gets a dedicated git worktree bound to its own branch. The
//! manager is idempotent: re-creating a workspace that already exists just
//! returns its handle, and destroying one that's already gone is a no-op.

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Repository, WorktreeAddOptions};

use crate::error::VcsResult;

#[derive(Debug, Clone)]
pub struct Workspace {
    pub worker_id: String,
    pub branch: String,
    pub path: PathBuf,
}

pub struct WorkspaceManager {
    repo: Repository,
    workspace_root: PathBuf,
    branch_prefix: String,
}

impl WorkspaceManager {
    pub fn new(repo_path: impl AsRef<Path>, workspace_root: impl Into<PathBuf>, branch_prefix: impl Into<String>) -> VcsResult<Self> {
        let repo = Repository::open(repo_path)?;
        Ok(Self {
            repo,
            workspace_root: workspace_root.into(),
            branch_prefix: branch_prefix.into(),
        })
    }

    fn branch_name(&self, feature: &str, worker_id: &str) -> String {
        format!("{}/{}/worker-{}", self.branch_prefix, feature, worker_id)
    }

    fn worktree_name(&self, feature: &str, worker_id: &str) -> String {
        format!("{feature}-worker-{worker_id}")
    }

    /// Create (or recreate) the workspace for `worker_id`, branched from
    /// `base_ref`.
    pub fn create(&self, feature: &str, worker_id: &str, base_ref: &str) -> VcsResult<Workspace> {
        let branch = self.branch_name(feature, worker_id);
        let path = self.workspace_root.join(self.worktree_name(feature, worker_id));

        if path.exists() && self.repo.find_worktree(&self.worktree_name(feature, worker_id)).is_err() {
            // Stale directory from a prior run with no matching worktree metadata.
            fs::remove_dir_all(&path)?;
        }

        if self.repo.find_worktree(&self.worktree_name(feature, worker_id)).is_err() {
            if self.repo.find_branch(&branch, git2::BranchType::Local).is_err() {
                let base_commit = self.repo.revparse_single(base_ref)?.peel_to_commit()?;
                self.repo.branch(&branch, &base_commit, false)?;
            }
            let branch_ref = self.repo.find_branch(&branch, git2::BranchType::Local)?;
            let reference = branch_ref.into_reference();
            let mut opts = WorktreeAddOptions::new();
            opts.reference(Some(&reference));
            self.repo
                .worktree(&self.worktree_name(feature, worker_id), &path, Some(&opts))?;
            tracing::info!(%branch, path = %path.display(), "created workspace");
        }

        Ok(Workspace {
            worker_id: worker_id.to_string(),
            branch,
            path,
        })
    }

    /// Forcibly remove the worktree directory and prune its git metadata.
    pub fn destroy(&self, workspace: &Workspace, delete_branch: bool) -> VcsResult<()> {
        if workspace.path.exists() {
            fs::remove_dir_all(&workspace.path)?;
        }
        if let Ok(name) = self.worktree_name_from_path(&workspace.path) {
            if let Ok(wt) = self.repo.find_worktree(&name) {
                let _ = wt.prune(None);
            }
        }
        if delete_branch {
            if let Ok(mut branch) = self.repo.find_branch(&workspace.branch, git2::BranchType::Local) {
                let _ = branch.delete();
            }
        }
        Ok(())
    }

    fn worktree_name_from_path(&self, path: &Path) -> VcsResult<String> {
        Ok(path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Currently-bound workspace directories, as reported by git worktree
    /// metadata.
    pub fn list_active(&self) -> VcsResult<Vec<PathBuf>> {
        let names = self.repo.worktrees()?;
        let mut paths = Vec::new();
        for name in names.iter().flatten() {
            if let Ok(wt) = self.repo.find_worktree(name) {
                paths.push(wt.path().to_path_buf());
            }
        }
        Ok(paths)
    }

    /// Reconstruct every [`Workspace`] handle belonging to `feature`, by
    /// matching worktree names against this manager's own naming
    /// convention (`<feature>-worker-<id>`). Used by the `cleanup`
    /// control-surface command, which only has a feature name to work
    /// from — not the live worker ids a running orchestrator holds.
    pub fn list_for_feature(&self, feature: &str) -> VcsResult<Vec<Workspace>> {
        let prefix = format!("{feature}-worker-");
        let names = self.repo.worktrees()?;
        let mut workspaces = Vec::new();
        for name in names.iter().flatten() {
            let Some(worker_id) = name.strip_prefix(&prefix) else {
                continue;
            };
            if let Ok(wt) = self.repo.find_worktree(name) {
                workspaces.push(Workspace {
                    worker_id: worker_id.to_string(),
                    branch: self.branch_name(feature, worker_id),
                    path: wt.path().to_path_buf(),
                });
            }
        }
        workspaces.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(workspaces)
    }
}
