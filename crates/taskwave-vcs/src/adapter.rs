//! Version-Control Adapter.
//!
//! Wraps `git2` with the structured operations the Worker Protocol and
//! Merge Coordinator need: branch create/delete, checkout, commit, merge
//! with explicit conflict reporting, rebase, and snapshot tag/restore. The
//! *sequencing* of these calls (checkout base, pull/fetch, branch, stage,
//! commit, push) follows the same order a worker's own commit flow uses,
//! just expressed as direct library calls instead of shelling out to `git`.

use std::path::Path;

use git2::{build::CheckoutBuilder, AnnotatedCommit, MergeOptions, Repository, Signature};

use crate::error::{VcsError, VcsResult};

pub struct VcsAdapter {
    repo: Repository,
}

impl VcsAdapter {
    pub fn open(path: impl AsRef<Path>) -> VcsResult<Self> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    pub fn current_branch(&self) -> VcsResult<String> {
        let head = self.repo.head()?;
        Ok(head
            .shorthand()
            .unwrap_or("HEAD")
            .to_string())
    }

    /// Create `name` from `base` if it does not already exist, and check it
    /// out. Idempotent: calling this twice for the same `(name, base)` is a
    /// no-op the second time.
    pub fn create_branch(&self, name: &str, base: &str) -> VcsResult<()> {
        if self.repo.find_branch(name, git2::BranchType::Local).is_err() {
            let base_commit = self.resolve_commit(base)?;
            self.repo.branch(name, &base_commit, false)?;
            tracing::info!(branch = name, base, "created branch");
        }
        self.checkout(name)?;
        Ok(())
    }

    pub fn delete_branch(&self, name: &str) -> VcsResult<()> {
        let mut branch = self
            .repo
            .find_branch(name, git2::BranchType::Local)
            .map_err(|_| VcsError::BranchNotFound(name.to_string()))?;
        branch.delete()?;
        Ok(())
    }

    pub fn checkout(&self, refname: &str) -> VcsResult<()> {
        let commit = self.resolve_commit(refname)?;
        let mut builder = CheckoutBuilder::new();
        builder.force();
        self.repo.checkout_tree(commit.as_object(), Some(&mut builder))?;
        let full_ref = self
            .repo
            .find_branch(refname, git2::BranchType::Local)
            .ok()
            .and_then(|b| b.get().name().map(|s| s.to_string()))
            .unwrap_or_else(|| refname.to_string());
        self.repo.set_head(&full_ref)?;
        Ok(())
    }

    /// Stage `files` (or everything, if `files` is empty) and commit.
    /// Returns the new commit's hex id.
    pub fn commit(&self, files: &[String], message: &str, author: &str) -> VcsResult<String> {
        let mut index = self.repo.index()?;
        if files.is_empty() {
            index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        } else {
            for f in files {
                index.add_path(Path::new(f))?;
            }
        }
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = Signature::now(author, &format!("{author}@taskwave.local"))?;
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        tracing::info!(commit = %commit_id, message, "committed");
        Ok(commit_id.to_string())
    }

    /// Merge `source` into `into`, checking out `into` first. On conflict,
    /// the merge is aborted (the working tree is left clean on `into`) and
    /// [`VcsError::MergeConflict`] names the conflicting paths.
    pub fn merge(&self, source: &str, into: &str) -> VcsResult<String> {
        self.checkout(into)?;
        let source_commit = self.resolve_commit(source)?;
        let annotated: AnnotatedCommit = self.repo.find_annotated_commit(source_commit.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(self.repo.head()?.peel_to_commit()?.id().to_string());
        }
        if analysis.is_fast_forward() {
            let mut reference = self.repo.head()?;
            reference.set_target(source_commit.id(), "fast-forward merge")?;
            self.checkout(into)?;
            return Ok(source_commit.id().to_string());
        }

        let mut opts = MergeOptions::new();
        self.repo
            .merge(&[&annotated], Some(&mut opts), Some(&mut CheckoutBuilder::new()))?;

        let index = self.repo.index()?;
        if index.has_conflicts() {
            let files: Vec<String> = index
                .conflicts()?
                .filter_map(|c| c.ok())
                .filter_map(|c| c.our.or(c.their))
                .filter_map(|e| String::from_utf8(e.path).ok())
                .collect();
            self.repo.cleanup_state()?;
            let mut reset_builder = CheckoutBuilder::new();
            reset_builder.force();
            self.repo.checkout_head(Some(&mut reset_builder))?;
            return Err(VcsError::MergeConflict { files });
        }

        let tree_id = self.repo.index()?.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = Signature::now("taskwave", "taskwave@taskwave.local")?;
        let head_commit = self.repo.head()?.peel_to_commit()?;
        let commit_id = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &format!("Merge {source} into {into}"),
            &tree,
            &[&head_commit, &source_commit],
        )?;
        self.repo.cleanup_state()?;
        Ok(commit_id.to_string())
    }

    pub fn rebase_onto(&self, onto: &str) -> VcsResult<()> {
        let onto_commit = self.resolve_commit(onto)?;
        let onto_annotated = self.repo.find_annotated_commit(onto_commit.id())?;
        let mut rebase = self.repo.rebase(None, None, Some(&onto_annotated), None)?;
        let signature = Signature::now("taskwave", "taskwave@taskwave.local")?;
        while let Some(op) = rebase.next() {
            op?;
            if rebase.inmemory_index()?.has_conflicts() {
                let files: Vec<String> = rebase
                    .inmemory_index()?
                    .conflicts()?
                    .filter_map(|c| c.ok())
                    .filter_map(|c| c.our.or(c.their))
                    .filter_map(|e| String::from_utf8(e.path).ok())
                    .collect();
                rebase.abort()?;
                return Err(VcsError::MergeConflict { files });
            }
            rebase.commit(None, &signature, None)?;
        }
        rebase.finish(Some(&signature))?;
        Ok(())
    }

    pub fn has_conflicts(&self) -> VcsResult<bool> {
        Ok(self.repo.index()?.has_conflicts())
    }

    /// Tag the current `HEAD` with `name`, returning the tag's target ref.
    pub fn snapshot_tag(&self, name: &str) -> VcsResult<String> {
        let head = self.repo.head()?.peel_to_commit()?;
        let signature = Signature::now("taskwave", "taskwave@taskwave.local")?;
        let oid = self
            .repo
            .tag(name, head.as_object(), &signature, name, false)?;
        Ok(oid.to_string())
    }

    pub fn restore(&self, snapshot_ref: &str) -> VcsResult<()> {
        let commit = self.resolve_commit(snapshot_ref)?;
        let mut builder = CheckoutBuilder::new();
        builder.force();
        self.repo.reset(commit.as_object(), git2::ResetType::Hard, Some(&mut builder))?;
        Ok(())
    }

    fn resolve_commit(&self, refname: &str) -> VcsResult<git2::Commit<'_>> {
        let obj = self.repo.revparse_single(refname)?;
        Ok(obj.peel_to_commit()?)
    }
}

