// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Working-copy manager (C2): allocates an isolated git checkout per task,
//! merges it back on success, and otherwise leaves it in place for
//! post-mortem inspection.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;

use crate::subprocess::{run_with_timeout, GIT_WORKTREE_TIMEOUT};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("git command failed: {0}")]
    Git(String),
    #[error("working copy already exists for branch {0}")]
    AlreadyExists(String),
    #[error("working copy has uncommitted changes, refusing merge")]
    DirtyWorkingCopy,
    #[error("merge conflict merging {branch} into {target}")]
    MergeConflict { branch: String, target: String },
}

/// Result of a successful [`WorkingCopyManager::merge`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub branch: String,
    pub merge_commit: String,
}

/// Allocates, merges, and preserves per-task git working copies (spec §4.2).
///
/// Workspaces live under `root` (typically `/tmp/<prefix>`) as
/// `<root>/<taskId>`, each a `git worktree` sharing history with
/// `canonical_repo`.
#[derive(Debug, Clone)]
pub struct WorkingCopyManager {
    root: PathBuf,
    canonical_repo: PathBuf,
}

impl WorkingCopyManager {
    pub fn new(root: PathBuf, canonical_repo: PathBuf) -> Self {
        Self {
            root,
            canonical_repo,
        }
    }

    fn workspace_path(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    /// Allocate(taskId, canonicalRepo) → workspacePath.
    ///
    /// Creates `task/{id}` off the canonical repo's current `HEAD` via
    /// `git worktree add`, which by construction leaves the canonical
    /// repo's currently checked-out branch untouched.
    pub async fn allocate(&self, task_id: &str) -> Result<PathBuf, WorkspaceError> {
        let branch = format!("task/{task_id}");
        let path = self.workspace_path(task_id);

        if path.exists() {
            return Err(WorkspaceError::AlreadyExists(branch));
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| WorkspaceError::Git(e.to_string()))?;

        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.canonical_repo)
            .args(["worktree", "add", "-b", &branch])
            .arg(&path)
            .arg("HEAD");
        let output = run_with_timeout(cmd, GIT_WORKTREE_TIMEOUT, "git worktree add")
            .await
            .map_err(WorkspaceError::Git)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("already exists") {
                return Err(WorkspaceError::AlreadyExists(branch));
            }
            return Err(WorkspaceError::Git(stderr));
        }
        Ok(path)
    }

    /// Merge(taskId) → result.
    ///
    /// Refuses if the working copy is dirty; otherwise merges `task/{id}`
    /// into the canonical repo's currently checked-out branch, run from the
    /// canonical repo's own directory (not the working copy), as a
    /// non-fast-forward merge so the task's history is preserved.
    pub async fn merge(&self, task_id: &str) -> Result<MergeOutcome, WorkspaceError> {
        let branch = format!("task/{task_id}");
        let path = self.workspace_path(task_id);

        if self.has_uncommitted_changes(&path).await? {
            return Err(WorkspaceError::DirtyWorkingCopy);
        }

        let target = self.current_branch(&self.canonical_repo).await?;

        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.canonical_repo)
            .args(["merge", "--no-ff", "--no-edit", &branch]);
        let output = run_with_timeout(cmd, GIT_WORKTREE_TIMEOUT, "git merge")
            .await
            .map_err(WorkspaceError::Git)?;
        if !output.status.success() {
            // Abort so the canonical repo is left in a clean state.
            let mut abort = Command::new("git");
            abort.arg("-C").arg(&self.canonical_repo).args(["merge", "--abort"]);
            let _ = run_with_timeout(abort, GIT_WORKTREE_TIMEOUT, "git merge --abort").await;
            return Err(WorkspaceError::MergeConflict { branch, target });
        }

        let merge_commit = self.rev_parse(&self.canonical_repo, "HEAD").await?;
        Ok(MergeOutcome {
            branch,
            merge_commit,
        })
    }

    /// Preserve(taskId): a no-op by design (spec §4.2) — the working copy
    /// is never auto-deleted. Present for symmetry with Allocate/Merge and
    /// to document the policy at the call site.
    pub fn preserve(&self, _task_id: &str) {}

    async fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, WorkspaceError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(path).args(["status", "--porcelain"]);
        let output = run_with_timeout(cmd, GIT_WORKTREE_TIMEOUT, "git status")
            .await
            .map_err(WorkspaceError::Git)?;
        if !output.status.success() {
            return Err(WorkspaceError::Git(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(!output.stdout.is_empty())
    }

    async fn current_branch(&self, repo: &Path) -> Result<String, WorkspaceError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(repo).args(["rev-parse", "--abbrev-ref", "HEAD"]);
        let output = run_with_timeout(cmd, GIT_WORKTREE_TIMEOUT, "git rev-parse --abbrev-ref")
            .await
            .map_err(WorkspaceError::Git)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn rev_parse(&self, repo: &Path, rev: &str) -> Result<String, WorkspaceError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(repo).args(["rev-parse", rev]);
        let output = run_with_timeout(cmd, GIT_WORKTREE_TIMEOUT, "git rev-parse")
            .await
            .map_err(WorkspaceError::Git)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
