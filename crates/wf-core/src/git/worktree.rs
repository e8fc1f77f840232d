//! `WorkflowWorktreeManager`: gives each workflow its own branch off a base
//! and each task its own branch off the workflow branch, each checked out
//! into its own worktree.
//!
//! The low-level git plumbing (`create_worktree`, `remove_worktree`,
//! `merge_branch`, porcelain parsing, the serializing `git_lock`) stays
//! close to a plain `WorktreeManager`; this module adds the workflow/task
//! branch-naming convention and the merge-strategy and finalize/cleanup
//! operations the orchestrator needs on top of it.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use uuid::Uuid;
use wf_store::error::{DomainError, ErrorCategory};

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("worktree path exists but has unexpected branch: expected {expected}, found {found}")]
    BranchMismatch { expected: String, found: String },

    #[error("failed to parse worktree list output: {0}")]
    ParseError(String),
}

impl From<WorktreeError> for DomainError {
    fn from(e: WorktreeError) -> Self {
        match &e {
            WorktreeError::GitExit { stderr, .. }
                if stderr.contains("CONFLICT") || stderr.contains("Automatic merge failed") =>
            {
                DomainError::new(ErrorCategory::Conflict, "MERGE_CONFLICT", e.to_string())
            }
            _ => DomainError::new(ErrorCategory::Execution, "GIT_ERROR", e.to_string()),
        }
    }
}

pub use wf_store::models::MergeStrategy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { commit: String },
    Conflict { conflict_files: Vec<String>, details: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head_commit: String,
}

#[derive(Debug, Clone)]
pub struct WorkflowGitInfo {
    pub branch: String,
    pub worktree_root: PathBuf,
}

/// Serializes all mutating git operations for one repository: git's own
/// lock file on the object store rejects concurrent `worktree`/`merge`
/// invocations, so callers within a process must not race each other even
/// though the workflow-level lock in `wf_store` already keeps different
/// *processes* from touching the same workflow concurrently.
#[derive(Debug, Clone)]
pub struct WorkflowWorktreeManager {
    repo_path: PathBuf,
    worktree_base: PathBuf,
    branch_prefix: String,
    git_lock: Arc<Mutex<()>>,
}

impl WorkflowWorktreeManager {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        worktree_base: Option<PathBuf>,
        branch_prefix: impl Into<String>,
    ) -> Result<Self, WorktreeError> {
        let repo_path = repo_path.into();

        let output = Command::new("git")
            .arg("rev-parse")
            .arg("--git-dir")
            .current_dir(&repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(WorktreeError::NotAGitRepo(repo_path));
        }

        let worktree_base = worktree_base.unwrap_or_else(|| {
            let repo_name = repo_path.file_name().and_then(|n| n.to_str()).unwrap_or("repo");
            repo_path
                .parent()
                .map(|p| p.join(format!("{repo_name}-wf-worktrees")))
                .unwrap_or_else(|| PathBuf::from(format!("{repo_name}-wf-worktrees")))
        });

        Ok(Self {
            repo_path,
            worktree_base,
            branch_prefix: branch_prefix.into(),
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// HEAD commit of an arbitrary worktree directory (e.g. a task's).
    pub fn head_commit(&self, worktree_path: &Path) -> Result<String, DomainError> {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(worktree_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "rev-parse".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn workflow_branch(&self, workflow_id: Uuid) -> String {
        format!("{}/wf-{}", self.branch_prefix, workflow_id)
    }

    pub fn task_branch(&self, workflow_id: Uuid, task_id: Uuid) -> String {
        format!("{}/wf-{}/t-{}", self.branch_prefix, workflow_id, task_id)
    }

    /// Create `<prefix>/wf-<id>` from `base` and the workflow's worktree
    /// root directory.
    pub fn initialize_workflow(
        &self,
        workflow_id: Uuid,
        base: &str,
    ) -> Result<WorkflowGitInfo, DomainError> {
        let branch = self.workflow_branch(workflow_id);
        let root = self.worktree_base.join(workflow_id.to_string());
        self.create_branch_from(&branch, base)?;
        self.create_worktree_at(&branch, &root)?;
        Ok(WorkflowGitInfo {
            branch,
            worktree_root: root,
        })
    }

    /// Create `<prefix>/wf-<id>/t-<task_id>` off the workflow branch.
    /// Idempotent per task: a pre-existing worktree for the same branch is
    /// returned as-is.
    pub fn create_task_worktree(
        &self,
        workflow_id: Uuid,
        task_id: Uuid,
    ) -> Result<WorktreeInfo, DomainError> {
        let workflow_branch = self.workflow_branch(workflow_id);
        let task_branch = self.task_branch(workflow_id, task_id);
        let dir_name = task_branch.replace('/', "--");
        let path = self.worktree_base.join(workflow_id.to_string()).join(dir_name);

        self.create_branch_from(&task_branch, &workflow_branch)?;
        self.create_worktree_at(&task_branch, &path)
    }

    /// Integrate the task branch into the workflow branch. Never leaves the
    /// workflow branch partially merged: a conflict aborts the merge before
    /// returning.
    pub fn merge_task_to_workflow(
        &self,
        workflow_id: Uuid,
        task_id: Uuid,
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome, DomainError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let workflow_branch = self.workflow_branch(workflow_id);
        let task_branch = self.task_branch(workflow_id, task_id);

        match strategy {
            MergeStrategy::Sequential | MergeStrategy::Parallel => {
                self.checkout_locked(&workflow_branch)?;
                self.run_merge_locked(&task_branch, &["merge", "--no-ff"])
            }
            MergeStrategy::Rebase => self.rebase_task_onto_workflow_locked(&workflow_branch, &task_branch),
        }
    }

    /// Rewrites `task_branch` onto the tip of `workflow_branch`, then
    /// fast-forwards `workflow_branch` onto the rebased result. A conflict
    /// during the rebase aborts it and leaves both branches untouched.
    fn rebase_task_onto_workflow_locked(
        &self,
        workflow_branch: &str,
        task_branch: &str,
    ) -> Result<MergeOutcome, DomainError> {
        self.checkout_locked(task_branch)?;
        let output = Command::new("git")
            .args(["rebase"])
            .arg(workflow_branch)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rebase".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let conflict_files = self.conflicted_files_locked();
            let _ = Command::new("git").args(["rebase", "--abort"]).current_dir(&self.repo_path).output();
            let _ = self.checkout_locked(workflow_branch);
            if !conflict_files.is_empty() || stderr.contains("CONFLICT") || stdout.contains("CONFLICT") {
                return Ok(MergeOutcome::Conflict {
                    conflict_files,
                    details: format!("{stdout}\n{stderr}").trim().to_string(),
                });
            }
            return Err(WorktreeError::GitExit {
                command: "rebase".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }

        self.checkout_locked(workflow_branch)?;
        // The rebase just replayed `task_branch` onto our own tip, so this
        // merge is always a fast-forward.
        self.run_merge_locked(task_branch, &["merge", "--ff-only"])
    }

    /// Runs `git <merge_args> <branch>` against the currently checked-out
    /// branch, classifying a conflict (and aborting it) rather than
    /// returning a bare error.
    fn run_merge_locked(&self, branch: &str, merge_args: &[&str]) -> Result<MergeOutcome, DomainError> {
        let output = Command::new("git")
            .args(merge_args)
            .arg(branch)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git merge".into(),
                source: e,
            })?;

        if output.status.success() {
            let commit = self.rev_parse_locked("HEAD")?;
            return Ok(MergeOutcome::Merged { commit });
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if stderr.contains("CONFLICT") || stdout.contains("CONFLICT") || stderr.contains("Automatic merge failed") {
            let conflict_files = self.conflicted_files_locked();
            let _ = Command::new("git").args(["merge", "--abort"]).current_dir(&self.repo_path).output();
            return Ok(MergeOutcome::Conflict {
                conflict_files,
                details: format!("{stdout}\n{stderr}").trim().to_string(),
            });
        }

        Err(WorktreeError::GitExit {
            command: "merge".into(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        }
        .into())
    }

    /// Merge `task_ids` in order. Stops at the first failure or conflict;
    /// previously merged tasks are retained.
    pub fn merge_all_tasks_to_workflow(
        &self,
        workflow_id: Uuid,
        task_ids: &[Uuid],
        strategy: MergeStrategy,
    ) -> Result<Vec<(Uuid, MergeOutcome)>, DomainError> {
        let mut results = Vec::with_capacity(task_ids.len());
        for &task_id in task_ids {
            let outcome = self.merge_task_to_workflow(workflow_id, task_id, strategy)?;
            let stop = matches!(outcome, MergeOutcome::Conflict { .. });
            results.push((task_id, outcome));
            if stop {
                break;
            }
        }
        Ok(results)
    }

    /// Optionally merge the workflow branch to `base`, then remove task
    /// branches and worktrees (but not the workflow branch itself).
    pub fn finalize_workflow(
        &self,
        workflow_id: Uuid,
        merge_to_base: Option<&str>,
    ) -> Result<Option<MergeOutcome>, DomainError> {
        let outcome = match merge_to_base {
            Some(base) => {
                let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
                let workflow_branch = self.workflow_branch(workflow_id);
                self.checkout_locked(base)?;
                let output = Command::new("git")
                    .args(["merge", "--no-ff"])
                    .arg(&workflow_branch)
                    .current_dir(&self.repo_path)
                    .output()
                    .map_err(|e| WorktreeError::GitCommand {
                        message: "failed to run git merge".into(),
                        source: e,
                    })?;
                if output.status.success() {
                    Some(MergeOutcome::Merged { commit: self.rev_parse_locked("HEAD")? })
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                    if stderr.contains("CONFLICT") || stdout.contains("CONFLICT") {
                        let conflict_files = self.conflicted_files_locked();
                        let _ = Command::new("git").args(["merge", "--abort"]).current_dir(&self.repo_path).output();
                        Some(MergeOutcome::Conflict {
                            conflict_files,
                            details: format!("{stdout}\n{stderr}").trim().to_string(),
                        })
                    } else {
                        return Err(WorktreeError::GitExit {
                            command: "merge".into(),
                            code: output.status.code().unwrap_or(-1),
                            stderr,
                        }
                        .into());
                    }
                }
            }
            None => None,
        };

        self.remove_task_artifacts(workflow_id)?;
        Ok(outcome)
    }

    /// Unconditional cleanup: remove task (and optionally workflow) branches
    /// and worktrees even if `finalize_workflow` never ran.
    pub fn cleanup_workflow(
        &self,
        workflow_id: Uuid,
        remove_workflow_branch: bool,
    ) -> Result<(), DomainError> {
        self.remove_task_artifacts(workflow_id)?;

        let root = self.worktree_base.join(workflow_id.to_string());
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Ok(info) = self.find_worktree_by_path(&root) {
            let _ = self.remove_worktree_locked(&info.path);
        } else if root.exists() {
            let _ = std::fs::remove_dir_all(&root);
        }

        if remove_workflow_branch {
            let branch = self.workflow_branch(workflow_id);
            let _ = self.delete_branch_locked(&branch);
        }
        let _ = self.cleanup_stale_locked();
        Ok(())
    }

    fn remove_task_artifacts(&self, workflow_id: Uuid) -> Result<(), DomainError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let prefix = format!("{}/wf-{}/t-", self.branch_prefix, workflow_id);
        for wt in self.list_worktrees()? {
            if let Some(branch) = &wt.branch {
                if branch.starts_with(&prefix) {
                    self.remove_worktree_locked(&wt.path)?;
                    self.delete_branch_locked(branch)?;
                }
            }
        }
        Ok(())
    }

    fn create_branch_from(&self, branch: &str, base: &str) -> Result<(), DomainError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.branch_exists_locked(branch)? {
            return Ok(());
        }
        let output = Command::new("git")
            .args(["branch", branch, base])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git branch".into(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "branch".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        Ok(())
    }

    fn create_worktree_at(&self, branch: &str, path: &Path) -> Result<WorktreeInfo, DomainError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Ok(existing) = self.find_worktree_by_path(path) {
            if existing.branch.as_deref() == Some(branch) || existing.branch.is_none() {
                return Ok(existing);
            }
            return Err(WorktreeError::BranchMismatch {
                expected: branch.to_string(),
                found: existing.branch.unwrap_or_default(),
            }
            .into());
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| WorktreeError::GitCommand {
                    message: format!("failed to create worktree parent: {}", parent.display()),
                    source: e,
                })?;
            }
        }

        let output = Command::new("git")
            .args(["worktree", "add"])
            .arg(path)
            .arg(branch)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree add".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if path.exists() {
                let _ = std::fs::remove_dir_all(path);
            }
            let _ = self.cleanup_stale_locked();
            return Err(WorktreeError::GitExit {
                command: "worktree add".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }

        Ok(self.find_worktree_by_path(path)?)
    }

    fn checkout_locked(&self, branch: &str) -> Result<(), DomainError> {
        let output = Command::new("git")
            .args(["checkout", branch])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git checkout".into(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "checkout".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        Ok(())
    }

    fn rev_parse_locked(&self, rev: &str) -> Result<String, DomainError> {
        let output = Command::new("git")
            .args(["rev-parse", rev])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "rev-parse".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn conflicted_files_locked(&self) -> Vec<String> {
        let output = Command::new("git")
            .args(["diff", "--name-only", "--diff-filter=U"])
            .current_dir(&self.repo_path)
            .output();
        match output {
            Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout)
                .lines()
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn branch_exists_locked(&self, branch: &str) -> Result<bool, WorktreeError> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify"])
            .arg(format!("refs/heads/{branch}"))
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git rev-parse --verify".into(),
                source: e,
            })?;
        Ok(output.status.success())
    }

    fn delete_branch_locked(&self, branch: &str) -> Result<(), DomainError> {
        let output = Command::new("git")
            .args(["branch", "-D", branch])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git branch -D".into(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("not found") {
                return Ok(());
            }
            return Err(WorktreeError::GitExit {
                command: "branch -D".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        Ok(())
    }

    fn remove_worktree_locked(&self, path: &Path) -> Result<(), DomainError> {
        if self.find_worktree_by_path(path).is_err() {
            if path.exists() {
                let _ = std::fs::remove_dir_all(path);
            }
            return Ok(());
        }
        let output = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(path)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree remove".into(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("is not a working tree") {
                return Ok(());
            }
            return Err(WorktreeError::GitExit {
                command: "worktree remove".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        Ok(())
    }

    fn cleanup_stale_locked(&self) -> Result<(), DomainError> {
        let output = Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree prune".into(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "worktree prune".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        Ok(())
    }

    fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, DomainError> {
        let output = Command::new("git")
            .args(["worktree", "list", "--porcelain"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| WorktreeError::GitCommand {
                message: "failed to run git worktree list".into(),
                source: e,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorktreeError::GitExit {
                command: "worktree list".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .into());
        }
        Ok(parse_porcelain_output(&String::from_utf8_lossy(&output.stdout))?)
    }

    fn find_worktree_by_path(&self, path: &Path) -> Result<WorktreeInfo, WorktreeError> {
        let worktrees = self.list_worktrees().map_err(|_| {
            WorktreeError::ParseError(format!("could not list worktrees for {}", path.display()))
        })?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        for wt in worktrees {
            let wt_canonical = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
            if wt_canonical == canonical {
                return Ok(wt);
            }
        }
        Err(WorktreeError::ParseError(format!("worktree not found at path: {}", path.display())))
    }
}

fn parse_porcelain_output(output: &str) -> Result<Vec<WorktreeInfo>, WorktreeError> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let (Some(path), Some(head)) = (current_path.take(), current_head.take()) {
                worktrees.push(WorktreeInfo {
                    path,
                    branch: current_branch.take(),
                    head_commit: head,
                });
            } else {
                current_path = None;
                current_head = None;
                current_branch = None;
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            current_branch = Some(rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string());
        }
    }

    if let (Some(path), Some(head)) = (current_path, current_head) {
        worktrees.push(WorktreeInfo {
            path,
            branch: current_branch,
            head_commit: head,
        });
    }

    Ok(worktrees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().to_path_buf();
        let run = |args: &[&str], d: &Path| {
            let out = Command::new("git").args(args).current_dir(d).output().unwrap();
            assert!(out.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&out.stderr));
        };
        run(&["init"], &repo_path);
        run(&["config", "user.email", "test@wf.dev"], &repo_path);
        run(&["config", "user.name", "wf test"], &repo_path);
        std::fs::write(repo_path.join("README.md"), "# test\n").unwrap();
        run(&["add", "."], &repo_path);
        run(&["commit", "-m", "initial"], &repo_path);
        (dir, repo_path)
    }

    #[test]
    fn branch_naming_matches_convention() {
        let (_dir, repo) = create_temp_repo();
        let mgr = WorkflowWorktreeManager::new(&repo, None, "wfctl").unwrap();
        let wf_id = Uuid::nil();
        assert_eq!(mgr.workflow_branch(wf_id), format!("wfctl/wf-{wf_id}"));
        let task_id = Uuid::nil();
        assert_eq!(mgr.task_branch(wf_id, task_id), format!("wfctl/wf-{wf_id}/t-{task_id}"));
    }

    #[test]
    fn initialize_workflow_and_create_task_worktree() {
        let (_dir, repo) = create_temp_repo();
        let base = TempDir::new().unwrap();
        let mgr = WorkflowWorktreeManager::new(&repo, Some(base.path().to_path_buf()), "wfctl").unwrap();

        let wf_id = Uuid::new_v4();
        let info = mgr.initialize_workflow(wf_id, "main").unwrap();
        assert!(info.worktree_root.exists());

        let task_id = Uuid::new_v4();
        let task_wt = mgr.create_task_worktree(wf_id, task_id).unwrap();
        assert!(task_wt.path.exists());
        assert_eq!(task_wt.branch.as_deref(), Some(mgr.task_branch(wf_id, task_id).as_str()));

        // Idempotent.
        let task_wt_again = mgr.create_task_worktree(wf_id, task_id).unwrap();
        assert_eq!(task_wt.path, task_wt_again.path);
    }

    #[test]
    fn merge_task_to_workflow_success() {
        let (_dir, repo) = create_temp_repo();
        let base = TempDir::new().unwrap();
        let mgr = WorkflowWorktreeManager::new(&repo, Some(base.path().to_path_buf()), "wfctl").unwrap();

        let wf_id = Uuid::new_v4();
        mgr.initialize_workflow(wf_id, "main").unwrap();
        let task_id = Uuid::new_v4();
        let task_wt = mgr.create_task_worktree(wf_id, task_id).unwrap();

        std::fs::write(task_wt.path.join("feature.txt"), "feature\n").unwrap();
        let run = |args: &[&str], d: &Path| {
            let out = Command::new("git").args(args).current_dir(d).output().unwrap();
            assert!(out.status.success());
        };
        run(&["add", "feature.txt"], &task_wt.path);
        run(&["commit", "-m", "feature"], &task_wt.path);

        let outcome = mgr
            .merge_task_to_workflow(wf_id, task_id, MergeStrategy::Sequential)
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    }

    #[test]
    fn rebase_strategy_fast_forwards_after_a_prior_merge() {
        let (_dir, repo) = create_temp_repo();
        let base = TempDir::new().unwrap();
        let mgr = WorkflowWorktreeManager::new(&repo, Some(base.path().to_path_buf()), "wfctl").unwrap();
        let run = |args: &[&str], d: &Path| {
            let out = Command::new("git").args(args).current_dir(d).output().unwrap();
            assert!(out.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&out.stderr));
        };

        let wf_id = Uuid::new_v4();
        mgr.initialize_workflow(wf_id, "main").unwrap();

        // A first task merges and advances the workflow branch ahead of
        // wherever a second task's branch forked from.
        let first_task = Uuid::new_v4();
        let first_wt = mgr.create_task_worktree(wf_id, first_task).unwrap();
        std::fs::write(first_wt.path.join("first.txt"), "first\n").unwrap();
        run(&["add", "first.txt"], &first_wt.path);
        run(&["commit", "-m", "first"], &first_wt.path);
        let first_outcome = mgr.merge_task_to_workflow(wf_id, first_task, MergeStrategy::Sequential).unwrap();
        assert!(matches!(first_outcome, MergeOutcome::Merged { .. }));

        let second_task = Uuid::new_v4();
        let second_wt = mgr.create_task_worktree(wf_id, second_task).unwrap();
        std::fs::write(second_wt.path.join("second.txt"), "second\n").unwrap();
        run(&["add", "second.txt"], &second_wt.path);
        run(&["commit", "-m", "second"], &second_wt.path);

        // A plain `--ff-only` merge of `second_task` here would fail since
        // the workflow branch has moved on; the rebase strategy must still
        // land the work.
        let outcome = mgr.merge_task_to_workflow(wf_id, second_task, MergeStrategy::Rebase).unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        // `merge_task_to_workflow` leaves the workflow branch checked out in
        // the main repo; both commits' content must be present.
        assert!(repo.join("first.txt").exists());
        assert!(repo.join("second.txt").exists());
    }

    #[test]
    fn merge_conflict_does_not_leave_partial_merge() {
        let (_dir, repo) = create_temp_repo();
        let base = TempDir::new().unwrap();
        let mgr = WorkflowWorktreeManager::new(&repo, Some(base.path().to_path_buf()), "wfctl").unwrap();

        let wf_id = Uuid::new_v4();
        let wf_info = mgr.initialize_workflow(wf_id, "main").unwrap();

        // Conflicting edit directly on the workflow branch.
        std::fs::write(wf_info.worktree_root.join("README.md"), "workflow change\n").unwrap();
        let run = |args: &[&str], d: &Path| {
            let out = Command::new("git").args(args).current_dir(d).output().unwrap();
            assert!(out.status.success());
        };
        run(&["add", "README.md"], &wf_info.worktree_root);
        run(&["commit", "-m", "workflow edit"], &wf_info.worktree_root);

        let task_id = Uuid::new_v4();
        let task_wt = mgr.create_task_worktree(wf_id, task_id).unwrap();
        std::fs::write(task_wt.path.join("README.md"), "task change\n").unwrap();
        run(&["add", "README.md"], &task_wt.path);
        run(&["commit", "-m", "task edit"], &task_wt.path);

        let outcome = mgr
            .merge_task_to_workflow(wf_id, task_id, MergeStrategy::Sequential)
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Conflict { .. }));

        // Repository must be left clean -- no merge in progress.
        let status = Command::new("git")
            .args(["status", "--porcelain=v1"])
            .current_dir(&repo)
            .output()
            .unwrap();
        assert!(String::from_utf8_lossy(&status.stdout).trim().is_empty());
    }

    #[test]
    fn cleanup_workflow_removes_task_worktrees() {
        let (_dir, repo) = create_temp_repo();
        let base = TempDir::new().unwrap();
        let mgr = WorkflowWorktreeManager::new(&repo, Some(base.path().to_path_buf()), "wfctl").unwrap();

        let wf_id = Uuid::new_v4();
        mgr.initialize_workflow(wf_id, "main").unwrap();
        let task_id = Uuid::new_v4();
        let task_wt = mgr.create_task_worktree(wf_id, task_id).unwrap();
        assert!(task_wt.path.exists());

        mgr.cleanup_workflow(wf_id, true).unwrap();
        assert!(!task_wt.path.exists());
        assert!(!mgr.branch_exists_locked(&mgr.workflow_branch(wf_id)).unwrap());
    }
}
