//! `GitClient` -- the port beneath `WorkflowWorktreeManager` for raw git
//! plumbing (commit SHA lookups, diff stats). Concrete command execution is
//! out of scope here; `wf_core::git::worktree` is the one implementation
//! this crate ships, talking to the system `git` binary directly rather
//! than going through this port. The port exists so a future backend
//! (libgit2, a remote git service) can be substituted without touching the
//! scheduler or driver.

use async_trait::async_trait;
use wf_store::DomainError;

#[async_trait]
pub trait GitClient: Send + Sync {
    async fn head_commit(&self, worktree_path: &str) -> Result<String, DomainError>;
    async fn modified_files(&self, worktree_path: &str) -> Result<Vec<String>, DomainError>;
}
