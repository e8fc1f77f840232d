//! Concrete git isolation: one long-lived branch per workflow, one
//! short-lived branch and worktree per task, merged back into the workflow
//! branch according to the blueprint's merge strategy.

pub mod worktree;

pub use worktree::{
    MergeOutcome, MergeStrategy, WorkflowGitInfo, WorkflowWorktreeManager, WorktreeError,
    WorktreeInfo,
};
