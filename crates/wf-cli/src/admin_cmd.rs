//! Admin-mode operations: forcing an idle workflow to `aborted`, git worktree
//! cleanup, and zombie detection. None of these touch a running driver's
//! in-memory state -- they operate on persisted state only.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use uuid::Uuid;
use wf_core::WorkflowWorktreeManager;
use wf_store::models::{WorkflowState, WorkflowStatus};
use wf_store::state_manager::SqliteStateManager;

/// Force a non-running workflow into `aborted`. Refuses to touch a workflow
/// whose lock is currently held, since that means a driver owns it.
pub async fn run_abort(store: &SqliteStateManager, id: Uuid) -> Result<()> {
    if store.is_running(id).await.context("failed to check running state")? {
        anyhow::bail!("workflow {id} has an active driver; cancel it with Ctrl-C in `wfctl run` instead");
    }

    let state = store
        .load(id)
        .await
        .context("failed to load workflow")?
        .with_context(|| format!("workflow {id} not found"))?;
    let mut workflow = state.to_workflow();

    if workflow.status.is_terminal() {
        println!("Workflow {id} is already {}.", workflow.status);
        return Ok(());
    }

    workflow.status = WorkflowStatus::Aborted;
    workflow.completed_at = Some(Utc::now());
    workflow.error = Some("operator abort".to_string());

    let mut new_state = WorkflowState::from_workflow(&workflow);
    new_state.version = state.version + 1;
    new_state.checksum = new_state.compute_checksum();
    store.save(&new_state).await.context("failed to persist abort")?;

    println!("Workflow {id} marked aborted.");
    Ok(())
}

/// Remove task worktrees for a workflow, regardless of whether it is
/// finished -- an operator escape hatch for reclaiming disk.
pub async fn run_cleanup(id: Uuid, repo_path: &Path, branch_prefix: &str) -> Result<()> {
    let manager = WorkflowWorktreeManager::new(repo_path, None, branch_prefix)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    manager.cleanup_workflow(id, false).map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Worktrees for workflow {id} removed.");
    Ok(())
}

/// List workflows stuck `running` with a heartbeat older than
/// `stale_minutes`.
pub async fn run_zombies(store: &SqliteStateManager, stale_minutes: i64) -> Result<()> {
    let zombies = store
        .find_zombies(Duration::minutes(stale_minutes))
        .await
        .context("failed to query zombie workflows")?;

    if zombies.is_empty() {
        println!("No zombie workflows found (stale threshold: {stale_minutes}m).");
        return Ok(());
    }

    println!("Zombie workflows (heartbeat older than {stale_minutes}m):");
    for id in zombies {
        println!("  {id}");
    }
    println!();
    println!("Use `wfctl abort <id>` to retire one, or `wfctl run <id>` to resume it.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_store::config::StoreConfig;
    use wf_store::models::{Blueprint, Workflow};

    async fn seeded_store() -> (SqliteStateManager, Uuid) {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();
        let workflow = Workflow::new("abort me", Blueprint::default());
        let id = workflow.id;
        store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn aborts_a_pending_workflow() {
        let (store, id) = seeded_store().await;
        run_abort(&store, id).await.unwrap();

        let state = store.load(id).await.unwrap().unwrap();
        let workflow = state.to_workflow();
        assert_eq!(workflow.status, WorkflowStatus::Aborted);
        assert!(workflow.error.is_some());
        assert!(workflow.completed_at.is_some());
    }

    #[tokio::test]
    async fn aborting_an_already_terminal_workflow_is_a_no_op() {
        let (store, id) = seeded_store().await;
        run_abort(&store, id).await.unwrap();
        let version_after_first_abort = store.load(id).await.unwrap().unwrap().version;

        run_abort(&store, id).await.unwrap();
        let version_after_second_abort = store.load(id).await.unwrap().unwrap().version;

        assert_eq!(version_after_first_abort, version_after_second_abort);
    }

    #[tokio::test]
    async fn aborting_an_unknown_id_fails() {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();
        let result = run_abort(&store, Uuid::new_v4()).await;
        assert!(result.is_err());
    }
}
