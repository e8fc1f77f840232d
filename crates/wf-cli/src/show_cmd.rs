//! `wfctl show` command: detailed view of a single workflow and its tasks.

use anyhow::{Context, Result};
use uuid::Uuid;
use wf_store::state_manager::SqliteStateManager;

pub async fn run_show(store: &SqliteStateManager, id: Uuid) -> Result<()> {
    let state = store
        .load(id)
        .await
        .context("failed to load workflow")?
        .with_context(|| format!("workflow {id} not found"))?;
    let workflow = state.to_workflow();

    println!("Workflow: {}", workflow.id);
    println!("  Status:  {}", workflow.status);
    println!("  Phase:   {}", workflow.current_phase);
    println!("  Version: {}", state.version);
    println!("  Created: {}", workflow.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(started) = workflow.started_at {
        println!("  Started: {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(completed) = workflow.completed_at {
        println!("  Ended:   {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &workflow.error {
        println!("  Error:   {error}");
    }
    if let Some(score) = workflow.metrics.consensus_score {
        println!("  Consensus score: {score:.3}");
    }
    println!();
    println!("Prompt:");
    println!("  {}", workflow.prompt);
    if let Some(optimized) = &workflow.optimized_prompt {
        println!();
        println!("Optimized prompt:");
        println!("  {optimized}");
    }

    if workflow.tasks.is_empty() {
        return Ok(());
    }

    println!();
    println!("Tasks:");
    for task_id in &workflow.task_order {
        let Some(task) = workflow.tasks.get(task_id) else {
            continue;
        };
        println!("  [{}] {} ({})", task.status, task.name, task.id);
        if !task.dependencies.is_empty() {
            let deps: Vec<String> = task.dependencies.iter().map(|d| d.to_string()).collect();
            println!("    depends on: {}", deps.join(", "));
        }
        if let Some(agent) = &task.agent {
            println!("    agent: {agent}");
        }
        println!("    retries: {}/{}", task.retries, task.max_retries);
        if task.merge_pending {
            println!("    merge: conflict pending");
        } else if let Some(commit) = &task.merge_commit {
            println!("    merge: {commit}");
        }
        if let Some(error) = &task.error {
            println!("    error: {error}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_store::config::StoreConfig;
    use wf_store::models::{Blueprint, Workflow, WorkflowState};

    #[tokio::test]
    async fn shows_a_freshly_created_workflow() {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();
        let workflow = Workflow::new("show me", Blueprint::default());
        let id = workflow.id;
        store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();

        run_show(&store, id).await.unwrap();
    }

    #[tokio::test]
    async fn fails_on_an_unknown_id() {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();
        let result = run_show(&store, Uuid::new_v4()).await;
        assert!(result.is_err());
    }
}
