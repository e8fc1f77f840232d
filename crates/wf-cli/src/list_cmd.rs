//! `wfctl list` command: show every persisted workflow as a summary table.

use anyhow::{Context, Result};
use wf_store::state_manager::SqliteStateManager;

pub async fn run_list(store: &SqliteStateManager) -> Result<()> {
    let workflows = store.list().await.context("failed to list workflows")?;

    if workflows.is_empty() {
        println!("No workflows found. Use `wfctl new --prompt ...` to create one.");
        return Ok(());
    }

    let prompt_w = workflows.iter().map(|w| w.prompt.len()).max().unwrap_or(6).min(40).max(6);

    println!(
        "{:<36}  {:<prompt_w$}  {:<9}  {:<8}  UPDATED",
        "ID", "PROMPT", "STATUS", "PHASE",
    );
    for w in &workflows {
        let prompt_display = if w.prompt.len() > prompt_w {
            format!("{}...", &w.prompt[..prompt_w.saturating_sub(3)])
        } else {
            w.prompt.clone()
        };
        println!(
            "{:<36}  {:<prompt_w$}  {:<9}  {:<8}  {}",
            w.id,
            prompt_display,
            w.status.to_string(),
            w.current_phase.to_string(),
            w.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_store::config::StoreConfig;
    use wf_store::models::{Blueprint, Workflow, WorkflowState};

    #[tokio::test]
    async fn lists_an_empty_store_without_error() {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();
        run_list(&store).await.unwrap();
    }

    #[tokio::test]
    async fn lists_a_populated_store_without_error() {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();
        let workflow = Workflow::new(
            "a prompt long enough to exercise truncation in the table column",
            Blueprint::default(),
        );
        store.save(&WorkflowState::from_workflow(&workflow)).await.unwrap();
        run_list(&store).await.unwrap();
    }
}
