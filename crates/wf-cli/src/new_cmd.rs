//! `wfctl new` command: create and persist a fresh workflow.

use anyhow::{Context, Result};
use wf_store::models::{Blueprint, Workflow, WorkflowState};
use wf_store::state_manager::SqliteStateManager;

/// Create a `Workflow` from a prompt and an optional blueprint TOML file,
/// save it at version 1, and print its id.
pub async fn run_new(store: &SqliteStateManager, prompt: &str, blueprint_file: Option<&str>) -> Result<()> {
    let blueprint = match blueprint_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read blueprint file: {path}"))?;
            toml::from_str(&contents).with_context(|| format!("failed to parse blueprint file: {path}"))?
        }
        None => Blueprint::default(),
    };

    let workflow = Workflow::new(prompt, blueprint);
    let state = WorkflowState::from_workflow(&workflow);
    store.save(&state).await.context("failed to save new workflow")?;

    println!("Workflow created.");
    println!("  id:     {}", workflow.id);
    println!("  phase:  {}", workflow.current_phase);
    println!("  status: {}", workflow.status);
    println!();
    println!("Run it with: wfctl run {}", workflow.id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_store::config::StoreConfig;

    #[tokio::test]
    async fn creates_a_loadable_workflow_with_default_blueprint() {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();
        run_new(&store, "do the thing", None).await.unwrap();

        let workflows = store.list().await.unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].prompt, "do the thing");
        assert_eq!(workflows[0].status, wf_store::models::WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn rejects_a_nonexistent_blueprint_file() {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();
        let result = run_new(&store, "anything", Some("/nonexistent/blueprint.toml")).await;
        assert!(result.is_err());
    }
}
