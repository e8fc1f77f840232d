//! `wfctl run` command: drive a workflow to completion (or pause/abort)
//! using the phase driver, with graceful Ctrl-C cancellation.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wf_core::{PhaseDriver, PhaseDriverConfig, WorkflowWorktreeManager};
use wf_store::error::ErrorCategory;
use wf_store::state_manager::SqliteStateManager;

use crate::registry::build_registry;

pub async fn run_run(
    store: Arc<SqliteStateManager>,
    id: Uuid,
    repo_path: &Path,
    branch_prefix: &str,
) -> Result<()> {
    let state = store
        .load(id)
        .await
        .context("failed to load workflow")?
        .with_context(|| format!("workflow {id} not found"))?;
    let workflow = state.to_workflow();

    let registry = Arc::new(build_registry(&workflow.blueprint));
    let worktrees = Arc::new(
        WorkflowWorktreeManager::new(repo_path, None, branch_prefix)
            .map_err(|e| anyhow::anyhow!("{e}"))?,
    );
    let config = PhaseDriverConfig::default();
    let driver = PhaseDriver::new(store, registry, worktrees, config);

    // Graceful shutdown: first Ctrl-C asks the driver to wind down cleanly,
    // a second forces the process to exit immediately.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nCancelling workflow (Ctrl+C again to force exit)...");
            cancel_clone.cancel();
        }
    });

    println!("Running workflow {id}...");
    match driver.run(id, cancel).await {
        Ok(()) => {
            println!("Workflow completed.");
            Ok(())
        }
        Err(e) if e.code == "HUMAN_REVIEW_REQUIRED" => {
            println!("Workflow paused for human review: {}", e.message);
            println!("  details: {}", e.details);
            std::process::exit(2);
        }
        Err(e) if e.category == ErrorCategory::Execution && e.code == "USER_CANCEL" => {
            println!("Workflow aborted by user cancel.");
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("Workflow failed: {e}");
            std::process::exit(1);
        }
    }
}
