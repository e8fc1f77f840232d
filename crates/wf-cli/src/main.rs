mod admin_cmd;
mod list_cmd;
mod new_cmd;
mod registry;
mod run_cmd;
mod show_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use wf_store::config::StoreConfig;
use wf_store::state_manager::SqliteStateManager;

#[derive(Parser)]
#[command(name = "wfctl", about = "Multi-agent workflow orchestrator")]
struct Cli {
    /// Database URL (overrides WF_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Git repository the workflow's worktrees are created under
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Branch name prefix used for workflow/task branches
    #[arg(long, global = true, default_value = "wfctl")]
    branch_prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new workflow from a prompt
    New {
        /// The user prompt the workflow will drive through its phases
        #[arg(long)]
        prompt: String,
        /// Optional blueprint TOML file (defaults to `Blueprint::default()`)
        #[arg(long)]
        blueprint: Option<String>,
    },
    /// List all persisted workflows
    List,
    /// Show a workflow's current state and task list
    Show {
        /// Workflow ID
        id: String,
    },
    /// Drive a workflow through its phases until done, paused, or cancelled
    Run {
        /// Workflow ID
        id: String,
    },
    /// Force a non-running workflow into `aborted`
    Abort {
        /// Workflow ID
        id: String,
    },
    /// Remove git worktrees left behind for a workflow
    Cleanup {
        /// Workflow ID
        id: String,
    },
    /// List workflows whose heartbeat has gone stale
    Zombies {
        /// Minutes since the last heartbeat before a running workflow counts as a zombie
        #[arg(long, default_value_t = 5)]
        stale_minutes: i64,
    },
}

fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid workflow ID: {s}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store_config = match &cli.database_url {
        Some(url) => StoreConfig::new(url.clone()),
        None => StoreConfig::from_env(),
    };
    let store = SqliteStateManager::connect(&store_config)
        .await
        .context("failed to connect to the workflow store")?;

    match cli.command {
        Commands::New { prompt, blueprint } => {
            new_cmd::run_new(&store, &prompt, blueprint.as_deref()).await?;
        }
        Commands::List => {
            list_cmd::run_list(&store).await?;
        }
        Commands::Show { id } => {
            show_cmd::run_show(&store, parse_id(&id)?).await?;
        }
        Commands::Run { id } => {
            let id = parse_id(&id)?;
            run_cmd::run_run(Arc::new(store), id, &cli.repo, &cli.branch_prefix).await?;
        }
        Commands::Abort { id } => {
            admin_cmd::run_abort(&store, parse_id(&id)?).await?;
        }
        Commands::Cleanup { id } => {
            admin_cmd::run_cleanup(parse_id(&id)?, &cli.repo, &cli.branch_prefix).await?;
        }
        Commands::Zombies { stale_minutes } => {
            admin_cmd::run_zombies(&store, stale_minutes).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use wf_store::config::StoreConfig;
    use wf_store::models::WorkflowStatus;
    use wf_store::state_manager::SqliteStateManager;

    #[tokio::test]
    async fn full_create_list_show_flow() {
        let store = SqliteStateManager::connect(&StoreConfig::in_memory()).await.unwrap();

        crate::new_cmd::run_new(&store, "wire up the payments webhook", None).await.unwrap();

        let workflows = store.list().await.unwrap();
        assert_eq!(workflows.len(), 1);
        let id = workflows[0].id;
        assert_eq!(workflows[0].status, WorkflowStatus::Pending);

        crate::list_cmd::run_list(&store).await.unwrap();
        crate::show_cmd::run_show(&store, id).await.unwrap();

        crate::admin_cmd::run_abort(&store, id).await.unwrap();
        let state = store.load(id).await.unwrap().unwrap();
        assert_eq!(state.to_workflow().status, WorkflowStatus::Aborted);
    }
}
