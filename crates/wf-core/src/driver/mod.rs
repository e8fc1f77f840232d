//! Phase driver: the top-level coroutine that takes one workflow through
//! Refine -> Analyze -> Plan -> Execute, persisting state after every step
//! and keeping its lease alive with a background heartbeat writer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use wf_store::error::{DomainError, ErrorCategory};
use wf_store::models::{ExecutionMode, Phase, Task, Workflow, WorkflowState, WorkflowStatus};
use wf_store::state_manager::{LockHolder, SqliteStateManager};

use crate::consensus::{human_review_check, run_consensus, Moderator, Refiner};
use crate::git::WorkflowWorktreeManager;
use crate::ports::{Agent, AgentRegistry, ExecuteOptions};
use crate::scheduler::TaskScheduler;

/// Default cadence of the background heartbeat writer; configurable per
/// driver instance.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PhaseDriverConfig {
    pub heartbeat_interval: Duration,
    pub lock_ttl: chrono::Duration,
    pub branch_prefix: String,
}

impl Default for PhaseDriverConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            lock_ttl: chrono::Duration::seconds(90),
            branch_prefix: "wfctl".to_string(),
        }
    }
}

pub struct PhaseDriver {
    store: Arc<SqliteStateManager>,
    registry: Arc<AgentRegistry>,
    worktrees: Arc<WorkflowWorktreeManager>,
    config: PhaseDriverConfig,
}

/// Fans a single `Agent.execute` call out to completion and concatenates the
/// message text of every event into one string. The moderator/refiner
/// wrappers in this module are built on top of this single primitive.
async fn collect_agent_output(agent: &dyn Agent, opts: ExecuteOptions) -> Result<String, DomainError> {
    let handle = agent.execute(opts).await?;
    let mut stream = agent.events(&handle);
    let mut combined = String::new();
    while let Some(event) = stream.next().await {
        if let Some(message) = event.message {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&message);
        }
        if matches!(
            event.event_type,
            wf_store::models::AgentEventType::Completed | wf_store::models::AgentEventType::Error
        ) {
            break;
        }
    }
    Ok(combined)
}

/// Moderator/refiner adapter over a fixed set of registered agents, used by
/// the consensus engine during Analyze (and any other consensus-enabled
/// phase).
struct AgentPanel<'a> {
    moderator: &'a dyn Agent,
    panel: Vec<&'a dyn Agent>,
    prompt: String,
    working_dir: PathBuf,
    timeout: Duration,
}

#[async_trait::async_trait]
impl<'a> Moderator for AgentPanel<'a> {
    async fn score(
        &self,
        outputs: &std::collections::HashMap<String, String>,
    ) -> Result<f64, DomainError> {
        let joined = outputs
            .iter()
            .map(|(agent, text)| format!("## {agent}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let scoring_prompt = format!(
            "Score the following set of analyses for agreement and quality on a 0.0-1.0 scale. \
             Respond with only the number.\n\n{joined}"
        );
        let opts = ExecuteOptions::new(scoring_prompt, self.working_dir.clone(), self.timeout);
        let reply = collect_agent_output(self.moderator, opts).await?;
        reply.trim().parse::<f64>().map_err(|_| {
            DomainError::new(
                ErrorCategory::Consensus,
                "MODERATOR_SCORE_UNPARSEABLE",
                format!("moderator reply was not a float: {reply:?}"),
            )
        })
    }
}

#[async_trait::async_trait]
impl<'a> Refiner for AgentPanel<'a> {
    async fn refine_round(
        &self,
        outputs: &std::collections::HashMap<String, String>,
    ) -> Result<std::collections::HashMap<String, String>, DomainError> {
        let joined = outputs
            .iter()
            .map(|(agent, text)| format!("## {agent}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut revised = std::collections::HashMap::new();
        for agent in &self.panel {
            let revise_prompt = format!(
                "Original task: {}\n\nOther analyses so far:\n{joined}\n\n\
                 Revise your own analysis in light of the others.",
                self.prompt
            );
            let opts = ExecuteOptions::new(revise_prompt, self.working_dir.clone(), self.timeout);
            let output = collect_agent_output(*agent, opts).await?;
            revised.insert(agent.name().to_string(), output);
        }
        Ok(revised)
    }
}

impl PhaseDriver {
    pub fn new(
        store: Arc<SqliteStateManager>,
        registry: Arc<AgentRegistry>,
        worktrees: Arc<WorkflowWorktreeManager>,
        config: PhaseDriverConfig,
    ) -> Self {
        Self {
            store,
            registry,
            worktrees,
            config,
        }
    }

    /// Drive `workflow_id` from its current phase through to `done`, or
    /// until cancelled. Acquires and releases the workflow lock, starts and
    /// stops the heartbeat writer, and persists state after every phase
    /// step, exactly as the top-level pseudocode prescribes.
    pub async fn run(&self, workflow_id: Uuid, cancel: CancellationToken) -> Result<(), DomainError> {
        let holder = LockHolder::current();
        let acquired = self.store.acquire_lock(workflow_id, &holder, self.config.lock_ttl).await?;
        if !acquired {
            tracing::warn!(%workflow_id, "lock already held, refusing to start a second driver");
            return Err(DomainError::conflict(
                "LOCK_HELD",
                format!("workflow {workflow_id} is already locked by another driver"),
            ));
        }
        tracing::info!(%workflow_id, pid = holder.pid, "acquired workflow lock");

        let heartbeat_cancel = CancellationToken::new();
        let heartbeat_store = self.store.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let heartbeat_token = heartbeat_cancel.clone();
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = heartbeat_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat_store.heartbeat(workflow_id).await {
                            tracing::warn!(%workflow_id, error = %e, "heartbeat write failed");
                        }
                    }
                }
            }
        });

        self.store.mark_running(workflow_id, &holder).await?;

        let result = self.drive_phases(workflow_id, &cancel).await;

        heartbeat_cancel.cancel();
        let _ = heartbeat_task.await;
        let _ = self.store.mark_stopped(workflow_id).await;
        let _ = self.store.release_lock(workflow_id, holder.pid).await;

        result
    }

    async fn drive_phases(&self, workflow_id: Uuid, cancel: &CancellationToken) -> Result<(), DomainError> {
        let state = self
            .store
            .load(workflow_id)
            .await?
            .ok_or_else(|| DomainError::not_found("WORKFLOW_NOT_FOUND", workflow_id.to_string()))?;
        let mut workflow = state.to_workflow();

        if workflow.status == WorkflowStatus::Pending {
            workflow.status = WorkflowStatus::Running;
            workflow.started_at.get_or_insert(Utc::now());
        }

        loop {
            if cancel.is_cancelled() {
                tracing::info!(workflow_id = %workflow.id, "cancellation requested, winding down");
                return self.cancel_workflow(&mut workflow).await;
            }
            if workflow.current_phase == Phase::Done {
                workflow.status = WorkflowStatus::Completed;
                workflow.completed_at = Some(Utc::now());
                self.persist(&workflow, None).await?;
                self.worktrees.finalize_workflow(workflow.id, Some(&workflow.blueprint.base_branch))?;
                tracing::info!(workflow_id = %workflow.id, "workflow completed");
                return Ok(());
            }

            tracing::debug!(workflow_id = %workflow.id, phase = %workflow.current_phase, "entering phase");
            let phase_result = self.run_phase(&mut workflow, cancel).await;
            match phase_result {
                Ok(()) => {
                    self.persist(&workflow, None).await?;
                    if let Err(e) = workflow.advance_phase() {
                        return Err(e);
                    }
                    self.persist(&workflow, None).await?;
                }
                Err(e) if e.code == "HUMAN_REVIEW_REQUIRED" => {
                    tracing::warn!(workflow_id = %workflow.id, phase = %workflow.current_phase, "consensus below warning threshold, pausing for human review");
                    workflow.status = WorkflowStatus::Paused;
                    self.persist(&workflow, Some(e.message.clone())).await?;
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(workflow_id = %workflow.id, phase = %workflow.current_phase, error = %e, "phase failed");
                    workflow.status = WorkflowStatus::Failed;
                    workflow.completed_at = Some(Utc::now());
                    self.persist(&workflow, Some(e.message.clone())).await?;
                    return Err(e);
                }
            }
        }
    }

    async fn run_phase(&self, workflow: &mut Workflow, cancel: &CancellationToken) -> Result<(), DomainError> {
        match workflow.current_phase {
            Phase::Refine => self.run_refine(workflow).await,
            Phase::Analyze => self.run_analyze(workflow).await,
            Phase::Plan => self.run_plan(workflow).await,
            Phase::Execute => self.run_execute(workflow, cancel).await,
            Phase::Done => Ok(()),
        }
    }

    async fn run_refine(&self, workflow: &mut Workflow) -> Result<(), DomainError> {
        if !workflow.blueprint.refiner.enabled {
            return Ok(());
        }
        let Some(agent_name) = &workflow.blueprint.refiner.agent else {
            return Ok(());
        };
        let Some(agent) = self.registry.get(agent_name) else {
            return Err(DomainError::new(
                ErrorCategory::Validation,
                "REFINER_NOT_FOUND",
                format!("refiner agent '{agent_name}' is not registered"),
            ));
        };
        let timeout = Duration::from_secs(workflow.blueprint.effective_phase_timeout(Phase::Refine).max(1) as u64);
        let opts = ExecuteOptions::new(
            format!("Refine and clarify this task prompt:\n\n{}", workflow.prompt),
            std::env::temp_dir(),
            timeout,
        );
        let optimized = collect_agent_output(agent, opts).await?;
        workflow.optimized_prompt = Some(optimized);
        Ok(())
    }

    async fn run_analyze(&self, workflow: &mut Workflow) -> Result<(), DomainError> {
        if !workflow.blueprint.consensus.enabled {
            return Ok(());
        }
        let available = self.registry.available_for_phase(Phase::Analyze).await;
        let panel: Vec<&dyn Agent> = if workflow.blueprint.analyze_agents.is_empty() {
            available
        } else {
            available
                .into_iter()
                .filter(|a| workflow.blueprint.analyze_agents.iter().any(|n| n == a.name()))
                .collect()
        };
        if panel.is_empty() {
            return Err(DomainError::new(
                ErrorCategory::Validation,
                "NO_ANALYZE_AGENTS",
                "no agents are available for the analyze phase",
            ));
        }
        let moderator_name = &workflow.blueprint.consensus.agent;
        let Some(moderator) = self.registry.get(moderator_name) else {
            return Err(DomainError::new(
                ErrorCategory::Validation,
                "MODERATOR_NOT_FOUND",
                format!("consensus moderator agent '{moderator_name}' is not registered"),
            ));
        };

        let prompt = workflow.optimized_prompt.clone().unwrap_or_else(|| workflow.prompt.clone());
        let timeout = Duration::from_secs(workflow.blueprint.effective_phase_timeout(Phase::Analyze).max(1) as u64);
        let working_dir = std::env::temp_dir();

        let mut initial_outputs = std::collections::HashMap::new();
        for agent in &panel {
            let opts = ExecuteOptions::new(prompt.clone(), working_dir.clone(), timeout);
            let output = collect_agent_output(*agent, opts).await?;
            initial_outputs.insert(agent.name().to_string(), output);
        }

        let panel_adapter = AgentPanel {
            moderator,
            panel,
            prompt: prompt.clone(),
            working_dir,
            timeout,
        };

        let threshold = workflow.blueprint.threshold_for(Phase::Analyze);
        let result = run_consensus(
            Phase::Analyze,
            &workflow.blueprint.consensus,
            threshold,
            &panel_adapter,
            &panel_adapter,
            initial_outputs,
        )
        .await?;

        workflow.metrics.consensus_score = Some(result.score);

        if let Some(err) = human_review_check(&result, workflow.blueprint.consensus.warning_threshold) {
            return Err(err);
        }

        Ok(())
    }

    async fn run_plan(&self, workflow: &mut Workflow) -> Result<(), DomainError> {
        let Some(synth_name) = &workflow.blueprint.plan_synthesizer else {
            return Ok(());
        };
        let Some(agent) = self.registry.get(synth_name) else {
            return Err(DomainError::new(
                ErrorCategory::Validation,
                "PLAN_SYNTHESIZER_NOT_FOUND",
                format!("plan synthesizer agent '{synth_name}' is not registered"),
            ));
        };
        let prompt = workflow.optimized_prompt.clone().unwrap_or_else(|| workflow.prompt.clone());
        let timeout = Duration::from_secs(workflow.blueprint.effective_phase_timeout(Phase::Plan).max(1) as u64);
        let opts = ExecuteOptions::new(
            format!("Break this task down into an ordered list of concrete subtasks:\n\n{prompt}"),
            std::env::temp_dir(),
            timeout,
        );
        let plan_text = collect_agent_output(agent, opts).await?;

        if workflow.tasks.is_empty() {
            for (i, line) in plan_text.lines().filter(|l| !l.trim().is_empty()).enumerate() {
                let mut task = Task::new(Phase::Execute, format!("task-{}", i + 1), line.trim().to_string());
                task.agent = workflow.blueprint.single_agent.as_ref().map(|c| c.agent.clone());
                workflow.add_task(task);
            }
        }
        Ok(())
    }

    async fn run_execute(&self, workflow: &mut Workflow, cancel: &CancellationToken) -> Result<(), DomainError> {
        self.worktrees.initialize_workflow(workflow.id, &workflow.blueprint.base_branch)?;

        let parallelism = match workflow.blueprint.execution_mode {
            ExecutionMode::SingleAgent => 1,
            _ => 4,
        };
        let scheduler = TaskScheduler::new(self.worktrees.clone(), parallelism, workflow.blueprint.worktree_mode);
        let merge_strategy = workflow.blueprint.merge_strategy;
        let mut events = Vec::new();
        let result = scheduler
            .run_execute_phase(workflow, &self.registry, merge_strategy, cancel, &mut events)
            .await;
        workflow.agent_events.extend(events.into_iter().map(Into::into));
        result
    }

    async fn cancel_workflow(&self, workflow: &mut Workflow) -> Result<(), DomainError> {
        for task in workflow.tasks.values_mut() {
            if task.status == wf_store::models::TaskStatus::Running {
                task.mark_failed(Utc::now(), "user cancel");
            }
        }
        self.worktrees.cleanup_workflow(workflow.id, false)?;
        workflow.status = WorkflowStatus::Aborted;
        workflow.completed_at = Some(Utc::now());
        self.persist(workflow, Some("user cancel".to_string())).await?;
        Err(DomainError::user_cancel())
    }

    /// Persist the in-memory `Workflow` as the next version of its
    /// `WorkflowState`, overriding `error` explicitly since phase outcomes
    /// (human review, cancellation, fatal failure) determine it independent
    /// of whatever was already on the in-memory workflow.
    async fn persist(&self, workflow: &Workflow, error: Option<String>) -> Result<(), DomainError> {
        let previous = self.store.load(workflow.id).await?;
        let mut state = WorkflowState::from_workflow(workflow);
        state.version = previous.as_ref().map(|p| p.version + 1).unwrap_or(1);
        state.run.error = error;
        state.checksum = state.compute_checksum();
        self.store.save(&state).await
    }
}
