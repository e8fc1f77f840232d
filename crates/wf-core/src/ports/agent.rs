//! The `Agent` port -- the adapter interface for LLM-backed agent CLIs.
//!
//! Each concrete agent (Claude, Gemini, a local model runner, ...) implements
//! this trait; none of those adapters live in this crate. The trait is
//! object-safe so registries can hold `Box<dyn Agent>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wf_store::DomainError;
use wf_store::models::ReasoningEffort;

/// What an agent adapter advertises about itself, used by the registry to
/// decide phase eligibility and by the scheduler to pick models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_minute: Option<u32>,
    pub tokens_per_minute: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub tools: bool,
    pub images: bool,
    pub json: bool,
    pub supported_models: Vec<String>,
    pub default_model: String,
    pub max_context_tokens: u64,
    pub max_output_tokens: u64,
    pub rate_limits: Option<RateLimits>,
}

/// Arguments to a single agent call.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub prompt: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub timeout: Duration,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
}

impl ExecuteOptions {
    pub fn new(prompt: impl Into<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            reasoning_effort: None,
            timeout,
            working_dir: working_dir.into(),
            env_vars: HashMap::new(),
        }
    }
}

/// Handle to a running (or completed) agent call. Opaque outside the
/// adapter that created it; the scheduler only ever passes it back.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub pid: Option<u32>,
    pub task_id: Uuid,
    pub attempt: u32,
    pub agent_name: String,
}

/// One entry of the append-only event log a call produces. Mirrors
/// `wf_store::models::AgentEventType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: Uuid,
    pub event_type: wf_store::models::AgentEventType,
    pub agent: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message: Option<String>,
    pub data: serde_json::Value,
}

impl From<AgentEvent> for wf_store::models::AgentEvent {
    fn from(e: AgentEvent) -> Self {
        Self {
            id: e.id,
            event_type: e.event_type,
            agent: e.agent,
            timestamp: e.timestamp,
            message: e.message,
            data: e.data,
        }
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier used in configuration and registry lookups.
    fn name(&self) -> &str;

    fn capabilities(&self) -> &Capabilities;

    /// Cheap liveness check used by `AgentRegistry::available_for_phase`.
    async fn ping(&self) -> bool;

    /// Start a call. Returns once the agent has been dispatched, not once
    /// it has finished -- progress arrives via [`Agent::events`].
    async fn execute(&self, opts: ExecuteOptions) -> Result<AgentHandle, DomainError>;

    /// Event stream for a handle returned by `execute`. Yields
    /// `AgentEvent::Completed` (or `Error`) and then ends.
    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

    /// Continue a conversation (used for refinement rounds).
    async fn send(&self, handle: &AgentHandle, message: &str) -> Result<(), DomainError>;

    async fn kill(&self, handle: &AgentHandle) -> Result<(), DomainError>;

    async fn is_running(&self, handle: &AgentHandle) -> bool;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Agent) {}
};

/// Test double: no subprocess, no network. Used by this crate's own tests
/// and as the default scoring agent in examples.
pub struct NoopAgent {
    name: String,
    capabilities: Capabilities,
    score: f64,
}

impl NoopAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities {
                streaming: false,
                tools: false,
                images: false,
                json: true,
                supported_models: vec!["noop".to_string()],
                default_model: "noop".to_string(),
                max_context_tokens: u64::MAX,
                max_output_tokens: u64::MAX,
                rate_limits: None,
            },
            score: 1.0,
        }
    }

    /// A `NoopAgent` used as a consensus moderator always reports this
    /// fixed score, useful for deterministic tests.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

#[async_trait]
impl Agent for NoopAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn execute(&self, opts: ExecuteOptions) -> Result<AgentHandle, DomainError> {
        let _ = opts;
        Ok(AgentHandle {
            pid: None,
            task_id: Uuid::nil(),
            attempt: 0,
            agent_name: self.name.clone(),
        })
    }

    fn events(&self, _handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        Box::pin(futures::stream::empty())
    }

    async fn send(&self, _handle: &AgentHandle, _message: &str) -> Result<(), DomainError> {
        Ok(())
    }

    async fn kill(&self, _handle: &AgentHandle) -> Result<(), DomainError> {
        Ok(())
    }

    async fn is_running(&self, _handle: &AgentHandle) -> bool {
        false
    }
}
