//! `AgentRegistry` -- a named collection of available agent adapters,
//! queryable by phase eligibility.

use std::collections::{HashMap, HashSet};

use wf_store::models::Phase;

use super::agent::Agent;

/// Per-phase enablement, read from configuration (not modeled further here
/// -- configuration loading is a `wf-cli` concern).
#[derive(Debug, Clone, Default)]
pub struct PhaseEnablement {
    enabled_agents: HashMap<Phase, HashSet<String>>,
}

impl PhaseEnablement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, phase: Phase, agent_name: impl Into<String>) -> &mut Self {
        self.enabled_agents.entry(phase).or_default().insert(agent_name.into());
        self
    }

    fn is_enabled(&self, phase: Phase, agent_name: &str) -> bool {
        match self.enabled_agents.get(&phase) {
            // No explicit configuration for this phase means "all registered
            // agents are eligible" -- matches the common case of a single
            // agent fleet used everywhere.
            None => true,
            Some(set) => set.contains(agent_name),
        }
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Box<dyn Agent>>,
    enablement: PhaseEnablement,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enablement(enablement: PhaseEnablement) -> Self {
        Self {
            agents: HashMap::new(),
            enablement,
        }
    }

    pub fn register(&mut self, agent: impl Agent + 'static) -> Option<Box<dyn Agent>> {
        let name = agent.name().to_string();
        self.agents.insert(name, Box::new(agent))
    }

    pub fn get(&self, name: &str) -> Option<&dyn Agent> {
        self.agents.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.agents.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents that both ping-succeed and are enabled for `phase`.
    pub async fn available_for_phase(&self, phase: Phase) -> Vec<&dyn Agent> {
        let mut available = Vec::new();
        for (name, agent) in &self.agents {
            if self.enablement.is_enabled(phase, name) && agent.ping().await {
                available.push(agent.as_ref());
            }
        }
        available
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::agent::NoopAgent;

    #[test]
    fn registry_starts_empty() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn register_and_get() {
        let mut registry = AgentRegistry::new();
        registry.register(NoopAgent::new("alpha"));
        assert_eq!(registry.get("alpha").unwrap().name(), "alpha");
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn available_for_phase_without_enablement_allows_all() {
        let mut registry = AgentRegistry::new();
        registry.register(NoopAgent::new("alpha"));
        registry.register(NoopAgent::new("beta"));
        let available = registry.available_for_phase(Phase::Analyze).await;
        assert_eq!(available.len(), 2);
    }

    #[tokio::test]
    async fn available_for_phase_respects_enablement() {
        let mut enablement = PhaseEnablement::new();
        enablement.enable(Phase::Analyze, "alpha");
        let mut registry = AgentRegistry::with_enablement(enablement);
        registry.register(NoopAgent::new("alpha"));
        registry.register(NoopAgent::new("beta"));

        let available = registry.available_for_phase(Phase::Analyze).await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name(), "alpha");

        let available_plan = registry.available_for_phase(Phase::Plan).await;
        assert!(available_plan.is_empty());
    }
}
