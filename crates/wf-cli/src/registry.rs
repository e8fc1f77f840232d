//! Builds the `AgentRegistry` a driver run uses from a workflow's blueprint.
//!
//! Concrete agent CLI adapters (subprocess/HTTP plumbing to `claude`,
//! `gemini`, etc.) are external to this workspace; the only `Agent` impl
//! shipped here is `NoopAgent`. This module registers one `NoopAgent` per
//! distinct agent name referenced by the blueprint, so `wfctl run` has
//! something to dispatch to out of the box. Wiring a real fleet means
//! swapping this module for one that registers real adapters -- nothing
//! else in the driver or scheduler needs to change.

use std::collections::HashSet;

use wf_core::ports::{AgentRegistry, NoopAgent};
use wf_store::models::Blueprint;

pub fn build_registry(blueprint: &Blueprint) -> AgentRegistry {
    let mut names: HashSet<String> = HashSet::new();
    if let Some(single) = &blueprint.single_agent {
        names.insert(single.agent.clone());
    }
    if let Some(agent) = &blueprint.refiner.agent {
        names.insert(agent.clone());
    }
    if blueprint.consensus.enabled {
        names.insert(blueprint.consensus.agent.clone());
    }
    if let Some(synth) = &blueprint.plan_synthesizer {
        names.insert(synth.clone());
    }
    names.extend(blueprint.analyze_agents.iter().cloned());

    let mut registry = AgentRegistry::new();
    for name in names {
        registry.register(NoopAgent::new(name));
    }
    registry
}
