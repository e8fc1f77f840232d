//! Multi-agent consensus: iterative refine/score rounds until a scalar
//! moderator score crosses threshold or the score history stagnates.

use std::collections::HashMap;

use wf_store::error::{DomainError, ErrorCategory};
use wf_store::models::{ConsensusConfig, Phase};

use crate::ports::Agent;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusOutcome {
    Accepted,
    Stagnated,
    MaxRoundsReached,
}

#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub score: f64,
    pub outputs: HashMap<String, String>,
    pub rounds_run: u32,
    pub outcome: ConsensusOutcome,
}

/// Scores a round of agent outputs, returning a value in `[0, 1]`. The
/// moderator is itself an `Agent`; production callers build this from a
/// deterministic scoring prompt fed through `Agent::execute` and parse the
/// reply into a float. Kept as a trait here so the loop's termination logic
/// can be tested without spinning up a real agent call.
#[async_trait::async_trait]
pub trait Moderator: Send + Sync {
    async fn score(&self, outputs: &HashMap<String, String>) -> Result<f64, DomainError>;
}

/// Revises a round of outputs, each agent having seen the others' current
/// output. Production callers fan this out to the participating agents via
/// the `Agent` port; the loop itself is agnostic to how revision happens.
#[async_trait::async_trait]
pub trait Refiner: Send + Sync {
    async fn refine_round(
        &self,
        outputs: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, DomainError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Moderator) {}
    fn _assert_object_safe_refiner(_: &dyn Refiner) {}
};

/// Declares stagnation when the last two score deltas are each smaller than
/// `stagnation_threshold`.
fn is_stagnating(history: &[f64], stagnation_threshold: f64) -> bool {
    if history.len() < 3 {
        return false;
    }
    let n = history.len();
    let delta_a = (history[n - 1] - history[n - 2]).abs();
    let delta_b = (history[n - 2] - history[n - 3]).abs();
    delta_a < stagnation_threshold && delta_b < stagnation_threshold
}

/// Run the consensus loop for `phase` over the initial `outputs`.
///
/// `threshold` falls back from the per-phase map to the scalar threshold
/// (`Blueprint::threshold_for`); callers pass the resolved value directly
/// since this function has no blueprint dependency.
pub async fn run_consensus(
    phase: Phase,
    config: &ConsensusConfig,
    threshold: f64,
    moderator: &dyn Moderator,
    refiner: &dyn Refiner,
    initial_outputs: HashMap<String, String>,
) -> Result<ConsensusResult, DomainError> {
    let _ = phase;
    let mut outputs = initial_outputs;
    let mut history: Vec<f64> = Vec::new();
    let mut round: u32 = 0;
    let mut last_score = 0.0;

    loop {
        if round >= config.max_rounds {
            return Ok(ConsensusResult {
                score: last_score,
                outputs,
                rounds_run: round,
                outcome: ConsensusOutcome::MaxRoundsReached,
            });
        }

        let score = moderator.score(&outputs).await?;
        history.push(score);
        last_score = score;

        if round >= config.min_rounds && score >= threshold {
            return Ok(ConsensusResult {
                score,
                outputs,
                rounds_run: round + 1,
                outcome: ConsensusOutcome::Accepted,
            });
        }

        if is_stagnating(&history, config.stagnation_threshold) {
            return Ok(ConsensusResult {
                score,
                outputs,
                rounds_run: round + 1,
                outcome: ConsensusOutcome::Stagnated,
            });
        }

        outputs = refiner.refine_round(&outputs).await?;
        round += 1;
    }
}

/// If `result.score` is below `warning_threshold`, returns the
/// `HUMAN_REVIEW_REQUIRED` domain error the caller should surface (pausing
/// the workflow); otherwise `None`.
pub fn human_review_check(result: &ConsensusResult, warning_threshold: f64) -> Option<DomainError> {
    if result.score < warning_threshold {
        Some(DomainError::human_review_required(result.score, warning_threshold))
    } else {
        None
    }
}

/// Resolves the moderator agent named in `config.agent` out of whatever
/// agents were fanned out for this phase; a missing moderator is a
/// validation error (misconfigured blueprint), not retryable.
pub fn require_moderator<'a>(
    agents: &'a HashMap<String, &'a dyn Agent>,
    config: &ConsensusConfig,
) -> Result<&'a dyn Agent, DomainError> {
    agents.get(config.agent.as_str()).copied().ok_or_else(|| {
        DomainError::new(
            ErrorCategory::Validation,
            "MODERATOR_NOT_FOUND",
            format!("consensus moderator agent '{}' is not registered", config.agent),
        )
    })
}
