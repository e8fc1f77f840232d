//! Reasoning-effort normalization: maps a requested effort level into the
//! set a specific model actually supports.
//!
//! `ReasoningEffort` already carries the total order `none ≤ minimal ≤ low ≤
//! medium ≤ high ≤ xhigh` via its derived `Ord`, and `"max"` parses as an
//! alias for `Xhigh`. The functions here do the closest-rank lookup against
//! a model's supported set; unknown models (empty or absent support list)
//! pass the request through unchanged.

use wf_store::models::ReasoningEffort;

/// Normalize `requested` against `supported`. If `supported` is empty the
/// model doesn't expose the dial at all and the request passes through
/// unchanged. Otherwise an exact match wins; absent an exact match, the
/// closest-rank supported value is picked, preferring the nearest value
/// that is not lower than `requested` (round up) and falling back to the
/// nearest lower value if nothing higher exists. `Xhigh` always resolves to
/// the model's highest supported level, matching "max" always mapping to
/// the ceiling.
pub fn normalize(requested: ReasoningEffort, supported: &[ReasoningEffort]) -> ReasoningEffort {
    if supported.is_empty() {
        return requested;
    }
    if supported.contains(&requested) {
        return requested;
    }

    if requested == ReasoningEffort::Xhigh {
        return *supported.iter().max().expect("supported is non-empty");
    }

    let next_up = supported.iter().filter(|&&s| s > requested).min();
    let next_down = supported.iter().filter(|&&s| s < requested).max();

    match (next_up, next_down) {
        (Some(&up), _) => up,
        (None, Some(&down)) => down,
        (None, None) => requested,
    }
}

/// Parse a free-form string (from CLI flags or blueprint config), applying
/// the same `max -> xhigh` alias as `ReasoningEffort::from_str`, then
/// normalize it against a model's supported set.
pub fn normalize_str(
    requested: &str,
    supported: &[ReasoningEffort],
) -> Result<ReasoningEffort, wf_store::models::ReasoningEffortParseError> {
    let parsed: ReasoningEffort = requested.parse()?;
    Ok(normalize(parsed, supported))
}
