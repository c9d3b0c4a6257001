//! Match-time connection estimate.
//!
//! Same shape as the hybrid rule, but the second core factor is vibe
//! alignment and the modifier looks at which planning signals exist (not how
//! well they agree) plus how many of the user's interests the candidates
//! cover.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::combine::{clamp_unit, core_score};
use crate::config::MatchingConfig;
use crate::types::EntityState;
use crate::vector::{cosine_similarity, VectorBasis};

/// Ratio used when either side declares no interests.
const NEUTRAL_INTEREST_OVERLAP: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictiveWeights {
    pub presence: f64,
    pub interest: f64,
}

impl Default for PredictiveWeights {
    fn default() -> Self {
        Self {
            presence: 0.6,
            interest: 0.4,
        }
    }
}

impl PredictiveWeights {
    pub fn from_config(cfg: &MatchingConfig) -> Self {
        Self {
            presence: cfg.presence_weight,
            interest: cfg.interest_weight,
        }
    }
}

/// Mean cosine similarity between the user's vibe vector and each non-user
/// entity's, clamped to [0, 1].
pub fn vibe_alignment(user: &EntityState, states: &[EntityState]) -> f64 {
    let basis = VectorBasis::from_states(states);
    let user_vibe = basis.vibe_vector(user);
    let sims: Vec<f64> = states
        .iter()
        .filter(|s| !s.is_user())
        .map(|s| cosine_similarity(&basis.vibe_vector(s), &user_vibe))
        .collect();
    if sims.is_empty() {
        return 0.0;
    }
    clamp_unit(sims.iter().sum::<f64>() / sims.len() as f64)
}

/// Per entity: 0.5 if both sides carry a location, plus 0.5 if both carry a
/// timing; averaged over non-user entities.
pub fn presence_score(user: &EntityState, states: &[EntityState]) -> f64 {
    let flags: Vec<f64> = states
        .iter()
        .filter(|s| !s.is_user())
        .map(|s| {
            let mut v = 0.0;
            if user.location.is_some() && s.location.is_some() {
                v += 0.5;
            }
            if user.timing.is_some() && s.timing.is_some() {
                v += 0.5;
            }
            v
        })
        .collect();
    if flags.is_empty() {
        return 0.0;
    }
    flags.iter().sum::<f64>() / flags.len() as f64
}

/// Fraction of the user's interests that match a candidate category or tag.
pub fn interest_overlap(user: &EntityState, states: &[EntityState]) -> f64 {
    let interests: BTreeSet<String> = user.string_list("interests").into_iter().collect();
    let offered: BTreeSet<String> = states
        .iter()
        .filter(|s| !s.is_user())
        .flat_map(|s| {
            let mut terms = s.string_list("category");
            terms.extend(s.string_list("tags"));
            terms
        })
        .collect();
    if interests.is_empty() || offered.is_empty() {
        return NEUTRAL_INTEREST_OVERLAP;
    }
    let matched = interests.iter().filter(|i| offered.contains(*i)).count();
    matched as f64 / interests.len() as f64
}

pub fn predictive_connection(
    fidelity: f64,
    user: &EntityState,
    states: &[EntityState],
    weights: PredictiveWeights,
) -> f64 {
    let core = core_score(&[fidelity, vibe_alignment(user, states)]);
    let modifier = weights.presence * presence_score(user, states)
        + weights.interest * interest_overlap(user, states);
    clamp_unit(core * modifier)
}
