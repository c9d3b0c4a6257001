use tracing::warn;

use crate::entangle::{EntangledState, NORM_EPSILON};
use crate::types::EntityState;
use crate::vector::{normalize_in_place, normalized, VectorBasis};

/// Aggregates with uniform `1/N` coefficients.
pub fn aggregate(states: &[EntityState]) -> EntangledState {
    aggregate_with_relevance(states, None)
}

/// Builds the joint vector of a batch.
///
/// Each non-user state is vectorized in the batch [`VectorBasis`], normalized,
/// scaled by its coefficient and appended in batch order; the concatenation is
/// then normalized as a whole. With `M` non-user states the joint vector is
/// `M * basis.len()` long, so projection either compares it directly (`M = 1`)
/// or averages `M` equally sized chunks, which does not depend on the order of
/// the states.
///
/// `relevance` supplies one non-negative weight per state; it is rescaled to sum
/// to 1. A relevance signal that is unusable (wrong length, negative or
/// non-finite entries, all zero) is ignored in favor of `1/N`.
pub fn aggregate_with_relevance(states: &[EntityState], relevance: Option<&[f64]>) -> EntangledState {
    let basis = VectorBasis::from_states(states);
    let coefficients = coefficients_for(states.len(), relevance);

    let mut vector = Vec::with_capacity(basis.len() * states.len().saturating_sub(1));
    for (state, coefficient) in states.iter().zip(&coefficients) {
        if state.is_user() {
            continue;
        }
        let unit = normalized(&basis.vectorize(state), NORM_EPSILON);
        vector.extend(unit.into_iter().map(|x| x * coefficient));
    }
    normalize_in_place(&mut vector, NORM_EPSILON);

    EntangledState {
        vector,
        coefficients,
        basis,
    }
}

fn coefficients_for(n: usize, relevance: Option<&[f64]>) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let uniform = || vec![1.0 / n as f64; n];
    let Some(weights) = relevance else {
        return uniform();
    };
    let usable = weights.len() == n && weights.iter().all(|w| w.is_finite() && *w >= 0.0);
    let total: f64 = if usable { weights.iter().sum() } else { 0.0 };
    if !usable || total <= f64::EPSILON {
        warn!(
            expected = n,
            supplied = weights.len(),
            "ignoring unusable relevance weights; using uniform coefficients"
        );
        return uniform();
    }
    weights.iter().map(|w| w / total).collect()
}
