//! Projection of a joint vector onto the querying user's basis.
//!
//! Fidelity is `|<projected|user>|^2`. Direct and chunked projection are tried
//! first; whenever they report a [`ProjectionError`] the projector degrades to
//! coefficient-weighted pairwise cosine similarity instead of failing.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::entangle::{EntangledState, NORM_EPSILON};
use crate::error::ProjectionError;
use crate::types::EntityState;
use crate::vector::{cosine_similarity, dot, normalize_in_place, normalized};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionPath {
    /// Joint and user vectors had the same length.
    Direct,
    /// Joint vector was a whole multiple of the user length; chunks averaged.
    Chunked,
    /// Joint vector was longer but not a multiple; leading slice kept.
    Truncated,
    /// Coefficient-weighted (or unweighted) pairwise cosine similarity.
    Pairwise,
    /// Nothing to compare against.
    Neutral,
}

impl ProjectionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectionPath::Direct => "direct",
            ProjectionPath::Chunked => "chunked",
            ProjectionPath::Truncated => "truncated",
            ProjectionPath::Pairwise => "pairwise",
            ProjectionPath::Neutral => "neutral",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fidelity {
    pub value: f64,
    pub path: ProjectionPath,
}

const NEUTRAL_FIDELITY: f64 = 0.5;

pub fn project_fidelity(
    entangled: &EntangledState,
    user_state: &EntityState,
    all_states: &[EntityState],
) -> Fidelity {
    project_fidelity_with(entangled, user_state, all_states, NORM_EPSILON)
}

pub fn project_fidelity_with(
    entangled: &EntangledState,
    user_state: &EntityState,
    all_states: &[EntityState],
    norm_epsilon: f64,
) -> Fidelity {
    let user = normalized(&entangled.basis.vectorize(user_state), norm_epsilon);
    match project_onto(&entangled.vector, &user, norm_epsilon) {
        Ok(fidelity) => fidelity,
        Err(err) => {
            debug!(error = %err, "projection not well-defined; using pairwise similarity");
            pairwise_fidelity(entangled, user_state, all_states)
        }
    }
}

/// Direct, chunked or truncated projection of `joint` onto `user`.
pub fn project_onto(joint: &[f64], user: &[f64], norm_epsilon: f64) -> Result<Fidelity, ProjectionError> {
    let dim = user.len();
    if dim == 0 {
        return Err(ProjectionError::Empty);
    }
    let (projected, path) = match joint.len().cmp(&dim) {
        Ordering::Equal => (joint.to_vec(), ProjectionPath::Direct),
        Ordering::Greater if joint.len() % dim == 0 => {
            let mut avg = chunk_average(joint, dim);
            normalize_in_place(&mut avg, norm_epsilon);
            (avg, ProjectionPath::Chunked)
        }
        Ordering::Greater => {
            let mut head = joint[..dim].to_vec();
            normalize_in_place(&mut head, norm_epsilon);
            (head, ProjectionPath::Truncated)
        }
        Ordering::Less => {
            return Err(ProjectionError::Shorter {
                joint: joint.len(),
                user: dim,
            })
        }
    };

    let inner = dot(&projected, user);
    let value = inner * inner;
    if !value.is_finite() {
        return Err(ProjectionError::NonFinite);
    }
    Ok(Fidelity {
        value: value.clamp(0.0, 1.0),
        path,
    })
}

/// Element-wise mean of the consecutive `dim`-sized chunks of `joint`.
/// Trailing elements that do not fill a whole chunk are ignored.
pub fn chunk_average(joint: &[f64], dim: usize) -> Vec<f64> {
    let mut out = vec![0.0; dim];
    if dim == 0 {
        return out;
    }
    let chunks = joint.len() / dim;
    if chunks == 0 {
        return out;
    }
    for chunk in joint.chunks_exact(dim) {
        for (acc, x) in out.iter_mut().zip(chunk) {
            *acc += x;
        }
    }
    for acc in out.iter_mut() {
        *acc /= chunks as f64;
    }
    out
}

/// Weighted mean of user-vs-entity cosine similarity, weights `coefficients[i]^2`.
/// Falls back to the unweighted mean when the weights vanish, and to a neutral
/// 0.5 when there is no non-user entity at all.
fn pairwise_fidelity(
    entangled: &EntangledState,
    user_state: &EntityState,
    all_states: &[EntityState],
) -> Fidelity {
    let basis = &entangled.basis;
    let user = basis.vectorize(user_state);

    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    let mut similarities = Vec::new();
    for (i, state) in all_states.iter().enumerate() {
        if state.is_user() {
            continue;
        }
        let similarity = cosine_similarity(&basis.vectorize(state), &user);
        let c = entangled.coefficients.get(i).copied().unwrap_or(0.0);
        let w = c * c;
        if w.is_finite() {
            weighted += w * similarity;
            weight_sum += w;
        }
        similarities.push(similarity);
    }

    if similarities.is_empty() {
        return Fidelity {
            value: NEUTRAL_FIDELITY,
            path: ProjectionPath::Neutral,
        };
    }
    let value = if weight_sum > 1e-12 {
        weighted / weight_sum
    } else {
        similarities.iter().sum::<f64>() / similarities.len() as f64
    };
    Fidelity {
        value: if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 },
        path: ProjectionPath::Pairwise,
    }
}
