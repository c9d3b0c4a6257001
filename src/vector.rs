//! Flat vector layout for entity states and the small linear-algebra kit used
//! by aggregation and projection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{Dimensions, EntityState};

/// Dimension layout shared by every vector in one scoring call.
///
/// The layout is the lexicographically sorted union of personality keys across
/// the batch, followed by the sorted union of vibe keys. Sorting makes the
/// layout independent of input order and of map iteration order; a key an
/// entity does not carry contributes `0.0`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorBasis {
    pub personality_keys: Vec<String>,
    pub vibe_keys: Vec<String>,
}

impl VectorBasis {
    pub fn from_states(states: &[EntityState]) -> Self {
        let personality: BTreeSet<&String> = states
            .iter()
            .flat_map(|s| s.personality_dimensions.keys())
            .collect();
        let vibe: BTreeSet<&String> = states.iter().flat_map(|s| s.vibe_dimensions.keys()).collect();
        Self {
            personality_keys: personality.into_iter().cloned().collect(),
            vibe_keys: vibe.into_iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.personality_keys.len() + self.vibe_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw (unnormalized) vector of `state` in this layout.
    pub fn vectorize(&self, state: &EntityState) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(lookup(&self.personality_keys, &state.personality_dimensions));
        out.extend(lookup(&self.vibe_keys, &state.vibe_dimensions));
        out
    }

    /// Vibe block only, used by the predictive scorer.
    pub fn vibe_vector(&self, state: &EntityState) -> Vec<f64> {
        lookup(&self.vibe_keys, &state.vibe_dimensions).collect()
    }
}

fn lookup<'a>(keys: &'a [String], dims: &'a Dimensions) -> impl Iterator<Item = f64> + 'a {
    keys.iter().map(move |k| {
        dims.get(k)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    })
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// L2-normalizes in place unless the norm is below `epsilon`. Returns the norm.
pub fn normalize_in_place(v: &mut [f64], epsilon: f64) -> f64 {
    let n = norm(v);
    if n >= epsilon {
        for x in v.iter_mut() {
            *x /= n;
        }
    }
    n
}

pub fn normalized(v: &[f64], epsilon: f64) -> Vec<f64> {
    let mut out = v.to_vec();
    normalize_in_place(&mut out, epsilon);
    out
}

/// Cosine similarity in [-1, 1]; `0.0` when either side is (near) zero or the
/// lengths differ.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let na = norm(a);
    let nb = norm(b);
    if na <= f64::EPSILON || nb <= f64::EPSILON {
        return 0.0;
    }
    (dot(a, b) / (na * nb)).clamp(-1.0, 1.0)
}
