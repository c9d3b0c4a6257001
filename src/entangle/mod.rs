//! Joint ("entangled") representation of a scoring batch and its projection
//! back onto the querying user's basis.

pub mod aggregator;
pub mod fidelity;

use serde::{Deserialize, Serialize};

use crate::vector::VectorBasis;

pub use aggregator::{aggregate, aggregate_with_relevance};
pub use fidelity::{project_fidelity, project_fidelity_with, Fidelity, ProjectionPath};

/// Norm below which a projected vector is left unnormalized.
pub const NORM_EPSILON: f64 = 1e-4;

/// Call-scoped joint representation; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntangledState {
    /// Coefficient-weighted concatenation of the non-user entity vectors, L2-normalized.
    pub vector: Vec<f64>,
    /// One entry per state in the batch (user included), in batch order.
    /// `coefficients[i]^2` is treated as entity `i`'s probability-like weight.
    pub coefficients: Vec<f64>,
    /// Layout every vector in this batch was built with.
    pub basis: VectorBasis,
}
