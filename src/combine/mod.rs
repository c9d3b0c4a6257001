//! Score combination rules: geometric-mean core factors gated by weighted
//! modifiers.

pub mod hybrid;
pub mod predictive;

pub use hybrid::{combine, combine_weighted, core_score, ModifierWeights};
pub use predictive::{
    interest_overlap, predictive_connection, presence_score, vibe_alignment, PredictiveWeights,
};

pub(crate) fn clamp_unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
