use serde::{Deserialize, Serialize};

use crate::combine::clamp_unit;
use crate::config::MatchingConfig;

/// Weights of the additive modifier; location and timing should sum to 1.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModifierWeights {
    pub location: f64,
    pub timing: f64,
}

impl Default for ModifierWeights {
    fn default() -> Self {
        Self {
            location: 0.6,
            timing: 0.4,
        }
    }
}

impl ModifierWeights {
    pub fn from_config(cfg: &MatchingConfig) -> Self {
        Self {
            location: cfg.location_weight,
            timing: cfg.timing_weight,
        }
    }

    pub fn modifier(&self, location: f64, timing: f64) -> f64 {
        self.location * clamp_unit(location) + self.timing * clamp_unit(timing)
    }
}

/// Geometric mean of the core factors. Any factor at or below zero (or not
/// finite) zeroes the core outright.
pub fn core_score(factors: &[f64]) -> f64 {
    if factors.is_empty() {
        return 0.0;
    }
    if factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
        return 0.0;
    }
    let product: f64 = factors.iter().map(|f| f.min(1.0)).product();
    clamp_unit(product.powf(1.0 / factors.len() as f64))
}

/// `clamp(core * (0.6 * location + 0.4 * timing))` with
/// `core = geomean([fidelity] + [structural_bonus])`.
pub fn combine(fidelity: f64, structural_bonus: Option<f64>, location: f64, timing: f64) -> f64 {
    combine_weighted(
        fidelity,
        structural_bonus,
        location,
        timing,
        ModifierWeights::default(),
    )
}

pub fn combine_weighted(
    fidelity: f64,
    structural_bonus: Option<f64>,
    location: f64,
    timing: f64,
    weights: ModifierWeights,
) -> f64 {
    let mut core_factors = vec![fidelity];
    core_factors.extend(structural_bonus);
    let core = core_score(&core_factors);
    clamp_unit(core * weights.modifier(location, timing))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_inputs_score_one() {
        assert!((combine(1.0, None, 1.0, 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_core_factor_zeroes_everything() {
        assert_eq!(combine(0.0, Some(0.9), 1.0, 1.0), 0.0);
        assert_eq!(combine(0.8, Some(0.0), 1.0, 1.0), 0.0);
        assert_eq!(combine(0.8, Some(-0.2), 1.0, 1.0), 0.0);
    }

    #[test]
    fn structural_bonus_enters_geometric_mean() {
        let fidelity: f64 = 0.64;
        let expected_core = (fidelity * 0.9).sqrt();
        let got = combine(fidelity, Some(0.9), 1.0, 1.0);
        assert!((got - expected_core).abs() < 1e-12);
    }

    #[test]
    fn modifiers_gate_the_core() {
        assert_eq!(combine(1.0, None, 0.0, 0.0), 0.0);
        assert!((combine(1.0, None, 0.0, 1.0) - 0.4).abs() < 1e-12);
        assert!((combine(1.0, None, 1.0, 0.0) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn custom_weights_apply() {
        let weights = ModifierWeights {
            location: 0.5,
            timing: 0.5,
        };
        assert!((combine_weighted(1.0, None, 1.0, 0.0, weights) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_inputs_stay_bounded() {
        let v = combine(1.5, Some(2.0), 3.0, f64::NAN);
        assert!((0.0..=1.0).contains(&v));
        assert_eq!(core_score(&[f64::NAN]), 0.0);
    }
}
