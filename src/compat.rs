//! Spatial and temporal compatibility.
//!
//! Both sides are encoded as unit "amplitude" vectors and compared with the
//! squared inner product, so identical states score 1.0. A missing state on
//! either side scores 0.0: no planning signal is a penalty, not a shrug.

use std::f64::consts::TAU;

use crate::types::{EntityState, LocationState, TimingState};
use crate::vector::{dot, normalize_in_place};

const ENCODING_EPSILON: f64 = 1e-12;

pub fn location_compatibility(a: &LocationState, b: &LocationState) -> f64 {
    squared_overlap(encode_location(a), encode_location(b))
}

pub fn timing_compatibility(a: &TimingState, b: &TimingState) -> f64 {
    squared_overlap(encode_timing(a), encode_timing(b))
}

/// Mean user-vs-entity location compatibility over every non-user state.
pub fn batch_location_compatibility(user: &EntityState, states: &[EntityState]) -> f64 {
    batch_mean(states, |other| match (&user.location, &other.location) {
        (Some(u), Some(o)) => location_compatibility(u, o),
        _ => 0.0,
    })
}

/// Mean user-vs-entity timing compatibility over every non-user state.
pub fn batch_timing_compatibility(user: &EntityState, states: &[EntityState]) -> f64 {
    batch_mean(states, |other| match (&user.timing, &other.timing) {
        (Some(u), Some(o)) => timing_compatibility(u, o),
        _ => 0.0,
    })
}

fn batch_mean(states: &[EntityState], pairwise: impl Fn(&EntityState) -> f64) -> f64 {
    let values: Vec<f64> = states.iter().filter(|s| !s.is_user()).map(pairwise).collect();
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn encode_location(loc: &LocationState) -> Vec<f64> {
    let mut v = Vec::with_capacity(6);
    v.extend(amplitude(loc.lat_q));
    v.extend(amplitude(loc.lon_q));
    v.push(unit(loc.accessibility));
    v.push(unit(loc.vibe_match));
    v
}

fn encode_timing(timing: &TimingState) -> Vec<f64> {
    let mut v = Vec::with_capacity(10);
    v.extend(phase(timing.time_of_day));
    v.extend(phase(timing.day_of_week));
    v.extend(amplitude(timing.frequency));
    v.extend(amplitude(timing.duration));
    v.extend(amplitude(timing.vibe_match));
    v
}

/// `[sqrt(p), sqrt(1 - p)]`
fn amplitude(p: f64) -> [f64; 2] {
    let p = unit(p);
    [p.sqrt(), (1.0 - p).sqrt()]
}

/// Cyclic value on the unit circle; 0.0 and 1.0 coincide.
fn phase(p: f64) -> [f64; 2] {
    let angle = TAU * if p.is_finite() { p } else { 0.0 };
    [angle.cos(), angle.sin()]
}

fn unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn squared_overlap(mut a: Vec<f64>, mut b: Vec<f64>) -> f64 {
    let na = normalize_in_place(&mut a, ENCODING_EPSILON);
    let nb = normalize_in_place(&mut b, ENCODING_EPSILON);
    if na < ENCODING_EPSILON || nb < ENCODING_EPSILON {
        return 0.0;
    }
    let inner = dot(&a, &b);
    let value = inner * inner;
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
