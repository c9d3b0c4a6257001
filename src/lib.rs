//! Multi-entity compatibility scoring.
//!
//! Heterogeneous entities (users, events, venues) are converted into entity
//! states, aggregated into one joint ("entangled") vector and projected back
//! onto the querying user to get a bounded fidelity. Fidelity and an optional
//! structural bonus form the geometric-mean core; location and timing
//! compatibility gate it. Scoring works online and, from cached states,
//! offline; learning feedback and audit writes never block the caller.

pub mod audit;
mod background;
pub mod capabilities;
pub mod combine;
pub mod compat;
pub mod config;
pub mod convert;
pub mod engine;
pub mod entangle;
pub mod error;
mod group;
pub mod privacy;
pub mod result;
pub mod stats;
pub mod types;
pub mod vector;

pub use crate::config::{load_config, ConfigError, MatchingConfig};
pub use crate::engine::{Connectivity, MatchingEngine, MatchingEngineBuilder};
pub use crate::error::{ConversionError, FailureKind, MatchingError, ProjectionError};
pub use crate::result::{GroupMatchResult, MatchingResult};
pub use crate::types::{
    Entity, EntityState, EntityType, EventRecord, GroupSession, UserRecord, VenueRecord,
};
