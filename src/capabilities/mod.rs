//! Collaborators the engine consumes. Everything here is injected at
//! construction; optional ones are held as `Option<Arc<dyn _>>` by the engine.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::result::MatchingResult;
use crate::types::{Dimensions, EntityState, EntityType, Timestamp};

pub mod clock;
pub mod memory;

pub use clock::{FixedClock, SystemClock};
pub use memory::{
    InMemoryProfileStore, InMemoryStateCache, RecordingLearningSink, StaticConnectivity,
    StaticGeocoder,
};

/// Free-form context attached to a learning call (group session, venue, ...).
pub type LearningContext = BTreeMap<String, Value>;

/// Sole source of timestamps inside the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn personality(&self, entity_id: &str) -> anyhow::Result<Option<Dimensions>>;

    async fn vibe(&self, entity_id: &str) -> anyhow::Result<Option<Dimensions>>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolves an address to `(latitude, longitude)`.
    async fn resolve(&self, address: &str) -> anyhow::Result<Option<(f64, f64)>>;
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Deeper structural compatibility signal. `Ok(None)` means "nothing to say".
#[async_trait]
pub trait StructuralCompatibility: Send + Sync {
    async fn compute_bonus(
        &self,
        states: &[EntityState],
        target_time: Option<Timestamp>,
    ) -> anyhow::Result<Option<f64>>;
}

/// Receives successful matches. Called from detached tasks only.
#[async_trait]
pub trait LearningSink: Send + Sync {
    async fn learn(
        &self,
        agent_handle: String,
        result: MatchingResult,
        context: Option<LearningContext>,
        offline: bool,
    ) -> anyhow::Result<()>;
}

/// Previously converted entity states, used to answer requests while offline.
/// States are addressed by type and id; a user and a venue may share an id.
#[async_trait]
pub trait StateCache: Send + Sync {
    async fn cached_state(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> anyhow::Result<Option<EntityState>>;

    async fn store_state(&self, state: EntityState) -> anyhow::Result<()>;
}

pub trait PseudonymResolver: Send + Sync {
    fn agent_handle(&self, entity_id: &str) -> String;
}
