//! In-memory collaborators. They own their own synchronization so the engine
//! never has to.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::capabilities::{
    ConnectivityProbe, Geocoder, LearningContext, LearningSink, ProfileStore, StateCache,
};
use crate::result::MatchingResult;
use crate::types::{Dimensions, EntityState, EntityType};

#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    personality: DashMap<String, Dimensions>,
    vibe: DashMap<String, Dimensions>,
    unavailable: DashSet<String>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_personality(&self, entity_id: impl Into<String>, dims: Dimensions) {
        self.personality.insert(entity_id.into(), dims);
    }

    pub fn insert_vibe(&self, entity_id: impl Into<String>, dims: Dimensions) {
        self.vibe.insert(entity_id.into(), dims);
    }

    /// Every read for `entity_id` fails from now on.
    pub fn mark_unavailable(&self, entity_id: impl Into<String>) {
        self.unavailable.insert(entity_id.into());
    }

    fn check(&self, entity_id: &str) -> anyhow::Result<()> {
        if self.unavailable.contains(entity_id) {
            anyhow::bail!("profile store unavailable for {entity_id}");
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn personality(&self, entity_id: &str) -> anyhow::Result<Option<Dimensions>> {
        self.check(entity_id)?;
        Ok(self.personality.get(entity_id).map(|d| d.value().clone()))
    }

    async fn vibe(&self, entity_id: &str) -> anyhow::Result<Option<Dimensions>> {
        self.check(entity_id)?;
        Ok(self.vibe.get(entity_id).map(|d| d.value().clone()))
    }
}

/// Address lookup table. Keys are matched case-insensitively.
#[derive(Debug, Default)]
pub struct StaticGeocoder {
    entries: DashMap<String, (f64, f64)>,
    failing: DashSet<String>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, address: &str, lat: f64, lon: f64) {
        self.entries.insert(normalize_address(address), (lat, lon));
    }

    pub fn fail_on(&self, address: &str) {
        self.failing.insert(normalize_address(address));
    }
}

fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn resolve(&self, address: &str) -> anyhow::Result<Option<(f64, f64)>> {
        let key = normalize_address(address);
        if self.failing.contains(&key) {
            anyhow::bail!("geocoder rejected {address:?}");
        }
        Ok(self.entries.get(&key).map(|v| *v.value()))
    }
}

/// Connectivity flag flipped by the host application. Counts probes.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
    probes: AtomicUsize,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStateCache {
    states: DashMap<(EntityType, String), EntityState>,
}

impl InMemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn contains(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.states.contains_key(&(entity_type, entity_id.to_string()))
    }
}

#[async_trait]
impl StateCache for InMemoryStateCache {
    async fn cached_state(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> anyhow::Result<Option<EntityState>> {
        let key = (entity_type, entity_id.to_string());
        Ok(self.states.get(&key).map(|s| s.value().clone()))
    }

    async fn store_state(&self, state: EntityState) -> anyhow::Result<()> {
        self.states
            .insert((state.entity_type, state.entity_id.clone()), state);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct LearningCall {
    pub agent_handle: String,
    pub compatibility: f64,
    pub context: Option<LearningContext>,
    pub offline: bool,
}

/// Learning sink that keeps every call for later inspection.
#[derive(Debug, Default)]
pub struct RecordingLearningSink {
    calls: Mutex<Vec<LearningCall>>,
    fail: AtomicBool,
}

impl RecordingLearningSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `learn` call fail after recording it.
    pub fn fail_calls(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LearningCall> {
        self.calls.lock().clone()
    }

    /// Polls until at least `count` calls arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<LearningCall> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let calls = self.calls();
            if calls.len() >= count || tokio::time::Instant::now() >= deadline {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl LearningSink for RecordingLearningSink {
    async fn learn(
        &self,
        agent_handle: String,
        result: MatchingResult,
        context: Option<LearningContext>,
        offline: bool,
    ) -> anyhow::Result<()> {
        self.calls.lock().push(LearningCall {
            agent_handle,
            compatibility: result.compatibility,
            context,
            offline,
        });
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("learning backend rejected the update");
        }
        Ok(())
    }
}
