#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use entangled_matching::audit::MemoryAuditSink;
use entangled_matching::capabilities::{
    FixedClock, Geocoder, InMemoryProfileStore, InMemoryStateCache, ProfileStore,
    RecordingLearningSink, StaticConnectivity, StaticGeocoder, StructuralCompatibility,
};
use entangled_matching::privacy::Blake3PseudonymResolver;
use entangled_matching::types::{Dimensions, EntityState, Timestamp, TimingPreference};
use entangled_matching::{
    EventRecord, MatchingEngine, MatchingEngineBuilder, UserRecord, VenueRecord,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const HALL: (&str, f64, f64) = ("main hall", 40.0, -74.0);

pub fn dims(pairs: &[(&str, f64)]) -> Dimensions {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

pub fn now() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 0).unwrap()
}

/// Wednesday 18:00 UTC.
pub fn wednesday_evening() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 10, 14, 18, 0, 0).unwrap()
}

/// Profile store that counts reads.
#[derive(Default)]
pub struct CountingProfiles {
    pub inner: InMemoryProfileStore,
    reads: AtomicUsize,
}

impl CountingProfiles {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for CountingProfiles {
    async fn personality(&self, entity_id: &str) -> anyhow::Result<Option<Dimensions>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.personality(entity_id).await
    }

    async fn vibe(&self, entity_id: &str) -> anyhow::Result<Option<Dimensions>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.vibe(entity_id).await
    }
}

/// Geocoder that counts lookups.
#[derive(Default)]
pub struct CountingGeocoder {
    pub inner: StaticGeocoder,
    lookups: AtomicUsize,
}

impl CountingGeocoder {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for CountingGeocoder {
    async fn resolve(&self, address: &str) -> anyhow::Result<Option<(f64, f64)>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(address).await
    }
}

/// Structural collaborator returning a fixed answer.
pub struct FixedStructure {
    bonus: Result<Option<f64>, String>,
    calls: AtomicUsize,
    last_target: Mutex<Option<Timestamp>>,
}

impl FixedStructure {
    pub fn returning(bonus: f64) -> Self {
        Self::with(Ok(Some(bonus)))
    }

    pub fn failing() -> Self {
        Self::with(Err("graph service timed out".into()))
    }

    fn with(bonus: Result<Option<f64>, String>) -> Self {
        Self {
            bonus,
            calls: AtomicUsize::new(0),
            last_target: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_target(&self) -> Option<Timestamp> {
        *self.last_target.lock()
    }
}

#[async_trait]
impl StructuralCompatibility for FixedStructure {
    async fn compute_bonus(
        &self,
        _states: &[EntityState],
        target_time: Option<Timestamp>,
    ) -> anyhow::Result<Option<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_target.lock() = target_time;
        match &self.bonus {
            Ok(bonus) => Ok(*bonus),
            Err(msg) => Err(anyhow::anyhow!(msg.clone())),
        }
    }
}

pub struct Harness {
    pub engine: MatchingEngine,
    pub clock: Arc<FixedClock>,
    pub profiles: Arc<CountingProfiles>,
    pub geocoder: Arc<CountingGeocoder>,
    pub connectivity: Arc<StaticConnectivity>,
    pub learning: Arc<RecordingLearningSink>,
    pub cache: Arc<InMemoryStateCache>,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    /// Online engine with learning, audit and a state cache attached.
    pub fn new() -> Self {
        Self::configured(true, true, |b| b)
    }

    pub fn configured(
        online: bool,
        with_cache: bool,
        configure: impl FnOnce(MatchingEngineBuilder) -> MatchingEngineBuilder,
    ) -> Self {
        let clock = Arc::new(FixedClock::new(now()));
        let profiles = Arc::new(CountingProfiles::default());
        let geocoder = Arc::new(CountingGeocoder::default());
        geocoder.inner.insert(HALL.0, HALL.1, HALL.2);
        let connectivity = Arc::new(StaticConnectivity::new(online));
        let learning = Arc::new(RecordingLearningSink::new());
        let cache = Arc::new(InMemoryStateCache::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let mut builder = MatchingEngine::builder(
            clock.clone(),
            profiles.clone(),
            geocoder.clone(),
            connectivity.clone(),
            Arc::new(Blake3PseudonymResolver::from_secret("integration")),
        )
        .learning(learning.clone())
        .audit(audit.clone());
        if with_cache {
            builder = builder.state_cache(cache.clone());
        }
        let engine = configure(builder).build().unwrap();

        Self {
            engine,
            clock,
            profiles,
            geocoder,
            connectivity,
            learning,
            cache,
            audit,
        }
    }

    pub async fn wait_for_cache(&self, count: usize) {
        for _ in 0..200 {
            if self.cache.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("cache never reached {count} states");
    }

    pub async fn wait_for_audit(&self, kind: &str, count: usize) {
        for _ in 0..200 {
            if self.audit.count(kind) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("never saw {count} {kind} audit events");
    }
}

/// User who likes Wednesday evenings at the main hall.
pub fn evening_user(id: &str) -> UserRecord {
    UserRecord {
        id: id.into(),
        display_name: Some("Ada".into()),
        location: Some(HALL.0.into()),
        timing_preference: Some(TimingPreference {
            preferred_hour: 18,
            preferred_weekday: 2,
            frequency: 0.0,
            duration_minutes: Some(120),
        }),
        interests: vec!["jazz".into()],
    }
}

/// One-off two-hour event at the main hall on Wednesday evening.
pub fn hall_event(id: &str, host_id: &str) -> EventRecord {
    EventRecord {
        id: id.into(),
        host_id: host_id.into(),
        title: "Late set".into(),
        category: "jazz".into(),
        tags: vec!["live".into()],
        location: Some(HALL.0.into()),
        starts_at: Some(wednesday_evening()),
        duration_minutes: Some(120),
        recurring: false,
    }
}

pub fn hall_venue(id: &str, vibe: Dimensions) -> VenueRecord {
    VenueRecord {
        id: id.into(),
        name: format!("Venue {id}"),
        category: "bar".into(),
        tags: vec!["cocktails".into()],
        address: None,
        coordinates: Some((HALL.1, HALL.2)),
        accessibility: None,
        vibe: Some(vibe),
    }
}
