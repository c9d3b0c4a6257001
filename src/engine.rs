//! Connectivity-aware scoring entry point.
//!
//! Every call probes connectivity afresh. Online calls convert the records,
//! run the full pipeline and may refresh the offline cache; offline calls
//! answer from cached states only and never touch the network collaborators.
//! Learning, cache refresh and audit writes are detached tasks.

use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditSink, NoopAuditSink};
use crate::background::{emit_audit, spawn_detached};
use crate::capabilities::{
    Clock, ConnectivityProbe, Geocoder, LearningContext, LearningSink, ProfileStore,
    PseudonymResolver, StateCache, StructuralCompatibility,
};
use crate::combine::{combine_weighted, predictive_connection, ModifierWeights, PredictiveWeights};
use crate::compat::{batch_location_compatibility, batch_timing_compatibility};
use crate::config::{ConfigError, MatchingConfig};
use crate::convert::EntityStateConverter;
use crate::entangle::{aggregate, project_fidelity_with};
use crate::error::{ConversionError, MatchingError};
use crate::privacy::seal_result;
use crate::result::MatchingResult;
use crate::types::{Entity, EntityState, EntityType, UserRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_offline(self) -> bool {
        self == Connectivity::Offline
    }
}

/// Batch of states ready for scoring; the user state always comes first.
pub(crate) struct PreparedBatch {
    pub(crate) states: Vec<EntityState>,
    pub(crate) skipped: usize,
}

pub struct MatchingEngine {
    pub(crate) cfg: MatchingConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) converter: EntityStateConverter,
    pub(crate) connectivity: Arc<dyn ConnectivityProbe>,
    pub(crate) resolver: Arc<dyn PseudonymResolver>,
    pub(crate) structural: Option<Arc<dyn StructuralCompatibility>>,
    pub(crate) learning: Option<Arc<dyn LearningSink>>,
    pub(crate) cache: Option<Arc<dyn StateCache>>,
    pub(crate) audit: Arc<dyn AuditSink>,
}

pub struct MatchingEngineBuilder {
    cfg: MatchingConfig,
    clock: Arc<dyn Clock>,
    profiles: Arc<dyn ProfileStore>,
    geocoder: Arc<dyn Geocoder>,
    connectivity: Arc<dyn ConnectivityProbe>,
    resolver: Arc<dyn PseudonymResolver>,
    structural: Option<Arc<dyn StructuralCompatibility>>,
    learning: Option<Arc<dyn LearningSink>>,
    cache: Option<Arc<dyn StateCache>>,
    audit: Arc<dyn AuditSink>,
}

impl MatchingEngineBuilder {
    pub fn config(mut self, cfg: MatchingConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn structural(mut self, service: Arc<dyn StructuralCompatibility>) -> Self {
        self.structural = Some(service);
        self
    }

    pub fn learning(mut self, sink: Arc<dyn LearningSink>) -> Self {
        self.learning = Some(sink);
        self
    }

    pub fn state_cache(mut self, cache: Arc<dyn StateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn build(self) -> Result<MatchingEngine, ConfigError> {
        self.cfg.validate()?;
        let converter = EntityStateConverter::new(
            self.profiles,
            self.geocoder,
            Arc::clone(&self.clock),
            &self.cfg,
        );
        Ok(MatchingEngine {
            cfg: self.cfg,
            clock: self.clock,
            converter,
            connectivity: self.connectivity,
            resolver: self.resolver,
            structural: self.structural,
            learning: self.learning,
            cache: self.cache,
            audit: self.audit,
        })
    }
}

impl MatchingEngine {
    /// Starts a builder with the mandatory collaborators; the optional ones
    /// (structural service, learning sink, state cache, audit sink) are absent
    /// until set.
    pub fn builder(
        clock: Arc<dyn Clock>,
        profiles: Arc<dyn ProfileStore>,
        geocoder: Arc<dyn Geocoder>,
        connectivity: Arc<dyn ConnectivityProbe>,
        resolver: Arc<dyn PseudonymResolver>,
    ) -> MatchingEngineBuilder {
        MatchingEngineBuilder {
            cfg: MatchingConfig::default(),
            clock,
            profiles,
            geocoder,
            connectivity,
            resolver,
            structural: None,
            learning: None,
            cache: None,
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.cfg
    }

    /// Scores `entities` (events and venues) against `user`.
    pub async fn score(
        &self,
        user: &UserRecord,
        entities: Vec<Entity>,
    ) -> Result<MatchingResult, MatchingError> {
        match self.score_inner(user, &entities).await {
            Ok(result) => {
                self.after_score(&result);
                Ok(result)
            }
            Err(err) => {
                self.record_failure("score", &err);
                Err(err)
            }
        }
    }

    async fn score_inner(
        &self,
        user: &UserRecord,
        entities: &[Entity],
    ) -> Result<MatchingResult, MatchingError> {
        self.validate_request(user, entities)?;
        let mode = self.probe().await;
        let batch = match mode {
            Connectivity::Online => self.prepare_online(user, entities).await?,
            Connectivity::Offline => self.prepare_offline(&user.id, entities).await?,
        };
        self.evaluate(&user.id, batch, mode).await
    }

    fn validate_request(&self, user: &UserRecord, entities: &[Entity]) -> Result<(), MatchingError> {
        if user.id.trim().is_empty() {
            return Err(MatchingError::Validation("user id is empty".into()));
        }
        if entities.is_empty() {
            return Err(MatchingError::Validation("entity list is empty".into()));
        }
        if entities.len() > self.cfg.max_entities {
            return Err(MatchingError::Validation(format!(
                "{} entities exceed the limit of {}",
                entities.len(),
                self.cfg.max_entities
            )));
        }
        if entities.iter().any(|e| matches!(e, Entity::User(_))) {
            return Err(MatchingError::Validation(
                "candidate entities must not include users".into(),
            ));
        }
        Ok(())
    }

    pub(crate) async fn probe(&self) -> Connectivity {
        if self.connectivity.is_online().await {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    /// Converts the user (hard failure) and every candidate concurrently
    /// (failures skipped). Refreshes the offline cache in the background.
    pub(crate) async fn prepare_online(
        &self,
        user: &UserRecord,
        entities: &[Entity],
    ) -> Result<PreparedBatch, MatchingError> {
        let user_state = self.converter.convert_user(user).await?;
        let candidates = self.convert_candidates(entities).await;
        if candidates.is_empty() {
            return Err(ConversionError::NoSurvivors {
                attempted: entities.len(),
            }
            .into());
        }
        let skipped = entities.len() - candidates.len();

        let mut states = Vec::with_capacity(candidates.len() + 1);
        states.push(user_state);
        states.extend(candidates);
        self.refresh_cache(&states);
        Ok(PreparedBatch { states, skipped })
    }

    pub(crate) async fn convert_candidates(&self, entities: &[Entity]) -> Vec<EntityState> {
        let outcomes = join_all(entities.iter().map(|e| self.converter.convert(e))).await;
        let mut states = Vec::with_capacity(entities.len());
        for (entity, outcome) in entities.iter().zip(outcomes) {
            match outcome {
                Ok(state) => states.push(state),
                Err(err) => {
                    warn!(
                        entity_id = %entity.id(),
                        entity_type = entity.entity_type().as_str(),
                        error = %err,
                        "skipping entity that could not be converted"
                    );
                    emit_audit(
                        &self.audit,
                        AuditEvent::entity_skipped(
                            self.clock.now(),
                            entity.id(),
                            entity.entity_type(),
                            err.to_string(),
                        ),
                    );
                }
            }
        }
        states
    }

    pub(crate) fn refresh_cache(&self, states: &[EntityState]) {
        if !self.cfg.refresh_cache {
            return;
        }
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let states = states.to_vec();
        spawn_detached("cache_refresh", async move {
            for state in states {
                cache.store_state(state).await?;
            }
            Ok(())
        });
    }

    /// Resolves the user and candidates from the state cache only.
    pub(crate) async fn prepare_offline(
        &self,
        user_id: &str,
        entities: &[Entity],
    ) -> Result<PreparedBatch, MatchingError> {
        let Some(user_state) = self.cached(EntityType::User, user_id).await else {
            debug!("offline and the user has no cached state");
            return Err(MatchingError::OfflineUnavailable);
        };
        let candidates = self.cached_candidates(entities).await;
        if candidates.is_empty() {
            debug!(requested = entities.len(), "offline and no candidate has a cached state");
            return Err(MatchingError::OfflineUnavailable);
        }
        let skipped = entities.len() - candidates.len();

        let mut states = Vec::with_capacity(candidates.len() + 1);
        states.push(user_state);
        states.extend(candidates);
        Ok(PreparedBatch { states, skipped })
    }

    pub(crate) async fn cached_candidates(&self, entities: &[Entity]) -> Vec<EntityState> {
        let mut states = Vec::with_capacity(entities.len());
        for entity in entities {
            match self.cached(entity.entity_type(), entity.id()).await {
                Some(state) => states.push(state),
                None => debug!(entity_id = %entity.id(), "no usable cached state; skipping"),
            }
        }
        states
    }

    pub(crate) async fn cached(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Option<EntityState> {
        let cache = self.cache.as_ref()?;
        match cache.cached_state(entity_type, entity_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(entity_id, error = %e, "state cache lookup failed");
                None
            }
        }
    }

    /// Runs aggregation, projection and combination over a prepared batch and
    /// seals the result under the user's agent handle.
    pub(crate) async fn evaluate(
        &self,
        user_id: &str,
        batch: PreparedBatch,
        mode: Connectivity,
    ) -> Result<MatchingResult, MatchingError> {
        let PreparedBatch { states, skipped } = batch;
        let Some(user_state) = states.first() else {
            return Err(MatchingError::Computation("empty batch".into()));
        };

        let entangled = aggregate(&states);
        let fidelity = project_fidelity_with(&entangled, user_state, &states, self.cfg.norm_epsilon);
        let location = batch_location_compatibility(user_state, &states);
        let timing = batch_timing_compatibility(user_state, &states);
        let structural_bonus = match mode {
            Connectivity::Online => self.structural_bonus(&states).await,
            Connectivity::Offline => None,
        };
        let compatibility = combine_weighted(
            fidelity.value,
            structural_bonus,
            location,
            timing,
            ModifierWeights::from_config(&self.cfg),
        );
        let predictive = self.cfg.predictive_enabled.then(|| {
            predictive_connection(
                fidelity.value,
                user_state,
                &states,
                PredictiveWeights::from_config(&self.cfg),
            )
        });

        let subscores = [Some(compatibility), Some(fidelity.value), Some(location), Some(timing), predictive];
        if subscores.iter().flatten().any(|v| !v.is_finite()) {
            return Err(MatchingError::Computation(
                "scoring produced a non-finite value".into(),
            ));
        }

        let timestamp = states
            .iter()
            .map(|s| s.observed_at)
            .max()
            .unwrap_or_else(|| self.clock.now());
        let metadata = BTreeMap::from([
            ("entity_count".to_string(), json!(states.len())),
            ("structural_bonus_applied".to_string(), json!(structural_bonus.is_some())),
            ("predictive_applied".to_string(), json!(predictive.is_some())),
            ("offline".to_string(), json!(mode.is_offline())),
            ("skipped_entities".to_string(), json!(skipped)),
            ("fidelity_path".to_string(), Value::String(fidelity.path.as_str().into())),
        ]);

        let mut result = MatchingResult {
            compatibility,
            fidelity: fidelity.value,
            structural_bonus,
            location_compat: location,
            timing_compat: timing,
            predictive_connection: predictive,
            entities: states,
            timestamp,
            metadata,
        };
        seal_result(&mut result, user_id, self.resolver.as_ref());
        Ok(result)
    }

    /// Asks the structural collaborator, if any. Failures and non-finite values
    /// mean "not evaluated".
    async fn structural_bonus(&self, states: &[EntityState]) -> Option<f64> {
        let service = self.structural.as_ref()?;
        let target_time = states.iter().filter_map(EntityState::scheduled_start).min();
        match service.compute_bonus(states, target_time).await {
            Ok(Some(bonus)) if bonus.is_finite() => Some(bonus.clamp(0.0, 1.0)),
            Ok(Some(bonus)) => {
                warn!(bonus, "ignoring non-finite structural bonus");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "structural compatibility failed; scoring without bonus");
                None
            }
        }
    }

    fn after_score(&self, result: &MatchingResult) {
        let handle = result.agent_handle().unwrap_or_default().to_string();
        let offline = result.is_offline();
        let path = result
            .metadata
            .get("fidelity_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!(
            agent_handle = %handle,
            compatibility = result.compatibility,
            entities = result.entities.len(),
            offline,
            "scored entities"
        );
        emit_audit(
            &self.audit,
            AuditEvent::scored(
                self.clock.now(),
                handle.clone(),
                result.entities.len(),
                result.compatibility,
                offline,
                path,
            ),
        );
        if result.compatibility >= self.cfg.learning_threshold {
            self.learn(handle, result.clone(), None, offline);
        }
    }

    /// Fire-and-forget learning call keyed by the agent handle.
    pub(crate) fn learn(
        &self,
        agent_handle: String,
        result: MatchingResult,
        context: Option<LearningContext>,
        offline: bool,
    ) {
        let Some(sink) = self.learning.clone() else {
            return;
        };
        spawn_detached("learning", async move {
            sink.learn(agent_handle, result, context, offline).await
        });
    }

    pub(crate) fn record_failure(&self, operation: &'static str, err: &MatchingError) {
        match err {
            MatchingError::Validation(_) | MatchingError::OfflineUnavailable => {
                debug!(operation, kind = err.label(), error = %err, "matching request rejected")
            }
            _ => warn!(operation, kind = err.label(), error = %err, "matching failed"),
        }
        emit_audit(
            &self.audit,
            AuditEvent::failed(self.clock.now(), operation, err.label(), err.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        FixedClock, InMemoryProfileStore, InMemoryStateCache, StaticConnectivity, StaticGeocoder,
    };
    use crate::privacy::Blake3PseudonymResolver;
    use crate::types::{EventRecord, VenueRecord};
    use chrono::{TimeZone, Utc};

    fn engine(online: bool) -> (MatchingEngine, Arc<InMemoryProfileStore>) {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let engine = MatchingEngine::builder(
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap())),
            profiles.clone(),
            Arc::new(StaticGeocoder::new()),
            Arc::new(StaticConnectivity::new(online)),
            Arc::new(Blake3PseudonymResolver::from_secret("unit")),
        )
        .state_cache(Arc::new(InMemoryStateCache::new()))
        .build()
        .unwrap();
        (engine, profiles)
    }

    fn user(id: &str) -> UserRecord {
        UserRecord {
            id: id.into(),
            ..UserRecord::default()
        }
    }

    #[tokio::test]
    async fn rejects_malformed_requests() {
        let (engine, _) = engine(true);
        let venue = Entity::Venue(VenueRecord {
            id: "v".into(),
            ..VenueRecord::default()
        });

        let err = engine.score(&user("u"), vec![]).await.unwrap_err();
        assert!(matches!(err, MatchingError::Validation(_)));

        let err = engine.score(&user(" "), vec![venue.clone()]).await.unwrap_err();
        assert!(matches!(err, MatchingError::Validation(_)));

        let err = engine
            .score(&user("u"), vec![venue, Entity::User(user("other"))])
            .await
            .unwrap_err();
        assert!(matches!(err, MatchingError::Validation(_)));
    }

    #[tokio::test]
    async fn all_candidates_failing_is_a_conversion_error() {
        let (engine, _) = engine(true);
        let nameless = Entity::Event(EventRecord::default());
        let err = engine.score(&user("u"), vec![nameless]).await.unwrap_err();
        assert!(matches!(
            err,
            MatchingError::Conversion(ConversionError::NoSurvivors { attempted: 1 })
        ));
    }

    #[tokio::test]
    async fn result_is_sealed_under_agent_handle() {
        let (engine, profiles) = engine(true);
        profiles.insert_personality("u", [("a".to_string(), 1.0)].into());
        let venue = Entity::Venue(VenueRecord {
            id: "v".into(),
            vibe: Some([("a".to_string(), 1.0)].into()),
            ..VenueRecord::default()
        });
        let result = engine.score(&user("u"), vec![venue]).await.unwrap();
        let handle = result.agent_handle().unwrap().to_string();
        assert!(handle.starts_with("agent_"));
        assert_eq!(result.entities[0].entity_id, handle);
        assert!(result.entities.iter().all(|s| s.entity_id != "u"));
        assert_eq!(result.metadata["skipped_entities"], json!(0));
        assert_eq!(result.metadata["offline"], json!(false));
    }
}
