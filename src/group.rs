//! Group scoring: the per-user pipeline applied to every (member, venue) pair
//! and folded into one score per candidate venue.

use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::audit::AuditEvent;
use crate::background::emit_audit;
use crate::capabilities::LearningContext;
use crate::engine::{Connectivity, MatchingEngine, PreparedBatch};
use crate::error::{ConversionError, MatchingError};
use crate::result::{GroupMatchResult, MatchingResult};
use crate::types::{Entity, EntityState, EntityType, GroupSession, UserRecord, VenueRecord};

impl MatchingEngine {
    /// Scores every candidate venue for the whole group, in candidate order.
    pub async fn score_group(
        &self,
        session: &GroupSession,
        candidates: Vec<VenueRecord>,
    ) -> Result<Vec<GroupMatchResult>, MatchingError> {
        match self.score_group_inner(session, candidates).await {
            Ok(results) => Ok(results),
            Err(err) => {
                self.record_failure("score_group", &err);
                Err(err)
            }
        }
    }

    async fn score_group_inner(
        &self,
        session: &GroupSession,
        candidates: Vec<VenueRecord>,
    ) -> Result<Vec<GroupMatchResult>, MatchingError> {
        self.validate_group(session, &candidates)?;
        let mode = self.probe().await;
        let venues: Vec<Entity> = candidates.into_iter().map(Entity::Venue).collect();

        let (members, venue_states) = match mode {
            Connectivity::Online => {
                let members = self.convert_members(&session.members).await;
                let venue_states = self.convert_candidates(&venues).await;
                (members, venue_states)
            }
            Connectivity::Offline => {
                let mut members = Vec::with_capacity(session.members.len());
                for member in &session.members {
                    if let Some(state) = self.cached(EntityType::User, &member.id).await {
                        members.push(state);
                    }
                }
                if members.len() < self.cfg.min_group_members {
                    debug!(
                        cached = members.len(),
                        required = self.cfg.min_group_members,
                        "offline and too few members have a cached state"
                    );
                    return Err(MatchingError::OfflineUnavailable);
                }
                let venue_states = self.cached_candidates(&venues).await;
                if venue_states.is_empty() {
                    return Err(MatchingError::OfflineUnavailable);
                }
                (members, venue_states)
            }
        };
        if members.len() < self.cfg.min_group_members {
            return Err(ConversionError::TooFewMembers {
                survived: members.len(),
                required: self.cfg.min_group_members,
            }
            .into());
        }
        if venue_states.is_empty() {
            return Err(ConversionError::NoSurvivors {
                attempted: venues.len(),
            }
            .into());
        }
        if mode == Connectivity::Online {
            let mut fresh = members.clone();
            fresh.extend(venue_states.iter().cloned());
            self.refresh_cache(&fresh);
        }

        let session_handle = self.resolver.agent_handle(&session.session_id);
        let mut results = Vec::with_capacity(venue_states.len());
        for venue in &venue_states {
            let mut member_results = Vec::with_capacity(members.len());
            for member in &members {
                let batch = PreparedBatch {
                    states: vec![member.clone(), venue.clone()],
                    skipped: 0,
                };
                member_results.push(self.evaluate(&member.entity_id, batch, mode).await?);
            }
            let group = fold_members(&venue.entity_id, &session_handle, venue, member_results, mode);
            if group.group_compatibility >= self.cfg.group_learning_threshold {
                let context = LearningContext::from([
                    ("group_session".to_string(), Value::String(session_handle.clone())),
                    ("venue".to_string(), Value::String(group.venue_id.clone())),
                    ("member_count".to_string(), json!(group.member_scores.len())),
                ]);
                self.learn(
                    session_handle.clone(),
                    group.result.clone(),
                    Some(context),
                    mode.is_offline(),
                );
            }
            results.push(group);
        }

        let best = results
            .iter()
            .map(|r| r.group_compatibility)
            .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))));
        info!(
            session_handle = %session_handle,
            members = members.len(),
            venues = results.len(),
            offline = mode.is_offline(),
            "scored group"
        );
        emit_audit(
            &self.audit,
            AuditEvent::group_scored(
                self.clock.now(),
                session_handle.clone(),
                members.len(),
                results.len(),
                best,
            ),
        );
        Ok(results)
    }

    fn validate_group(
        &self,
        session: &GroupSession,
        candidates: &[VenueRecord],
    ) -> Result<(), MatchingError> {
        if session.members.len() < self.cfg.min_group_members {
            return Err(MatchingError::Validation(format!(
                "group needs at least {} members, has {}",
                self.cfg.min_group_members,
                session.members.len()
            )));
        }
        if session.is_expired(self.clock.now()) {
            return Err(MatchingError::Validation("group session has expired".into()));
        }
        if session.members.iter().any(|m| m.id.trim().is_empty()) {
            return Err(MatchingError::Validation("group member without id".into()));
        }
        let distinct: BTreeSet<&str> = session.members.iter().map(|m| m.id.as_str()).collect();
        if distinct.len() != session.members.len() {
            return Err(MatchingError::Validation("group members must be distinct".into()));
        }
        if candidates.is_empty() {
            return Err(MatchingError::Validation("candidate venue list is empty".into()));
        }
        if candidates.len() > self.cfg.max_entities {
            return Err(MatchingError::Validation(format!(
                "{} venues exceed the limit of {}",
                candidates.len(),
                self.cfg.max_entities
            )));
        }
        Ok(())
    }

    async fn convert_members(&self, members: &[UserRecord]) -> Vec<EntityState> {
        let outcomes = join_all(members.iter().map(|m| self.converter.convert_user(m))).await;
        let mut states = Vec::with_capacity(members.len());
        for (member, outcome) in members.iter().zip(outcomes) {
            match outcome {
                Ok(state) => states.push(state),
                Err(err) => {
                    let handle = self.resolver.agent_handle(&member.id);
                    warn!(
                        agent_handle = %handle,
                        error = err.label(),
                        "skipping group member that could not be converted"
                    );
                    emit_audit(
                        &self.audit,
                        AuditEvent::entity_skipped(
                            self.clock.now(),
                            handle,
                            EntityType::User,
                            err.label(),
                        ),
                    );
                }
            }
        }
        states
    }
}

/// Folds per-member results for one venue. Member ids only appear as handles.
fn fold_members(
    venue_id: &str,
    session_handle: &str,
    venue: &EntityState,
    member_results: Vec<MatchingResult>,
    mode: Connectivity,
) -> GroupMatchResult {
    let n = member_results.len().max(1) as f64;
    let mean = |f: fn(&MatchingResult) -> f64| member_results.iter().map(f).sum::<f64>() / n;
    let mean_present = |f: fn(&MatchingResult) -> Option<f64>| {
        let present: Vec<f64> = member_results.iter().filter_map(f).collect();
        (!present.is_empty()).then(|| present.iter().sum::<f64>() / present.len() as f64)
    };

    let member_scores: BTreeMap<String, f64> = member_results
        .iter()
        .map(|r| (r.agent_handle().unwrap_or_default().to_string(), r.compatibility))
        .collect();
    let group_compatibility = mean(|r| r.compatibility);
    let min_member_compatibility = member_results
        .iter()
        .map(|r| r.compatibility)
        .fold(f64::INFINITY, f64::min)
        .min(1.0);

    let mut entities: Vec<EntityState> = member_results
        .iter()
        .filter_map(|r| r.entities.first().cloned())
        .collect();
    entities.push(venue.clone());
    let timestamp = member_results
        .iter()
        .map(|r| r.timestamp)
        .max()
        .unwrap_or(venue.observed_at);

    let result = MatchingResult {
        compatibility: group_compatibility,
        fidelity: mean(|r| r.fidelity),
        structural_bonus: mean_present(|r| r.structural_bonus),
        location_compat: mean(|r| r.location_compat),
        timing_compat: mean(|r| r.timing_compat),
        predictive_connection: mean_present(|r| r.predictive_connection),
        entities,
        timestamp,
        metadata: BTreeMap::from([
            ("session_handle".to_string(), json!(session_handle)),
            ("member_count".to_string(), json!(member_results.len())),
            ("entity_count".to_string(), json!(member_results.len() + 1)),
            ("offline".to_string(), json!(mode.is_offline())),
        ]),
    };

    GroupMatchResult {
        venue_id: venue_id.to_string(),
        group_compatibility,
        min_member_compatibility,
        member_scores,
        session_handle: session_handle.to_string(),
        result,
    }
}
