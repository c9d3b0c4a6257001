mod common;

use common::*;
use entangled_matching::{Entity, EntityType, EventRecord, FailureKind, MatchingError};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn seed_ab(h: &Harness, ids: &[&str]) {
    for id in ids {
        h.profiles
            .inner
            .insert_personality(*id, dims(&[("a", 1.0), ("b", 0.0)]));
    }
}

#[tokio::test]
async fn identical_user_and_event_score_one() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "host"]);

    let result = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap();

    assert!((result.fidelity - 1.0).abs() < 1e-9);
    assert!((result.location_compat - 1.0).abs() < 1e-9);
    assert!((result.timing_compat - 1.0).abs() < 1e-9);
    assert!((result.compatibility - 1.0).abs() < 1e-9);
    assert_eq!(result.structural_bonus, None);
    assert!((result.predictive_connection.unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(result.metadata["fidelity_path"], json!("direct"));
    assert_eq!(result.metadata["entity_count"], json!(2));
    assert_eq!(result.metadata["structural_bonus_applied"], json!(false));
    assert_eq!(result.timestamp, now());
}

#[tokio::test]
async fn missing_event_location_only_keeps_timing_modifier() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "host"]);
    let located = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap();

    let unlocated_event = EventRecord {
        location: None,
        ..hall_event("e1", "host")
    };
    let unlocated = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(unlocated_event)])
        .await
        .unwrap();

    assert_eq!(unlocated.location_compat, 0.0);
    assert!((unlocated.compatibility - 0.4 * unlocated.timing_compat).abs() < 1e-9);
    assert!(unlocated.compatibility < located.compatibility);
}

#[tokio::test]
async fn structural_bonus_joins_the_geometric_mean() {
    let structure = Arc::new(FixedStructure::returning(0.9));
    let h = Harness::configured(true, true, |b| b.structural(structure.clone()));
    seed_ab(&h, &["u1"]);

    let venues = vec![
        Entity::Venue(hall_venue("v1", dims(&[("a", 1.0)]))),
        Entity::Venue(hall_venue("v2", dims(&[("a", 1.0)]))),
    ];
    let result = h.engine.score(&evening_user("u1"), venues).await.unwrap();

    // user [1, 0 | 1, 0] against venues [0, 0 | 1, 0]: overlap 1/sqrt(2)
    assert!((result.fidelity - 0.5).abs() < 1e-9);
    assert_eq!(result.structural_bonus, Some(0.9));
    assert_eq!(result.metadata["fidelity_path"], json!("chunked"));
    let core = (0.5_f64 * 0.9).sqrt();
    let modifier = 0.6 * 1.0 + 0.4 * 0.0;
    assert!((result.compatibility - core * modifier).abs() < 1e-9);
    assert_eq!(structure.calls(), 1);
    assert_eq!(structure.last_target(), None);
}

#[tokio::test]
async fn structural_collaborator_gets_earliest_start() {
    let structure = Arc::new(FixedStructure::returning(0.8));
    let h = Harness::configured(true, true, |b| b.structural(structure.clone()));
    seed_ab(&h, &["u1", "host"]);

    let later = EventRecord {
        starts_at: Some(wednesday_evening() + chrono::Duration::days(2)),
        ..hall_event("e2", "host")
    };
    h.engine
        .score(
            &evening_user("u1"),
            vec![Entity::Event(later), Entity::Event(hall_event("e1", "host"))],
        )
        .await
        .unwrap();
    assert_eq!(structure.last_target(), Some(wednesday_evening()));
}

#[tokio::test]
async fn zero_structural_bonus_zeroes_compatibility() {
    let h = Harness::configured(true, true, |b| {
        b.structural(Arc::new(FixedStructure::returning(0.0)))
    });
    seed_ab(&h, &["u1", "host"]);
    let result = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap();
    assert_eq!(result.structural_bonus, Some(0.0));
    assert_eq!(result.compatibility, 0.0);
}

#[tokio::test]
async fn failing_structural_collaborator_means_no_bonus() {
    let h = Harness::configured(true, true, |b| b.structural(Arc::new(FixedStructure::failing())));
    seed_ab(&h, &["u1", "host"]);
    let result = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap();
    assert_eq!(result.structural_bonus, None);
    assert_eq!(result.metadata["structural_bonus_applied"], json!(false));
    assert!((result.compatibility - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn empty_entity_list_is_a_validation_error() {
    let h = Harness::new();
    let err = h.engine.score(&evening_user("u1"), vec![]).await.unwrap_err();
    assert!(matches!(err, MatchingError::Validation(_)));
    assert_eq!(err.kind(), FailureKind::Validation);
    assert_eq!(h.profiles.reads(), 0);
    assert_eq!(h.connectivity.probe_count(), 0);
    h.wait_for_audit("failed", 1).await;
}

#[tokio::test]
async fn offline_without_cache_never_touches_the_network() {
    let h = Harness::configured(false, false, |b| b);
    let err = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchingError::OfflineUnavailable));
    assert_eq!(err.kind(), FailureKind::Offline);
    assert_ne!(err.user_message(), MatchingError::Validation(String::new()).user_message());
    assert_eq!(h.profiles.reads(), 0);
    assert_eq!(h.geocoder.lookups(), 0);
}

#[tokio::test]
async fn offline_with_empty_cache_is_unavailable() {
    let h = Harness::configured(false, true, |b| b);
    let err = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchingError::OfflineUnavailable));
    assert_eq!(h.profiles.reads(), 0);
}

#[tokio::test]
async fn offline_scores_from_cached_states() {
    let structure = Arc::new(FixedStructure::returning(0.9));
    let h = Harness::configured(true, true, |b| b.structural(structure.clone()));
    seed_ab(&h, &["u1", "host"]);
    let user = evening_user("u1");
    let candidates = vec![Entity::Event(hall_event("e1", "host"))];

    let online = h.engine.score(&user, candidates.clone()).await.unwrap();
    h.wait_for_cache(2).await;
    assert!(h.cache.contains(EntityType::User, "u1"));
    assert!(h.cache.contains(EntityType::Event, "e1"));

    h.connectivity.set_online(false);
    let reads = h.profiles.reads();
    let lookups = h.geocoder.lookups();
    let offline = h.engine.score(&user, candidates).await.unwrap();

    assert_eq!(offline.metadata["offline"], json!(true));
    assert_eq!(offline.structural_bonus, None);
    assert_eq!(structure.calls(), 1);
    assert_eq!(h.profiles.reads(), reads);
    assert_eq!(h.geocoder.lookups(), lookups);
    assert!((offline.fidelity - online.fidelity).abs() < 1e-12);
    assert_eq!(offline.agent_handle(), online.agent_handle());

    let calls = h.learning.wait_for(2, Duration::from_secs(1)).await;
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().any(|c| c.offline));
    assert!(calls.iter().any(|c| !c.offline));
}

#[tokio::test]
async fn connectivity_is_probed_on_every_call() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "host"]);
    for _ in 0..3 {
        h.engine
            .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
            .await
            .unwrap();
    }
    assert_eq!(h.connectivity.probe_count(), 3);
}

#[tokio::test]
async fn learning_is_keyed_by_agent_handle_above_threshold() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "host"]);
    let result = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap();

    let calls = h.learning.wait_for(1, Duration::from_secs(1)).await;
    assert_eq!(calls.len(), 1);
    let handle = result.agent_handle().unwrap();
    assert_eq!(calls[0].agent_handle, handle);
    assert_ne!(calls[0].agent_handle, "u1");
    assert!(!calls[0].offline);
    assert!(calls[0].context.is_none());
}

#[tokio::test]
async fn low_scores_do_not_reinforce_learning() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "host"]);
    let unlocated = EventRecord {
        location: None,
        ..hall_event("e1", "host")
    };
    let result = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(unlocated)])
        .await
        .unwrap();
    assert!(result.compatibility < 0.5);

    h.wait_for_audit("scored", 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.learning.calls().is_empty());
}

#[tokio::test]
async fn learning_failures_never_reach_the_caller() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "host"]);
    h.learning.fail_calls();
    let result = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await;
    assert!(result.is_ok());
    let calls = h.learning.wait_for(1, Duration::from_secs(1)).await;
    assert_eq!(calls.len(), 1);
}

#[tokio::test]
async fn unconvertible_entities_are_skipped() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "host"]);
    let hostless = EventRecord {
        host_id: String::new(),
        ..hall_event("e2", "host")
    };
    let result = h
        .engine
        .score(
            &evening_user("u1"),
            vec![Entity::Event(hall_event("e1", "host")), Entity::Event(hostless)],
        )
        .await
        .unwrap();
    assert_eq!(result.metadata["skipped_entities"], json!(1));
    assert_eq!(result.entities.len(), 2);
    h.wait_for_audit("entity_skipped", 1).await;
}

#[tokio::test]
async fn user_profile_outage_is_a_hard_failure() {
    let h = Harness::new();
    h.profiles.inner.mark_unavailable("u1");
    let err = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchingError::Conversion(_)));
    assert_eq!(err.user_message(), "Matching failed.");
}

#[tokio::test]
async fn user_identity_is_sealed() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "host"]);
    let result = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "host"))])
        .await
        .unwrap();
    let user_state = &result.entities[0];
    assert!(user_state.is_user());
    assert_eq!(Some(user_state.entity_id.as_str()), result.agent_handle());
    assert!(!user_state.characteristics.contains_key("display_name"));
    let serialized = serde_json::to_string(&result).unwrap();
    assert!(!serialized.contains("\"u1\""));
}

#[tokio::test]
async fn offline_cache_keeps_user_and_venue_sharing_an_id() {
    let h = Harness::new();
    seed_ab(&h, &["u1"]);
    let user = evening_user("u1");
    let candidates = vec![Entity::Venue(hall_venue("u1", dims(&[("a", 1.0)])))];

    let online = h.engine.score(&user, candidates.clone()).await.unwrap();
    h.wait_for_cache(2).await;
    assert!(h.cache.contains(EntityType::User, "u1"));
    assert!(h.cache.contains(EntityType::Venue, "u1"));

    h.connectivity.set_online(false);
    let offline = h.engine.score(&user, candidates).await.unwrap();
    assert_eq!(offline.metadata["offline"], json!(true));
    assert_eq!(offline.entities.len(), 2);
    assert!((offline.fidelity - online.fidelity).abs() < 1e-12);
}

#[tokio::test]
async fn event_hosts_leave_as_handles() {
    let h = Harness::new();
    seed_ab(&h, &["u1", "member-42"]);
    let result = h
        .engine
        .score(&evening_user("u1"), vec![Entity::Event(hall_event("e1", "member-42"))])
        .await
        .unwrap();
    let event = result.entities.iter().find(|s| !s.is_user()).unwrap();
    let host = event.characteristics["host_id"].as_str().unwrap();
    assert!(host.starts_with("agent_"));
    assert_ne!(Some(host), result.agent_handle());
    let serialized = serde_json::to_string(&result).unwrap();
    assert!(!serialized.contains("member-42"));
}

#[tokio::test]
async fn fidelity_does_not_depend_on_candidate_order() {
    let h = Harness::new();
    h.profiles
        .inner
        .insert_personality("u1", dims(&[("energy_preference", 0.9), ("openness", 0.3)]));
    let venues = vec![
        Entity::Venue(hall_venue("v1", dims(&[("energy", 0.2), ("social", 0.9)]))),
        Entity::Venue(hall_venue("v2", dims(&[("exploration", 0.7)]))),
        Entity::Venue(hall_venue("v3", dims(&[("energy", 0.8), ("exploration", 0.1)]))),
    ];
    let mut reversed = venues.clone();
    reversed.reverse();

    let forward = h.engine.score(&evening_user("u1"), venues).await.unwrap();
    let backward = h.engine.score(&evening_user("u1"), reversed).await.unwrap();
    assert!((forward.fidelity - backward.fidelity).abs() < 1e-12);
    assert!((forward.compatibility - backward.compatibility).abs() < 1e-12);
}

#[tokio::test]
async fn every_subscore_stays_in_unit_range() {
    let h = Harness::new();
    let mut rng = StdRng::seed_from_u64(42);
    let keys = ["energy", "social", "exploration", "trust"];
    for round in 0..20 {
        let user_id = format!("u{round}");
        let personality = keys
            .iter()
            .map(|k| (k.to_string(), rng.gen_range(-1.0..=2.0)))
            .collect();
        h.profiles.inner.insert_personality(user_id.clone(), personality);
        let mut venues = Vec::new();
        for i in 0..rng.gen_range(1..5) {
            let mut vibe = dims(&[]);
            for k in keys {
                if rng.gen_bool(0.7) {
                    vibe.insert(k.to_string(), rng.gen_range(0.0..=1.0));
                }
            }
            venues.push(Entity::Venue(hall_venue(&format!("v{round}-{i}"), vibe)));
        }
        let result = h.engine.score(&evening_user(&user_id), venues).await.unwrap();
        for v in [
            result.compatibility,
            result.fidelity,
            result.location_compat,
            result.timing_compat,
        ]
        .into_iter()
        .chain(result.structural_bonus)
        .chain(result.predictive_connection)
        {
            assert!((0.0..=1.0).contains(&v), "subscore {v} out of range");
        }
    }
}
