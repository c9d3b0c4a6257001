use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use clap::Parser;
use entangled_matching::audit::{AuditSink, CompositeAuditSink, LogAuditSink, MemoryAuditSink};
use entangled_matching::capabilities::{
    Clock, InMemoryProfileStore, InMemoryStateCache, RecordingLearningSink, StaticConnectivity,
    StaticGeocoder, StructuralCompatibility, SystemClock,
};
use entangled_matching::privacy::Blake3PseudonymResolver;
use entangled_matching::stats::ScoreStats;
use entangled_matching::types::{Dimensions, EntityState, Timestamp, TimingPreference};
use entangled_matching::{
    load_config, Entity, EventRecord, GroupSession, MatchingConfig, MatchingEngine, UserRecord,
    VenueRecord,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DIMENSIONS: [&str; 11] = [
    "adventure_seeking",
    "authenticity",
    "community_orientation",
    "crowd_tolerance",
    "energy_preference",
    "exploration_eagerness",
    "novelty_seeking",
    "openness",
    "social_preference",
    "trust_level",
    "value_orientation",
];

const NEIGHBORHOODS: [(&str, f64, f64); 5] = [
    ("mission district", 37.7599, -122.4148),
    ("soma", 37.7785, -122.4056),
    ("north beach", 37.8061, -122.4103),
    ("oakland downtown", 37.8044, -122.2712),
    ("berkeley", 37.8716, -122.2727),
];

const CATEGORIES: [&str; 6] = ["jazz", "coffee", "climbing", "books", "food", "art"];

#[derive(Parser, Debug)]
#[command(name = "fit_demo")]
struct Args {
    #[arg(long, default_value_t = 5)]
    users: usize,

    #[arg(long, default_value_t = 4)]
    events: usize,

    #[arg(long, default_value_t = 3)]
    venues: usize,

    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Optional TOML matching config.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "FIT_DEMO_SECRET", default_value = "fit-demo")]
    secret: String,

    /// Re-score every user with connectivity switched off.
    #[arg(long)]
    offline_pass: bool,

    /// Disable the synthetic structural bonus.
    #[arg(long)]
    no_structural: bool,
}

/// Rewards candidates whose tags overlap the rest of the batch.
struct TagOverlapStructure;

#[async_trait]
impl StructuralCompatibility for TagOverlapStructure {
    async fn compute_bonus(
        &self,
        states: &[EntityState],
        _target_time: Option<Timestamp>,
    ) -> anyhow::Result<Option<f64>> {
        let tag_sets: Vec<BTreeSet<String>> = states
            .iter()
            .filter(|s| !s.is_user())
            .map(|s| s.string_list("tags").into_iter().collect())
            .collect();
        if tag_sets.len() < 2 {
            return Ok(None);
        }
        let union: BTreeSet<&String> = tag_sets.iter().flatten().collect();
        let shared = union
            .iter()
            .filter(|t| tag_sets.iter().filter(|s| s.contains(**t)).count() > 1)
            .count();
        if union.is_empty() {
            return Ok(Some(0.5));
        }
        Ok(Some(0.5 + 0.5 * shared as f64 / union.len() as f64))
    }
}

fn synth_dimensions(rng: &mut StdRng) -> Dimensions {
    DIMENSIONS
        .iter()
        .map(|d| (d.to_string(), rng.gen_range(0.05..=0.95)))
        .collect()
}

fn pick<'a>(rng: &mut StdRng, items: &[&'a str]) -> &'a str {
    items[rng.gen_range(0..items.len())]
}

fn synth_user(rng: &mut StdRng, i: usize) -> UserRecord {
    let (place, _, _) = NEIGHBORHOODS[rng.gen_range(0..NEIGHBORHOODS.len())];
    let interests = (0..2).map(|_| pick(rng, &CATEGORIES).to_string()).collect();
    UserRecord {
        id: format!("user-{i}"),
        display_name: Some(format!("Demo User {i}")),
        location: Some(place.to_string()),
        timing_preference: Some(TimingPreference {
            preferred_hour: rng.gen_range(8..23),
            preferred_weekday: rng.gen_range(0..7),
            frequency: rng.gen_range(0.1..=0.9),
            duration_minutes: Some(rng.gen_range(60..240)),
        }),
        interests,
    }
}

fn synth_event(rng: &mut StdRng, i: usize, host: &str, base: Timestamp) -> EventRecord {
    let (place, _, _) = NEIGHBORHOODS[rng.gen_range(0..NEIGHBORHOODS.len())];
    let category = pick(rng, &CATEGORIES).to_string();
    EventRecord {
        id: format!("event-{i}"),
        host_id: host.to_string(),
        title: format!("{category} night #{i}"),
        tags: vec![category.clone(), pick(rng, &CATEGORIES).to_string()],
        category,
        location: Some(place.to_string()),
        starts_at: Some(base + ChronoDuration::hours(rng.gen_range(2..96))),
        duration_minutes: Some(rng.gen_range(45..180)),
        recurring: rng.gen_bool(0.3),
    }
}

fn synth_venue(rng: &mut StdRng, i: usize) -> VenueRecord {
    let (_, lat, lon) = NEIGHBORHOODS[rng.gen_range(0..NEIGHBORHOODS.len())];
    let category = pick(rng, &CATEGORIES).to_string();
    let vibe: Dimensions = ["energy", "social", "exploration"]
        .iter()
        .map(|k| (k.to_string(), rng.gen_range(0.1..=0.9)))
        .collect();
    VenueRecord {
        id: format!("venue-{i}"),
        name: format!("The {category} spot"),
        tags: vec![category.clone()],
        category,
        address: None,
        coordinates: Some((lat + rng.gen_range(-0.01..0.01), lon + rng.gen_range(-0.01..0.01))),
        accessibility: Some(rng.gen_range(0.4..=1.0)),
        vibe: Some(vibe),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => MatchingConfig::default(),
    };
    let mut rng = StdRng::seed_from_u64(args.seed);

    let clock = Arc::new(SystemClock);
    let now = clock.now();
    let profiles = Arc::new(InMemoryProfileStore::new());
    let geocoder = Arc::new(StaticGeocoder::new());
    for (place, lat, lon) in NEIGHBORHOODS {
        geocoder.insert(place, lat, lon);
    }
    let connectivity = Arc::new(StaticConnectivity::new(true));
    let learning = Arc::new(RecordingLearningSink::new());
    let cache = Arc::new(InMemoryStateCache::new());
    let memory_audit = Arc::new(MemoryAuditSink::new());
    let sinks: Vec<Arc<dyn AuditSink>> = vec![memory_audit.clone(), Arc::new(LogAuditSink)];
    let audit: Arc<dyn AuditSink> = Arc::new(CompositeAuditSink::new(sinks));

    let mut builder = MatchingEngine::builder(
        clock.clone(),
        profiles.clone(),
        geocoder.clone(),
        connectivity.clone(),
        Arc::new(Blake3PseudonymResolver::from_secret(&args.secret)),
    )
    .config(cfg.clone())
    .learning(learning.clone())
    .state_cache(cache.clone())
    .audit(audit);
    if !args.no_structural {
        builder = builder.structural(Arc::new(TagOverlapStructure));
    }
    let engine = builder.build()?;

    let users: Vec<UserRecord> = (0..args.users).map(|i| synth_user(&mut rng, i)).collect();
    for user in &users {
        profiles.insert_personality(user.id.clone(), synth_dimensions(&mut rng));
    }
    let mut candidates: Vec<Entity> = Vec::new();
    for i in 0..args.events {
        let host = users
            .get(rng.gen_range(0..users.len().max(1)))
            .map(|u| u.id.clone())
            .unwrap_or_else(|| "host-0".to_string());
        candidates.push(Entity::Event(synth_event(&mut rng, i, &host, now)));
    }
    let venues: Vec<VenueRecord> = (0..args.venues).map(|i| synth_venue(&mut rng, i)).collect();
    candidates.extend(venues.iter().cloned().map(Entity::Venue));

    let mut stats = ScoreStats::default();
    let mut scored = Vec::new();
    for user in &users {
        let started = Instant::now();
        match engine.score(user, candidates.clone()).await {
            Ok(result) => {
                stats.record(&result, started.elapsed(), cfg.learning_threshold);
                scored.push(json!({
                    "agent_handle": result.agent_handle(),
                    "compatibility": result.compatibility,
                    "fidelity": result.fidelity,
                    "structural_bonus": result.structural_bonus,
                    "location_compat": result.location_compat,
                    "timing_compat": result.timing_compat,
                    "predictive_connection": result.predictive_connection,
                    "fidelity_path": result.metadata.get("fidelity_path"),
                }));
            }
            Err(err) => {
                stats.record_failure();
                scored.push(json!({ "error": err.user_message(), "kind": err.label() }));
            }
        }
    }

    let group = GroupSession {
        session_id: "demo-session".into(),
        members: users.iter().take(3).cloned().collect(),
        expires_at: now + ChronoDuration::hours(2),
    };
    let group_results = match engine.score_group(&group, venues.clone()).await {
        Ok(results) => json!(results
            .iter()
            .map(|r| json!({
                "venue_id": r.venue_id,
                "group_compatibility": r.group_compatibility,
                "min_member_compatibility": r.min_member_compatibility,
                "members": r.member_scores.len(),
            }))
            .collect::<Vec<_>>()),
        Err(err) => json!({ "error": err.user_message(), "kind": err.label() }),
    };

    let mut offline = Vec::new();
    if args.offline_pass {
        // let the detached cache refresh land before going offline
        tokio::time::sleep(Duration::from_millis(50)).await;
        connectivity.set_online(false);
        for user in &users {
            let started = Instant::now();
            match engine.score(user, candidates.clone()).await {
                Ok(result) => {
                    stats.record(&result, started.elapsed(), cfg.learning_threshold);
                    offline.push(json!({
                        "agent_handle": result.agent_handle(),
                        "compatibility": result.compatibility,
                    }));
                }
                Err(err) => {
                    stats.record_failure();
                    offline.push(json!({ "error": err.user_message(), "kind": err.label() }));
                }
            }
        }
    }

    let learned = learning.wait_for(1, Duration::from_millis(200)).await.len();
    let report = json!({
        "scored": scored,
        "group": group_results,
        "offline": offline,
        "stats": stats.summary(),
        "learning_calls": learned,
        "cached_states": cache.len(),
        "audit_events": memory_audit.events().len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
