//! Entity record -> [`EntityState`] conversion.
//!
//! Profile reads are required signals: a failing profile store fails the
//! conversion. Geocoding and timing derivation are best-effort: when they fail
//! the optional sub-state is left out (never zero-filled), so downstream code
//! can tell "unknown" from "zero".

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::capabilities::{Clock, Geocoder, ProfileStore};
use crate::config::MatchingConfig;
use crate::error::ConversionError;
use crate::types::*;

/// Vibe vocabulary and the personality dimensions that feed each entry.
const VIBE_SOURCES: &[(&str, &[&str])] = &[
    ("energy", &["energy_preference"]),
    (
        "social",
        &["social_preference", "community_orientation", "crowd_tolerance"],
    ),
    (
        "exploration",
        &[
            "exploration_eagerness",
            "novelty_seeking",
            "adventure_seeking",
            "openness",
        ],
    ),
    ("authenticity", &["authenticity", "value_orientation"]),
    ("trust", &["trust_level"]),
];

/// Folds known personality dimensions into the vibe vocabulary (mean of the
/// contributors that are present). Unknown dimensions pass through unchanged.
pub fn compile_vibe(personality: &Dimensions) -> Dimensions {
    let mut vibe = Dimensions::new();
    for (vibe_key, sources) in VIBE_SOURCES {
        let present: Vec<f64> = sources
            .iter()
            .filter_map(|s| personality.get(*s).copied())
            .filter(|v| v.is_finite())
            .collect();
        if !present.is_empty() {
            let mean = present.iter().sum::<f64>() / present.len() as f64;
            vibe.insert((*vibe_key).to_string(), mean);
        }
    }
    for (key, value) in personality {
        let known = VIBE_SOURCES.iter().any(|(_, sources)| sources.contains(&key.as_str()));
        if !known {
            vibe.insert(key.clone(), *value);
        }
    }
    vibe
}

#[derive(Clone)]
pub struct EntityStateConverter {
    profiles: Arc<dyn ProfileStore>,
    geocoder: Arc<dyn Geocoder>,
    clock: Arc<dyn Clock>,
    default_accessibility: f64,
    default_vibe_match: f64,
}

impl EntityStateConverter {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        geocoder: Arc<dyn Geocoder>,
        clock: Arc<dyn Clock>,
        cfg: &MatchingConfig,
    ) -> Self {
        Self {
            profiles,
            geocoder,
            clock,
            default_accessibility: cfg.default_accessibility,
            default_vibe_match: cfg.default_vibe_match,
        }
    }

    pub async fn convert(&self, entity: &Entity) -> Result<EntityState, ConversionError> {
        match entity {
            Entity::User(user) => self.convert_user(user).await,
            Entity::Event(event) => self.convert_event(event).await,
            Entity::Venue(venue) => self.convert_venue(venue).await,
        }
    }

    pub async fn convert_user(&self, user: &UserRecord) -> Result<EntityState, ConversionError> {
        require_id(&user.id, EntityType::User, "id")?;

        let (personality, vibe) = self.profile_signals(&user.id).await?;

        let location = match &user.location {
            Some(address) => self.locate(address, self.default_accessibility).await,
            None => None,
        };
        let timing = user.timing_preference.as_ref().and_then(|pref| {
            let timing = TimingState::from_preference(pref, self.default_vibe_match);
            if timing.is_none() {
                debug!(entity_id = %user.id, "stored timing preference out of range; omitting timing");
            }
            timing
        });

        let mut characteristics = BTreeMap::new();
        if let Some(name) = &user.display_name {
            characteristics.insert("display_name".into(), json!(name));
        }
        characteristics.insert("interests".into(), json!(user.interests));

        Ok(EntityState {
            entity_id: user.id.clone(),
            entity_type: EntityType::User,
            personality_dimensions: personality,
            vibe_dimensions: vibe,
            characteristics,
            location,
            timing,
            observed_at: self.clock.now(),
        })
    }

    /// Events borrow their host's personality and vibe as proxy signals.
    pub async fn convert_event(&self, event: &EventRecord) -> Result<EntityState, ConversionError> {
        require_id(&event.id, EntityType::Event, "id")?;
        require_id(&event.host_id, EntityType::Event, "host_id")?;

        let (personality, vibe) = self.profile_signals(&event.host_id).await?;

        let location = match &event.location {
            Some(address) => self.locate(address, self.default_accessibility).await,
            None => None,
        };
        let timing = event.starts_at.map(|starts_at| {
            TimingState::from_schedule(
                starts_at,
                event.duration_minutes,
                event.recurring,
                self.default_vibe_match,
            )
        });

        let mut characteristics = BTreeMap::new();
        characteristics.insert("title".into(), json!(event.title));
        characteristics.insert("category".into(), json!(event.category));
        characteristics.insert("tags".into(), json!(event.tags));
        characteristics.insert("host_id".into(), json!(event.host_id));
        if let Some(starts_at) = event.starts_at {
            characteristics.insert("starts_at".into(), Value::String(starts_at.to_rfc3339()));
        }

        Ok(EntityState {
            entity_id: event.id.clone(),
            entity_type: EntityType::Event,
            personality_dimensions: personality,
            vibe_dimensions: vibe,
            characteristics,
            location,
            timing,
            observed_at: self.clock.now(),
        })
    }

    /// Venues carry location only, plus vibe when the venue publishes it.
    pub async fn convert_venue(&self, venue: &VenueRecord) -> Result<EntityState, ConversionError> {
        require_id(&venue.id, EntityType::Venue, "id")?;

        let accessibility = venue
            .accessibility
            .filter(|a| a.is_finite())
            .unwrap_or(self.default_accessibility);
        let location = match (venue.coordinates, &venue.address) {
            (Some((lat, lon)), _) if lat.is_finite() && lon.is_finite() => Some(
                LocationState::from_coordinates(lat, lon, accessibility, self.default_vibe_match),
            ),
            (_, Some(address)) => self.locate(address, accessibility).await,
            _ => None,
        };

        let vibe: Dimensions = venue
            .vibe
            .as_ref()
            .map(|v| {
                v.iter()
                    .filter(|(_, value)| value.is_finite())
                    .map(|(k, value)| (k.clone(), *value))
                    .collect()
            })
            .unwrap_or_default();

        let mut characteristics = BTreeMap::new();
        characteristics.insert("name".into(), json!(venue.name));
        characteristics.insert("category".into(), json!(venue.category));
        characteristics.insert("tags".into(), json!(venue.tags));

        Ok(EntityState {
            entity_id: venue.id.clone(),
            entity_type: EntityType::Venue,
            personality_dimensions: Dimensions::new(),
            vibe_dimensions: vibe,
            characteristics,
            location,
            timing: None,
            observed_at: self.clock.now(),
        })
    }

    async fn profile_signals(
        &self,
        profile_id: &str,
    ) -> Result<(Dimensions, Dimensions), ConversionError> {
        let unavailable = |e: anyhow::Error| ConversionError::ProfileUnavailable {
            entity_id: profile_id.to_string(),
            reason: e.to_string(),
        };
        let personality = self
            .profiles
            .personality(profile_id)
            .await
            .map_err(unavailable)?
            .unwrap_or_default();
        let vibe = match self.profiles.vibe(profile_id).await.map_err(unavailable)? {
            Some(stored) => stored,
            None => compile_vibe(&personality),
        };
        Ok((personality, vibe))
    }

    /// Never fails: geocoder errors and misses both yield `None`.
    async fn locate(&self, address: &str, accessibility: f64) -> Option<LocationState> {
        match self.geocoder.resolve(address).await {
            Ok(Some((lat, lon))) if lat.is_finite() && lon.is_finite() => Some(
                LocationState::from_coordinates(lat, lon, accessibility, self.default_vibe_match),
            ),
            Ok(_) => {
                debug!(address, "address did not resolve; omitting location");
                None
            }
            Err(e) => {
                debug!(address, error = %e, "geocoding failed; omitting location");
                None
            }
        }
    }
}

fn require_id(value: &str, entity_type: EntityType, field: &'static str) -> Result<(), ConversionError> {
    if value.trim().is_empty() {
        return Err(ConversionError::MissingIdentity { entity_type, field });
    }
    Ok(())
}
