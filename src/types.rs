use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every timestamp in the engine comes from an injected [`crate::capabilities::Clock`].
pub type Timestamp = DateTime<Utc>;

/// Named dimension values (personality or vibe). Ordered so iteration is stable.
pub type Dimensions = BTreeMap<String, f64>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    User,
    Event,
    Venue,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Event => "event",
            EntityType::Venue => "venue",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationState {
    /// Latitude mapped from [-90, 90] onto [0, 1].
    pub lat_q: f64,
    /// Longitude mapped from [-180, 180] onto [0, 1].
    pub lon_q: f64,
    pub accessibility: f64,
    pub vibe_match: f64,
}

impl LocationState {
    pub fn from_coordinates(lat: f64, lon: f64, accessibility: f64, vibe_match: f64) -> Self {
        Self {
            lat_q: ((lat + 90.0) / 180.0).clamp(0.0, 1.0),
            lon_q: ((lon + 180.0) / 360.0).clamp(0.0, 1.0),
            accessibility: accessibility.clamp(0.0, 1.0),
            vibe_match: vibe_match.clamp(0.0, 1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingState {
    /// Fraction of the day elapsed (00:00 = 0.0).
    pub time_of_day: f64,
    /// Monday = 0.0, stepping by 1/7.
    pub day_of_week: f64,
    pub frequency: f64,
    pub duration: f64,
    pub vibe_match: f64,
}

/// Longest duration that still maps below 1.0 on the duration axis.
const FULL_DURATION_MINUTES: f64 = 8.0 * 60.0;

impl TimingState {
    /// Timing of a scheduled occurrence. One-off events sit at the bottom of the
    /// frequency axis, recurring ones at the top.
    pub fn from_schedule(
        starts_at: Timestamp,
        duration_minutes: Option<u32>,
        recurring: bool,
        vibe_match: f64,
    ) -> Self {
        let minutes = starts_at.hour() * 60 + starts_at.minute();
        Self {
            time_of_day: f64::from(minutes) / 1_440.0,
            day_of_week: f64::from(starts_at.weekday().num_days_from_monday()) / 7.0,
            frequency: if recurring { 1.0 } else { 0.0 },
            duration: duration_axis(duration_minutes),
            vibe_match: vibe_match.clamp(0.0, 1.0),
        }
    }

    /// Returns `None` when the stored preference is out of range.
    pub fn from_preference(pref: &TimingPreference, vibe_match: f64) -> Option<Self> {
        if pref.preferred_hour > 23 || pref.preferred_weekday > 6 {
            return None;
        }
        if !(0.0..=1.0).contains(&pref.frequency) {
            return None;
        }
        Some(Self {
            time_of_day: f64::from(pref.preferred_hour * 60) / 1_440.0,
            day_of_week: f64::from(pref.preferred_weekday) / 7.0,
            frequency: pref.frequency,
            duration: duration_axis(pref.duration_minutes),
            vibe_match: vibe_match.clamp(0.0, 1.0),
        })
    }
}

fn duration_axis(minutes: Option<u32>) -> f64 {
    match minutes {
        Some(m) => (f64::from(m) / FULL_DURATION_MINUTES).clamp(0.0, 1.0),
        None => 0.5,
    }
}

/// One entity's normalized representation. Built fresh per request, never mutated
/// by the scoring path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub personality_dimensions: Dimensions,
    pub vibe_dimensions: Dimensions,
    /// Descriptive fields carried for metadata only; never enter the vector math.
    pub characteristics: BTreeMap<String, serde_json::Value>,
    pub location: Option<LocationState>,
    pub timing: Option<TimingState>,
    pub observed_at: Timestamp,
}

impl EntityState {
    pub fn is_user(&self) -> bool {
        self.entity_type == EntityType::User
    }

    /// Lower-cased string list stored under `key` (interests, tags).
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.characteristics.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                vec![s.trim().to_lowercase()]
            }
            _ => Vec::new(),
        }
    }

    pub fn scheduled_start(&self) -> Option<Timestamp> {
        self.characteristics
            .get("starts_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingPreference {
    /// 0-23, local hour the user prefers to go out.
    pub preferred_hour: u32,
    /// 0 = Monday .. 6 = Sunday.
    pub preferred_weekday: u32,
    /// How often the user goes out, 0.0 (rarely) to 1.0 (constantly).
    pub frequency: f64,
    pub duration_minutes: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub display_name: Option<String>,
    /// Free-form location string, resolved through the geocoder.
    pub location: Option<String>,
    pub timing_preference: Option<TimingPreference>,
    #[serde(default)]
    pub interests: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub host_id: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub location: Option<String>,
    pub starts_at: Option<Timestamp>,
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub recurring: bool,
}

/// Venues and organizations share this record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueRecord {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub address: Option<String>,
    /// (latitude, longitude); wins over `address` when both are present.
    pub coordinates: Option<(f64, f64)>,
    pub accessibility: Option<f64>,
    /// Venue-provided vibe metadata.
    pub vibe: Option<Dimensions>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    User(UserRecord),
    Event(EventRecord),
    Venue(VenueRecord),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::User(u) => &u.id,
            Entity::Event(e) => &e.id,
            Entity::Venue(v) => &v.id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::User(_) => EntityType::User,
            Entity::Event(_) => EntityType::Event,
            Entity::Venue(_) => EntityType::Venue,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupSession {
    pub session_id: String,
    pub members: Vec<UserRecord>,
    pub expires_at: Timestamp,
}

impl GroupSession {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}
