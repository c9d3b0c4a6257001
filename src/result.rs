use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{EntityState, Timestamp};

/// Outcome of one scoring call. Immutable once returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    /// Final score in [0, 1].
    pub compatibility: f64,
    /// Squared projection of the joint vector onto the user, in [0, 1].
    pub fidelity: f64,
    pub structural_bonus: Option<f64>,
    pub location_compat: f64,
    pub timing_compat: f64,
    pub predictive_connection: Option<f64>,
    /// States that took part, user first. The user's id is replaced by its agent handle.
    pub entities: Vec<EntityState>,
    /// Latest `observed_at` among `entities`.
    pub timestamp: Timestamp,
    /// Diagnostics: `agent_handle`, `entity_count`, `structural_bonus_applied`,
    /// `predictive_applied`, `offline`, `skipped_entities`, `fidelity_path`.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl MatchingResult {
    pub fn agent_handle(&self) -> Option<&str> {
        self.metadata.get("agent_handle").and_then(Value::as_str)
    }

    pub fn is_offline(&self) -> bool {
        self.metadata
            .get("offline")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Per-venue group score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupMatchResult {
    pub venue_id: String,
    /// Mean of the member scores.
    pub group_compatibility: f64,
    pub min_member_compatibility: f64,
    /// Keyed by member agent handle.
    pub member_scores: BTreeMap<String, f64>,
    pub session_handle: String,
    /// Member-averaged subscores; optional ones are averaged over the members
    /// that have them.
    pub result: MatchingResult,
}
