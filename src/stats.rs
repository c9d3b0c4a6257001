//! Caller-owned score and latency distributions. The engine never records
//! into these itself; drivers wrap `score` calls and feed them.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::time::Duration;

use crate::result::MatchingResult;

/// Scores are stored in basis points (score * 10_000).
const SCORE_SCALE: f64 = 10_000.0;

#[derive(Clone, Debug)]
pub struct Histo {
    inner: Histogram<u64>,
}

impl Histo {
    pub fn new() -> Self {
        Self {
            inner: Histogram::new(3).expect("histo"),
        }
    }

    pub fn record(&mut self, v: u64) {
        let _ = self.inner.record(v.max(1));
    }

    pub fn p50(&self) -> u64 {
        self.inner.value_at_quantile(0.50)
    }

    pub fn p95(&self) -> u64 {
        self.inner.value_at_quantile(0.95)
    }

    pub fn p99(&self) -> u64 {
        self.inner.value_at_quantile(0.99)
    }

    pub fn max(&self) -> u64 {
        self.inner.max()
    }

    pub fn count(&self) -> u64 {
        self.inner.len()
    }
}

impl Default for Histo {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScoreStats {
    pub compatibility_bps: Histo,
    pub fidelity_bps: Histo,
    pub latency_us: Histo,
    pub failures: u64,
    pub offline: u64,
    pub learning_eligible: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScoreSummary {
    pub scored: u64,
    pub failures: u64,
    pub offline: u64,
    pub learning_eligible: u64,
    pub compatibility_p50: f64,
    pub compatibility_p95: f64,
    pub fidelity_p50: f64,
    pub latency_p50_us: u64,
    pub latency_p99_us: u64,
}

impl ScoreStats {
    pub fn record(&mut self, result: &MatchingResult, elapsed: Duration, learning_threshold: f64) {
        self.compatibility_bps.record(to_bps(result.compatibility));
        self.fidelity_bps.record(to_bps(result.fidelity));
        self.latency_us
            .record(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
        if result.is_offline() {
            self.offline += 1;
        }
        if result.compatibility >= learning_threshold {
            self.learning_eligible += 1;
        }
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn summary(&self) -> ScoreSummary {
        ScoreSummary {
            scored: self.compatibility_bps.count(),
            failures: self.failures,
            offline: self.offline,
            learning_eligible: self.learning_eligible,
            compatibility_p50: from_bps(self.compatibility_bps.p50()),
            compatibility_p95: from_bps(self.compatibility_bps.p95()),
            fidelity_p50: from_bps(self.fidelity_bps.p50()),
            latency_p50_us: self.latency_us.p50(),
            latency_p99_us: self.latency_us.p99(),
        }
    }
}

fn to_bps(score: f64) -> u64 {
    (score.clamp(0.0, 1.0) * SCORE_SCALE).round() as u64
}

fn from_bps(v: u64) -> f64 {
    (v as f64 / SCORE_SCALE).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn result(compatibility: f64, offline: bool) -> MatchingResult {
        MatchingResult {
            compatibility,
            fidelity: compatibility,
            structural_bonus: None,
            location_compat: 1.0,
            timing_compat: 1.0,
            predictive_connection: None,
            entities: Vec::new(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            metadata: BTreeMap::from([("offline".to_string(), json!(offline))]),
        }
    }

    #[test]
    fn summary_tracks_counts_and_quantiles() {
        let mut stats = ScoreStats::default();
        for i in 0..100u32 {
            let score = f64::from(i) / 100.0;
            stats.record(&result(score, i % 10 == 0), Duration::from_micros(250), 0.5);
        }
        stats.record_failure();
        let summary = stats.summary();
        assert_eq!(summary.scored, 100);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.offline, 10);
        assert_eq!(summary.learning_eligible, 50);
        assert!((summary.compatibility_p50 - 0.49).abs() < 0.01);
        assert!(summary.latency_p50_us >= 249 && summary.latency_p50_us <= 251);
    }
}
