//! C3: Freshness tracking — per-source last-success timestamps and
//! freshness-level classification relative to each source's configured
//! update frequency (spec §4.3).

use crate::model::FreshnessLevel;
use std::collections::HashMap;

/// A source is `Fresh` inside one update interval, `Recent` inside two,
/// `Stale` inside five, and `Outdated` beyond that — thresholds expressed
/// as multiples of `update_frequency_s` so a slow-moving source (e.g. an
/// hourly social-activity feed) isn't penalized on the same absolute clock
/// as a fast one (e.g. a per-block liquidity feed).
const RECENT_MULTIPLIER: f64 = 2.0;
const STALE_MULTIPLIER: f64 = 5.0;

struct SourceFreshness {
    last_success_at: i64,
    update_frequency_s: u64,
    /// Critical-source SLA ceiling from spec §4.3 (`sla.max_age_s`); `None`
    /// for sources that aren't SLA-critical, in which case staleness alone
    /// (§4.3's freshness-level classification) is used as a fallback.
    sla_max_age_s: Option<u64>,
}

pub struct FreshnessTracker {
    sources: HashMap<String, SourceFreshness>,
}

impl FreshnessTracker {
    pub fn new() -> Self {
        Self { sources: HashMap::new() }
    }

    pub fn register_source(&mut self, name: &str, update_frequency_s: u64) {
        self.register_source_with_sla(name, update_frequency_s, None);
    }

    pub fn register_source_with_sla(
        &mut self,
        name: &str,
        update_frequency_s: u64,
        sla_max_age_s: Option<u64>,
    ) {
        self.sources.entry(name.to_string()).or_insert(SourceFreshness {
            last_success_at: 0,
            update_frequency_s,
            sla_max_age_s,
        });
    }

    pub fn record_success(&mut self, name: &str, at: i64) {
        if let Some(source) = self.sources.get_mut(name) {
            source.last_success_at = at;
        }
    }

    /// Classify `name`'s freshness as of `now` (Unix seconds). A source
    /// that has never succeeded is `Outdated`.
    pub fn level(&self, name: &str, now: i64) -> FreshnessLevel {
        let Some(source) = self.sources.get(name) else {
            return FreshnessLevel::Outdated;
        };
        if source.last_success_at == 0 {
            return FreshnessLevel::Outdated;
        }
        let age_s = (now - source.last_success_at).max(0) as f64;
        let interval = source.update_frequency_s.max(1) as f64;

        if age_s <= interval {
            FreshnessLevel::Fresh
        } else if age_s <= interval * RECENT_MULTIPLIER {
            FreshnessLevel::Recent
        } else if age_s <= interval * STALE_MULTIPLIER {
            FreshnessLevel::Stale
        } else {
            FreshnessLevel::Outdated
        }
    }

    /// Whether `name` is violating its critical-source SLA: `age >
    /// sla_max_age_s` when configured (spec §4.3), else falls back to
    /// `Stale`-or-worse so non-critical sources still get a sane default.
    pub fn is_sla_violated(&self, name: &str, now: i64) -> bool {
        let Some(source) = self.sources.get(name) else {
            return true;
        };
        match source.sla_max_age_s {
            Some(max_age_s) => {
                if source.last_success_at == 0 {
                    return true;
                }
                let age_s = (now - source.last_success_at).max(0) as u64;
                age_s > max_age_s
            }
            None => matches!(self.level(name, now), FreshnessLevel::Stale | FreshnessLevel::Outdated),
        }
    }
}

impl Default for FreshnessTracker {
    fn default() -> Self {
        Self::new()
    }
}
