//! Per-source SLA tracking: latency percentiles and rolling success rate
//! (C1, spec §3/§4.1).
//!
//! Percentiles are approximate, computed from a bounded rolling sample
//! rather than an exact order statistic, the same tradeoff the teacher's
//! endpoint-health tracker made for success rate (fixed-size rolling
//! window, recompute on every record) — exactness isn't needed for
//! degrade/recover decisions, only a stable approximation.

use crate::model::{SourceHealth, SourceSla};
use std::collections::{HashMap, VecDeque};

const SAMPLE_WINDOW: usize = 200;

struct SourceSamples {
    latencies_ms: VecDeque<f64>,
    outcomes: VecDeque<bool>,
    total_attempts: u64,
    total_successes: u64,
}

impl SourceSamples {
    fn new() -> Self {
        Self {
            latencies_ms: VecDeque::new(),
            outcomes: VecDeque::new(),
            total_attempts: 0,
            total_successes: 0,
        }
    }

    fn record(&mut self, latency_ms: f64, success: bool) {
        self.latencies_ms.push_back(latency_ms);
        if self.latencies_ms.len() > SAMPLE_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.outcomes.push_back(success);
        if self.outcomes.len() > SAMPLE_WINDOW {
            self.outcomes.pop_front();
        }
        self.total_attempts += 1;
        if success {
            self.total_successes += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.outcomes.iter().filter(|s| **s).count();
        successes as f64 / self.outcomes.len() as f64
    }

    fn uptime_pct(&self) -> f64 {
        if self.total_attempts == 0 {
            return 100.0;
        }
        100.0 * self.total_successes as f64 / self.total_attempts as f64
    }
}

/// Aggregates `SourceSla` readings for every configured source.
pub struct SlaTracker {
    samples: HashMap<String, SourceSamples>,
    degraded_below: f64,
    failed_below: f64,
}

impl SlaTracker {
    pub fn new(degraded_below: f64, failed_below: f64) -> Self {
        Self { samples: HashMap::new(), degraded_below, failed_below }
    }

    pub fn record(&mut self, source: &str, latency_ms: f64, success: bool) {
        self.samples.entry(source.to_string()).or_insert_with(SourceSamples::new).record(latency_ms, success);
    }

    pub fn snapshot(&self, source: &str) -> SourceSla {
        let empty = SourceSamples::new();
        let samples = self.samples.get(source).unwrap_or(&empty);
        let success_rate = samples.success_rate();
        let state = if success_rate < self.failed_below {
            SourceHealth::Failed
        } else if success_rate < self.degraded_below {
            SourceHealth::Degraded
        } else {
            SourceHealth::Healthy
        };

        SourceSla {
            source_name: source.to_string(),
            latency_p50_ms: samples.percentile(0.50),
            latency_p95_ms: samples.percentile(0.95),
            latency_p99_ms: samples.percentile(0.99),
            success_rate,
            uptime_pct: samples.uptime_pct(),
            state,
        }
    }

    pub fn all_sources(&self) -> Vec<String> {
        self.samples.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_reports_healthy_defaults() {
        let tracker = SlaTracker::new(0.9, 0.5);
        let sla = tracker.snapshot("unseen");
        assert_eq!(sla.success_rate, 1.0);
        assert_eq!(sla.state, SourceHealth::Healthy);
    }

    #[test]
    fn percentiles_reflect_recorded_latencies() {
        let mut tracker = SlaTracker::new(0.9, 0.5);
        for ms in [10.0, 20.0, 30.0, 40.0, 50.0] {
            tracker.record("a", ms, true);
        }
        let sla = tracker.snapshot("a");
        assert_eq!(sla.latency_p50_ms, 30.0);
        assert_eq!(sla.latency_p99_ms, 50.0);
    }

    #[test]
    fn degrades_below_threshold() {
        let mut tracker = SlaTracker::new(0.9, 0.5);
        for _ in 0..7 {
            tracker.record("a", 10.0, true);
        }
        for _ in 0..3 {
            tracker.record("a", 10.0, false);
        }
        let sla = tracker.snapshot("a");
        assert_eq!(sla.state, SourceHealth::Degraded);
    }

    #[test]
    fn fails_below_lower_threshold() {
        let mut tracker = SlaTracker::new(0.9, 0.5);
        for _ in 0..3 {
            tracker.record("a", 10.0, true);
        }
        for _ in 0..7 {
            tracker.record("a", 10.0, false);
        }
        let sla = tracker.snapshot("a");
        assert_eq!(sla.state, SourceHealth::Failed);
    }

    #[test]
    fn window_bounds_sample_size() {
        let mut tracker = SlaTracker::new(0.9, 0.5);
        for i in 0..(SAMPLE_WINDOW * 2) {
            tracker.record("a", i as f64, true);
        }
        let samples = tracker.samples.get("a").unwrap();
        assert_eq!(samples.latencies_ms.len(), SAMPLE_WINDOW);
    }
}
