//! Per-source circuit breaker (C1, spec §4.1).
//!
//! Three states — `Closed` (healthy), `Open` (quarantined), `HalfOpen`
//! (single-probe recovery) — tracked per source name. Generalized from a
//! per-RPC-endpoint health tracker into a per-data-source one; the
//! state-transition shape (threshold -> open, cooldown elapsed -> half-open
//! probe, probe success -> closed) is unchanged.

use crate::model::BreakerState;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
struct SourceHealth {
    state: BreakerState,
    consecutive_failures: u32,
    success_rate: f64,
    recent_attempts: Vec<bool>,
    cooldown_start: Option<Instant>,
    /// Set while a `HalfOpen` probe is outstanding, so concurrent callers
    /// don't all get treated as the probe.
    probe_in_flight: bool,
}

impl SourceHealth {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            success_rate: 1.0,
            recent_attempts: Vec::new(),
            cooldown_start: None,
            probe_in_flight: false,
        }
    }

    fn record(&mut self, success: bool) {
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.recent_attempts.push(success);
        if self.recent_attempts.len() > 100 {
            self.recent_attempts.remove(0);
        }
        let successes = self.recent_attempts.iter().filter(|s| **s).count();
        self.success_rate = successes as f64 / self.recent_attempts.len() as f64;
    }
}

/// Tracks breaker state for every source the engine fetches from.
pub struct CircuitBreaker {
    health: HashMap<String, SourceHealth>,
    failure_threshold: u32,
    cooldown_duration: Duration,
    min_success_rate: f64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_seconds: u64) -> Self {
        Self {
            health: HashMap::new(),
            failure_threshold,
            cooldown_duration: Duration::from_secs(cooldown_seconds),
            min_success_rate: 0.3,
        }
    }

    /// Whether a request to `source` should be attempted right now. A
    /// `HalfOpen` source grants exactly one in-flight probe at a time; every
    /// other concurrent caller is told `false` until the probe resolves.
    #[instrument(skip(self), fields(source = %source))]
    pub fn allow(&mut self, source: &str) -> bool {
        let health = self.health.entry(source.to_string()).or_insert_with(SourceHealth::new);

        match health.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                if health.probe_in_flight {
                    false
                } else {
                    health.probe_in_flight = true;
                    true
                }
            }
            BreakerState::Open => {
                if let Some(start) = health.cooldown_start {
                    if start.elapsed() >= self.cooldown_duration {
                        health.state = BreakerState::HalfOpen;
                        health.cooldown_start = None;
                        health.probe_in_flight = true;
                        debug!("source {source} cooldown elapsed, probing");
                        true
                    } else {
                        false
                    }
                } else {
                    true
                }
            }
        }
    }

    #[instrument(skip(self), fields(source = %source))]
    pub fn record_success(&mut self, source: &str) {
        let health = self.health.entry(source.to_string()).or_insert_with(SourceHealth::new);
        health.record(true);
        let was_half_open = health.state == BreakerState::HalfOpen;
        health.probe_in_flight = false;
        if was_half_open {
            health.state = BreakerState::Closed;
            health.consecutive_failures = 0;
            debug!("source {source} probe succeeded, closing breaker");
        }
    }

    #[instrument(skip(self), fields(source = %source))]
    pub fn record_failure(&mut self, source: &str) {
        let health = self.health.entry(source.to_string()).or_insert_with(SourceHealth::new);
        health.record(false);
        health.probe_in_flight = false;

        let should_open = match health.state {
            BreakerState::Closed => health.consecutive_failures >= self.failure_threshold,
            BreakerState::HalfOpen => true,
            BreakerState::Open => false,
        } || (health.recent_attempts.len() >= 10 && health.success_rate < self.min_success_rate);

        if should_open && health.state != BreakerState::Open {
            health.state = BreakerState::Open;
            health.cooldown_start = Some(Instant::now());
            warn!(
                "source {source} opening breaker: {} consecutive failures, {:.1}% success rate",
                health.consecutive_failures,
                health.success_rate * 100.0
            );
        }
    }

    pub fn state(&self, source: &str) -> BreakerState {
        self.health.get(source).map(|h| h.state).unwrap_or(BreakerState::Closed)
    }

    pub fn success_rate(&self, source: &str) -> f64 {
        self.health.get(source).map(|h| h.success_rate).unwrap_or(1.0)
    }

    pub fn reset_all(&mut self) {
        for health in self.health.values_mut() {
            *health = SourceHealth::new();
        }
    }
}
