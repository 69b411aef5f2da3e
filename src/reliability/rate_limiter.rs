//! Adaptive per-source rate limiting (C1, spec §4.1).
//!
//! Wraps a `governor` token bucket the same way the original adaptive
//! limiter did, generalized to key off source name instead of a single
//! global quota, and to gate on `ConfigError`-free construction.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

struct LimiterState {
    limiter: DefaultDirectRateLimiter,
    base_quota: u32,
    current_quota: u32,
    min_quota: u32,
    max_quota: u32,
    error_window: VecDeque<bool>,
    window_size: usize,
    error_threshold: f64,
    last_adjustment: Instant,
    adjustment_interval: Duration,
}

impl LimiterState {
    fn new(base_requests_per_second: u32, window_size: usize, error_threshold: f64) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(base_requests_per_second).unwrap_or_else(|| NonZeroU32::new(10).unwrap()),
        );
        Self {
            limiter: GovernorRateLimiter::direct(quota),
            base_quota: base_requests_per_second,
            current_quota: base_requests_per_second,
            min_quota: (base_requests_per_second / 4).max(1),
            max_quota: base_requests_per_second * 2,
            error_window: VecDeque::new(),
            window_size,
            error_threshold,
            last_adjustment: Instant::now(),
            adjustment_interval: Duration::from_secs(30),
        }
    }

    fn error_rate(&self) -> f64 {
        if self.error_window.is_empty() {
            return 0.0;
        }
        let errors = self.error_window.iter().filter(|s| !**s).count();
        errors as f64 / self.error_window.len() as f64
    }

    fn should_adjust(&self) -> bool {
        self.error_window.len() >= self.window_size / 2
            && self.last_adjustment.elapsed() >= self.adjustment_interval
    }

    fn adjust(&mut self) {
        let error_rate = self.error_rate();
        let old_quota = self.current_quota;

        if error_rate > self.error_threshold {
            let reduction = 1.0 - (error_rate - self.error_threshold) * 0.5;
            self.current_quota = (((self.current_quota as f64) * reduction) as u32).max(self.min_quota);
        } else if error_rate < self.error_threshold * 0.5 {
            let increase = 1.0 + (self.error_threshold * 0.5 - error_rate) * 0.2;
            self.current_quota =
                (((self.current_quota as f64) * increase) as u32).min(self.max_quota).min(self.base_quota);
        }

        if self.current_quota != old_quota {
            let new_quota = Quota::per_second(
                NonZeroU32::new(self.current_quota).unwrap_or_else(|| NonZeroU32::new(1).unwrap()),
            );
            self.limiter = GovernorRateLimiter::direct(new_quota);
            self.last_adjustment = Instant::now();
            if self.current_quota < old_quota {
                warn!("reducing quota {old_quota} -> {} req/s ({:.1}% errors)", self.current_quota, error_rate * 100.0);
            } else {
                debug!("restoring quota {old_quota} -> {} req/s ({:.1}% errors)", self.current_quota, error_rate * 100.0);
            }
        }
    }

    fn record(&mut self, success: bool) {
        self.error_window.push_back(success);
        while self.error_window.len() > self.window_size {
            self.error_window.pop_front();
        }
        if self.should_adjust() {
            self.adjust();
        }
    }
}

/// One adaptive limiter per source, created lazily on first use with the
/// source's configured base quota.
pub struct AdaptiveRateLimiter {
    sources: HashMap<String, LimiterState>,
    window_size: usize,
    error_threshold: f64,
}

impl AdaptiveRateLimiter {
    pub fn new(window_size: usize, error_threshold: f64) -> Self {
        Self { sources: HashMap::new(), window_size, error_threshold }
    }

    fn state_mut(&mut self, source: &str, base_requests_per_second: u32) -> &mut LimiterState {
        self.sources
            .entry(source.to_string())
            .or_insert_with(|| LimiterState::new(base_requests_per_second, self.window_size, self.error_threshold))
    }

    /// Non-blocking check: true if a request may proceed right now.
    #[instrument(skip(self))]
    pub fn check(&mut self, source: &str, base_requests_per_second: u32) -> bool {
        self.state_mut(source, base_requests_per_second).limiter.check().is_ok()
    }

    pub fn record_success(&mut self, source: &str, base_requests_per_second: u32) {
        self.state_mut(source, base_requests_per_second).record(true);
    }

    pub fn record_failure(&mut self, source: &str, base_requests_per_second: u32) {
        self.state_mut(source, base_requests_per_second).record(false);
    }

    pub fn current_quota(&self, source: &str) -> Option<u32> {
        self.sources.get(source).map(|s| s.current_quota)
    }

    pub fn reset(&mut self, source: &str) {
        if let Some(state) = self.sources.get_mut(source) {
            state.current_quota = state.base_quota;
            state.error_window.clear();
            let quota = Quota::per_second(NonZeroU32::new(state.base_quota).unwrap_or_else(|| NonZeroU32::new(1).unwrap()));
            state.limiter = GovernorRateLimiter::direct(quota);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_first_request() {
        let mut limiter = AdaptiveRateLimiter::new(20, 0.2);
        assert!(limiter.check("src", 10));
    }

    #[test]
    fn tracks_error_rate_per_source() {
        let mut limiter = AdaptiveRateLimiter::new(10, 0.2);
        for _ in 0..8 {
            limiter.record_success("src", 20);
        }
        for _ in 0..2 {
            limiter.record_failure("src", 20);
        }
        let state = limiter.sources.get("src").unwrap();
        assert!((state.error_rate() - 0.2).abs() < 0.01);
    }

    #[test]
    fn quota_reduces_on_sustained_errors() {
        let mut limiter = AdaptiveRateLimiter::new(10, 0.2);
        for _ in 0..3 {
            limiter.record_success("src", 20);
        }
        for _ in 0..7 {
            limiter.record_failure("src", 20);
        }
        let state = limiter.sources.get_mut("src").unwrap();
        state.last_adjustment = Instant::now() - Duration::from_secs(60);
        state.adjust();
        assert!(state.current_quota < 20);
        assert!(state.current_quota >= state.min_quota);
    }

    #[test]
    fn reset_restores_base_quota() {
        let mut limiter = AdaptiveRateLimiter::new(10, 0.2);
        for _ in 0..7 {
            limiter.record_failure("src", 20);
        }
        let state = limiter.sources.get_mut("src").unwrap();
        state.last_adjustment = Instant::now() - Duration::from_secs(60);
        state.adjust();
        limiter.reset("src");
        assert_eq!(limiter.current_quota("src"), Some(20));
    }

    #[test]
    fn sources_are_independent() {
        let mut limiter = AdaptiveRateLimiter::new(10, 0.2);
        for _ in 0..7 {
            limiter.record_failure("a", 20);
        }
        limiter.record_success("b", 20);
        assert_eq!(limiter.current_quota("b"), Some(20));
    }
}
