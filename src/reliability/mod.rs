//! C1: Source reliability — circuit breaking, adaptive rate limiting,
//! TTL caching, and SLA tracking for every external data source.

pub mod cache;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod sla;

pub use cache::AdaptiveCache;
pub use circuit_breaker::CircuitBreaker;
pub use rate_limiter::AdaptiveRateLimiter;
pub use sla::SlaTracker;

use crate::error::FetchError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bundles the three per-source reliability mechanisms so `ingestion` and
/// `orchestrator` only need to hold one handle.
pub struct ReliabilityHub {
    pub breaker: Arc<Mutex<CircuitBreaker>>,
    pub rate_limiter: Arc<Mutex<AdaptiveRateLimiter>>,
    pub sla: Arc<Mutex<SlaTracker>>,
}

impl ReliabilityHub {
    pub fn new(
        failure_threshold: u32,
        cooldown_seconds: u64,
        rate_window_size: usize,
        rate_error_threshold: f64,
        sla_degraded_below: f64,
        sla_failed_below: f64,
    ) -> Self {
        Self {
            breaker: Arc::new(Mutex::new(CircuitBreaker::new(failure_threshold, cooldown_seconds))),
            rate_limiter: Arc::new(Mutex::new(AdaptiveRateLimiter::new(rate_window_size, rate_error_threshold))),
            sla: Arc::new(Mutex::new(SlaTracker::new(sla_degraded_below, sla_failed_below))),
        }
    }

    /// Acquire `n` rate-limit tokens for `source`, polling in small
    /// increments until either all `n` are granted or `timeout` elapses
    /// (spec §4.1/§8's `acquire(n, timeout)` contract). `timeout ==
    /// Duration::ZERO` degrades to a single non-blocking check, matching the
    /// pre-existing `check()`-only behavior exactly.
    pub async fn acquire_rate_limit(
        &self,
        source: &str,
        base_requests_per_second: u32,
        n: u32,
        timeout: Duration,
    ) -> Result<(), FetchError> {
        const POLL_INTERVAL: Duration = Duration::from_millis(5);
        let n = n.max(1);
        let deadline = Instant::now() + timeout;
        let mut acquired = 0u32;
        loop {
            let granted = self.rate_limiter.lock().check(source, base_requests_per_second);
            if granted {
                acquired += 1;
                if acquired >= n {
                    return Ok(());
                }
                continue;
            }
            if Instant::now() >= deadline {
                return Err(FetchError::RateLimited);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
