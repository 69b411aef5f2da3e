//! Retrying, breaker-, rate-limit-, and cache-aware wrapper around a
//! `DataSource` (C2, spec §4.2).
//!
//! Mirrors the shape of the teacher's
//! `fetch_token_data_with_retries`/`fetch_token_data` pair — an outer
//! `Retry::spawn` over an exponential backoff wrapping an inner fetch — but
//! the inner fetch now also consults the circuit breaker and rate limiter
//! before calling the source, and every attempt (success or failure) is
//! recorded to the SLA tracker. The outer `fetch` implements spec §4.2's
//! full contract: `rate_limit.acquire → cache.lookup → [breaker.call(http)
//! if needed] → cache.store → sla.record`.

use crate::error::FetchError;
use crate::ingestion::{CachePolicy, DataSource};
use crate::model::Feature;
use crate::reliability::{AdaptiveCache, ReliabilityHub};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{instrument, warn};

pub struct IngestionClient {
    source: Arc<dyn DataSource>,
    reliability: Arc<ReliabilityHub>,
    cache: Arc<AdaptiveCache<Vec<Feature>>>,
    base_requests_per_second: u32,
    retry_attempts: usize,
    /// How long `fetch_once` will wait for a rate-limit token before
    /// returning `RateLimited` (spec §4.1/§8's `acquire(n, timeout)`
    /// contract). Zero reproduces the previous non-blocking check.
    rate_limit_timeout: Duration,
}

impl IngestionClient {
    pub fn new(
        source: Arc<dyn DataSource>,
        reliability: Arc<ReliabilityHub>,
        cache: Arc<AdaptiveCache<Vec<Feature>>>,
        base_requests_per_second: u32,
        retry_attempts: usize,
        rate_limit_timeout: Duration,
    ) -> Self {
        Self { source, reliability, cache, base_requests_per_second, retry_attempts, rate_limit_timeout }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Fetch features for `token` under `policy`'s cache interaction
    /// (spec §4.2): `ReadThrough` serves a fresh cache entry and populates
    /// on miss; `Bypass` always hits the source and refreshes the entry
    /// regardless; `RevalidateIfStale` serves whatever is cached (if any)
    /// immediately while a background task refreshes the entry — the
    /// stale-while-revalidate mode spec §4.1 permits per call.
    #[instrument(skip(self), fields(source = %self.source.name(), token = %token))]
    pub async fn fetch(&self, token: &str, policy: CachePolicy) -> Result<Vec<Feature>, FetchError> {
        let key = cache_key(self.source.name(), token);

        match policy {
            CachePolicy::ReadThrough => {
                if let Some(cached) = self.cache.get(&key) {
                    return Ok(cached);
                }
                self.fetch_and_cache(token, &key).await
            }
            CachePolicy::Bypass => self.fetch_and_cache(token, &key).await,
            CachePolicy::RevalidateIfStale => {
                let cached = self.cache.get(&key);
                self.spawn_background_refresh(token.to_string(), key);
                match cached {
                    Some(features) => Ok(features),
                    None => self.fetch_once_retried(token).await,
                }
            }
        }
    }

    async fn fetch_and_cache(&self, token: &str, key: &str) -> Result<Vec<Feature>, FetchError> {
        let result = self.fetch_once_retried(token).await;
        if let Ok(features) = &result {
            self.cache.put(key, features.clone());
        }
        result
    }

    /// Fire-and-forget refresh used by `RevalidateIfStale`: reuses the same
    /// breaker/rate-limit/sla-wrapped path on a cloned handle so the
    /// refresh competes fairly with foreground fetches instead of
    /// bypassing reliability bookkeeping.
    fn spawn_background_refresh(&self, token: String, key: String) {
        let refresher = IngestionClient {
            source: Arc::clone(&self.source),
            reliability: Arc::clone(&self.reliability),
            cache: Arc::clone(&self.cache),
            base_requests_per_second: self.base_requests_per_second,
            retry_attempts: self.retry_attempts,
            rate_limit_timeout: self.rate_limit_timeout,
        };
        tokio::spawn(async move {
            if let Ok(features) = refresher.fetch_once_retried(&token).await {
                refresher.cache.put(&key, features);
            }
        });
    }

    async fn fetch_once_retried(&self, token: &str) -> Result<Vec<Feature>, FetchError> {
        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        Retry::spawn(retry_strategy, || self.fetch_once(token)).await
    }

    async fn fetch_once(&self, token: &str) -> Result<Vec<Feature>, FetchError> {
        let name = self.source.name().to_string();

        {
            let mut breaker = self.reliability.breaker.lock();
            if !breaker.allow(&name) {
                return Err(FetchError::CircuitOpen);
            }
        }
        self.reliability
            .acquire_rate_limit(&name, self.base_requests_per_second, 1, self.rate_limit_timeout)
            .await?;

        let start = Instant::now();
        let result = self.source.fetch(token).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let success = result.is_ok();
        self.reliability.sla.lock().record(&name, latency_ms, success);
        self.reliability.rate_limiter.lock().record_request_result(&name, success, self.base_requests_per_second);

        match &result {
            Ok(_) => self.reliability.breaker.lock().record_success(&name),
            Err(e) if e.counts_as_breaker_failure() => {
                self.reliability.breaker.lock().record_failure(&name);
                warn!("fetch from {name} failed: {e}");
            }
            Err(e) => warn!("fetch from {name} returned non-breaker error: {e}"),
        }

        result
    }
}

fn cache_key(source: &str, token: &str) -> String {
    format!("{source}:{token}")
}

trait RateLimiterResultExt {
    fn record_request_result(&mut self, source: &str, success: bool, base_requests_per_second: u32);
}

impl RateLimiterResultExt for crate::reliability::AdaptiveRateLimiter {
    fn record_request_result(&mut self, source: &str, success: bool, base_requests_per_second: u32) {
        if success {
            self.record_success(source, base_requests_per_second);
        } else {
            self.record_failure(source, base_requests_per_second);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureCategory, FeatureValue, Provenance};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        name: String,
        fail_first_n: AtomicUsize,
    }

    #[async_trait]
    impl DataSource for FlakySource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&self, token: &str) -> Result<Vec<Feature>, FetchError> {
            if self.fail_first_n.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(FetchError::Timeout);
            }
            Ok(vec![Feature {
                token: token.to_string(),
                name: "sentiment".into(),
                value: FeatureValue::Numeric(0.5),
                timestamp: 0,
                confidence: 1.0,
                category: FeatureCategory::Sentiment,
                provenance: Provenance {
                    source: self.name.clone(),
                    endpoint: "mock".into(),
                    request_id: "r1".into(),
                    fetched_at: 0,
                },
            }])
        }
    }

    fn hub() -> Arc<ReliabilityHub> {
        Arc::new(ReliabilityHub::new(3, 60, 20, 0.5, 0.9, 0.5))
    }

    fn cache() -> Arc<AdaptiveCache<Vec<Feature>>> {
        Arc::new(AdaptiveCache::new(100, Duration::from_secs(60), Duration::from_secs(300), 0.5, 3.0))
    }

    #[tokio::test]
    async fn retries_until_success() {
        let source: Arc<dyn DataSource> = Arc::new(FlakySource {
            name: "flaky".into(),
            fail_first_n: AtomicUsize::new(2),
        });
        let client = IngestionClient::new(source, hub(), cache(), 20, 5, Duration::ZERO);
        let result = client.fetch("PEPE", CachePolicy::ReadThrough).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_error() {
        let source: Arc<dyn DataSource> = Arc::new(FlakySource {
            name: "always-fails".into(),
            fail_first_n: AtomicUsize::new(100),
        });
        let client = IngestionClient::new(source, hub(), cache(), 20, 2, Duration::ZERO);
        let result = client.fetch("PEPE", CachePolicy::ReadThrough).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_calling_source() {
        let source: Arc<dyn DataSource> = Arc::new(FlakySource {
            name: "breaker-test".into(),
            fail_first_n: AtomicUsize::new(0),
        });
        let reliability = hub();
        {
            let mut breaker = reliability.breaker.lock();
            for _ in 0..3 {
                breaker.record_failure("breaker-test");
            }
        }
        let client = IngestionClient::new(source, reliability, cache(), 20, 0, Duration::ZERO);
        let result = client.fetch("PEPE", CachePolicy::ReadThrough).await;
        assert_eq!(result.unwrap_err(), FetchError::CircuitOpen);
    }

    #[tokio::test]
    async fn read_through_serves_cached_value_without_refetching() {
        let source: Arc<dyn DataSource> = Arc::new(FlakySource {
            name: "cached".into(),
            fail_first_n: AtomicUsize::new(0),
        });
        let client = IngestionClient::new(source, hub(), cache(), 20, 1, Duration::ZERO);

        let first = client.fetch("PEPE", CachePolicy::ReadThrough).await.unwrap();
        let second = client.fetch("PEPE", CachePolicy::ReadThrough).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn bypass_refreshes_the_cache_entry() {
        let source: Arc<dyn DataSource> = Arc::new(FlakySource {
            name: "bypass".into(),
            fail_first_n: AtomicUsize::new(0),
        });
        let shared_cache = cache();
        let client = IngestionClient::new(source, hub(), shared_cache.clone(), 20, 1, Duration::ZERO);

        client.fetch("PEPE", CachePolicy::Bypass).await.unwrap();
        assert!(shared_cache.get(&cache_key("bypass", "PEPE")).is_some());
    }
}
