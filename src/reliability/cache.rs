//! Adaptive TTL cache fronting ingestion reads (C1/C2, spec §4.1/§4.2).
//!
//! Backed by `moka`'s synchronous cache the way the teacher's oracle used
//! `moka::future::Cache` to front RPC responses. `moka::sync::Cache` applies
//! a single `time_to_live` to every entry set at construction; there is no
//! per-entry override without implementing `moka::Expiry`, which this cache
//! does not do. `effective_ttl` tracks each key's recent hit rate and
//! reports the *widened* duration a hot key would warrant, but that number
//! is advisory only — callers (e.g. the freshness tracker) can use it to
//! reason about staleness, but the underlying cache still evicts every key
//! after the same fixed `default_ttl`.

use moka::sync::Cache;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct AccessLog {
    hits: VecDeque<Instant>,
    misses: VecDeque<Instant>,
}

impl AccessLog {
    fn new() -> Self {
        Self { hits: VecDeque::new(), misses: VecDeque::new() }
    }

    fn prune(&mut self, window: Duration) {
        let cutoff = Instant::now() - window;
        while self.hits.front().is_some_and(|t| *t < cutoff) {
            self.hits.pop_front();
        }
        while self.misses.front().is_some_and(|t| *t < cutoff) {
            self.misses.pop_front();
        }
    }

    fn hit_rate(&self) -> f64 {
        let total = self.hits.len() + self.misses.len();
        if total == 0 {
            return 0.0;
        }
        self.hits.len() as f64 / total as f64
    }
}

/// Per-key TTL cache with adaptive extension for hot keys.
///
/// `V` must be cheap to clone; callers store `Arc<T>` values when the
/// payload is large.
pub struct AdaptiveCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, V>,
    default_ttl: Duration,
    hot_window: Duration,
    hot_threshold: f64,
    adaptive_multiplier: f64,
    access_log: Arc<Mutex<std::collections::HashMap<String, AccessLog>>>,
}

impl<V: Clone + Send + Sync + 'static> AdaptiveCache<V> {
    pub fn new(max_entries: u64, default_ttl: Duration, hot_window: Duration, hot_threshold: f64, adaptive_multiplier: f64) -> Self {
        Self {
            inner: Cache::builder().max_capacity(max_entries).time_to_live(default_ttl).build(),
            default_ttl,
            hot_window,
            hot_threshold,
            adaptive_multiplier,
            access_log: Arc::new(Mutex::new(std::collections::HashMap::new())),
        }
    }

    /// Read-through: returns the cached value if present, else calls
    /// `populate` and inserts the result. The insert uses the cache's fixed
    /// `default_ttl` — see `effective_ttl` for why hot keys don't actually
    /// get a longer one yet.
    ///
    /// `populate` errors are not cached; a failed fetch leaves the key
    /// absent so the next read retries.
    pub fn get_or_populate<E>(
        &self,
        key: &str,
        populate: impl FnOnce() -> Result<V, E>,
    ) -> Result<(V, bool), E> {
        if let Some(value) = self.inner.get(key) {
            self.record(key, true);
            return Ok((value, true));
        }
        self.record(key, false);
        let value = populate()?;
        self.inner.insert(key.to_string(), value.clone());
        Ok((value, false))
    }

    /// Plain cache read, recording a hit/miss for the adaptive-TTL hit-rate
    /// window without populating on miss. Used by callers (the ingestion
    /// client) that need to decide *how* to populate based on the policy
    /// in effect, rather than always calling the same populate closure.
    pub fn get(&self, key: &str) -> Option<V> {
        let value = self.inner.get(key);
        self.record(key, value.is_some());
        value
    }

    /// Insert or overwrite `key`. Expires after `default_ttl` like every
    /// other entry; see `effective_ttl`.
    pub fn put(&self, key: &str, value: V) {
        self.inner.insert(key.to_string(), value);
    }

    /// TTL that `key`'s recent hit rate would justify if per-entry widening
    /// were enforced — `default_ttl * adaptive_multiplier` once the hit rate
    /// within `hot_window` reaches `hot_threshold`, else `default_ttl`. This
    /// is advisory: the cache itself still expires every entry after
    /// `default_ttl` (see the module doc).
    pub fn effective_ttl(&self, key: &str) -> Duration {
        let mut log = self.access_log.lock();
        if let Some(entry) = log.get_mut(key) {
            entry.prune(self.hot_window);
            if entry.hit_rate() >= self.hot_threshold {
                return self.default_ttl.mul_f64(self.adaptive_multiplier);
            }
        }
        self.default_ttl
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    fn record(&self, key: &str, hit: bool) {
        let mut log = self.access_log.lock();
        let entry = log.entry(key.to_string()).or_insert_with(AccessLog::new);
        entry.prune(self.hot_window);
        let now = Instant::now();
        if hit {
            entry.hits.push_back(now);
        } else {
            entry.misses.push_back(now);
        }
    }
}
