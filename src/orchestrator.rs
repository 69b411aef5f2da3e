//! C8: Scan orchestrator — ties ingestion, freshness, the feature store,
//! scoring, alerts, and the outbox into the single `scan(token)` operation
//! spec §4.8 specifies.
//!
//! Fan-out shape is grounded on
//! `iOracle::quantum_oracle::PredictiveOracle`'s semaphore-bounded
//! `tokio::spawn` loop: every configured source is fetched concurrently,
//! bounded by a shared `Semaphore`, and a source failing never aborts the
//! scan — it just degrades that source's features to "missing" the way the
//! teacher's candidate processing tolerated a single RPC failure without
//! losing the whole batch.

use crate::alerts::AlertEngine;
use crate::error::EngineError;
use crate::ingestion::{CachePolicy, IngestionClient};
use crate::model::{AlertCandidate, FeatureValue, FeatureWeights, GemScoreSnapshot, ScanStatus};
use crate::outbox::OutboxDispatcher;
use crate::scoring::normalize::Transform;
use crate::scoring::AdaptiveWeights;
use crate::store::FeatureStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

/// Bounded adjustment `AdaptiveWeights` applies around each base weight
/// (spec §4.5's "pluggable post-construction adjustment"). Not exposed via
/// `Config` since only the recalculation cadence
/// (`determinism.adaptive_recalc_interval`) needs to be operator-tunable.
const ADAPTIVE_WEIGHT_ADAPTATION_RATE: f64 = 0.2;

struct AdaptiveState {
    weights: AdaptiveWeights,
    recent_snapshots: Vec<GemScoreSnapshot>,
}

/// Outcome of one `scan(token)` call — the summary spec §4.8 requires the
/// caller be able to read back without re-querying the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub token: String,
    pub score: f64,
    pub confidence: f64,
    pub status: ScanStatus,
    pub missing_sources: Vec<String>,
    pub rule_hits: Vec<String>,
}

pub struct Orchestrator {
    sources: Vec<Arc<IngestionClient>>,
    feature_store: Arc<dyn FeatureStore>,
    transforms: HashMap<String, Transform>,
    alert_engine: AlertEngine,
    outbox: Arc<OutboxDispatcher>,
    freshness: Arc<Mutex<crate::freshness::FreshnessTracker>>,
    concurrency: Arc<Semaphore>,
    scan_timeout: Duration,
    /// Scan-count-driven weight recalculation (spec §4.5). Gated behind a
    /// `Mutex` rather than threaded through `&mut self` since `scan` takes
    /// `&self` — the orchestrator is shared across concurrent scans.
    adaptive: Mutex<AdaptiveState>,
    recalc_interval: u32,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Arc<IngestionClient>>,
        feature_store: Arc<dyn FeatureStore>,
        weights: FeatureWeights,
        transforms: HashMap<String, Transform>,
        alert_engine: AlertEngine,
        outbox: Arc<OutboxDispatcher>,
        freshness: Arc<Mutex<crate::freshness::FreshnessTracker>>,
        max_concurrent_fetches: usize,
        scan_timeout_ms: u64,
        recalc_interval: u32,
    ) -> Self {
        Self {
            sources,
            feature_store,
            transforms,
            alert_engine,
            outbox,
            freshness,
            concurrency: Arc::new(Semaphore::new(max_concurrent_fetches.max(1))),
            scan_timeout: Duration::from_millis(scan_timeout_ms),
            adaptive: Mutex::new(AdaptiveState {
                weights: AdaptiveWeights::new(weights.0, ADAPTIVE_WEIGHT_ADAPTATION_RATE),
                recent_snapshots: Vec::new(),
            }),
            recalc_interval: recalc_interval.max(1),
        }
    }

    /// Ingest, score, diff, evaluate, and enqueue alerts for `token`, all
    /// bounded by the configured scan deadline (spec §5's per-call
    /// cancellation requirement).
    #[instrument(skip(self), fields(token = %token))]
    pub async fn scan(&self, token: &str, now: i64) -> Result<ScanOutcome, EngineError> {
        match tokio::time::timeout(self.scan_timeout, self.scan_inner(token, now)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ScanTimeout { token: token.to_string() }),
        }
    }

    async fn scan_inner(&self, token: &str, now: i64) -> Result<ScanOutcome, EngineError> {
        let fetch_results = self.fetch_all(token).await;

        let mut latest_features = HashMap::new();
        let mut missing_sources = Vec::new();

        for (source_name, result) in fetch_results {
            match result {
                Ok(features) => {
                    self.freshness.lock().record_success(&source_name, now);
                    for feature in features {
                        self.feature_store
                            .write_feature(&feature)
                            .await
                            .map_err(EngineError::Store)?;
                        latest_features.insert(feature.name.clone(), feature);
                    }
                }
                Err(e) => {
                    warn!("source '{source_name}' failed for {token}: {e}");
                    missing_sources.push(source_name);
                }
            }
        }

        // Weights used for *this* scan reflect whatever the last completed
        // recalculation produced; the batch this scan contributes to can
        // only affect the *next* recalculation, never the in-flight score
        // (spec §4.5 determinism requirement).
        let weights = FeatureWeights(self.adaptive.lock().weights.effective_weights());
        let snapshot = crate::scoring::score(token, now, &latest_features, &weights, &self.transforms);
        self.feature_store.write_snapshot(&snapshot).await.map_err(EngineError::Store)?;
        self.record_for_adaptive_recalculation(snapshot.clone());

        let delta = self.feature_store.compute_score_delta(token).await.map_err(EngineError::Store)?;
        let candidate = build_candidate(&snapshot, delta);

        let entries = self.alert_engine.evaluate(&candidate);
        let mut rule_hits = Vec::with_capacity(entries.len());
        for entry in entries {
            rule_hits.push(entry.rule_id.clone());
            self.outbox.enqueue(entry).await.map_err(EngineError::Store)?;
        }

        let mut all_missing = snapshot.metadata.missing_sources.clone();
        all_missing.extend(missing_sources);
        all_missing.sort();
        all_missing.dedup();

        Ok(ScanOutcome {
            token: token.to_string(),
            score: snapshot.score,
            confidence: snapshot.confidence,
            status: snapshot.metadata.status,
            missing_sources: all_missing,
            rule_hits,
        })
    }

    /// Fetch every configured source concurrently, bounded by
    /// `self.concurrency`. A panicking fetch task degrades to a missing
    /// source rather than propagating, matching the rest of this module's
    /// partial-failure tolerance.
    async fn fetch_all(&self, token: &str) -> Vec<(String, Result<Vec<crate::model::Feature>, crate::error::FetchError>)> {
        let mut set = JoinSet::new();
        for client in &self.sources {
            let client = Arc::clone(client);
            let permit = Arc::clone(&self.concurrency);
            let token = token.to_string();
            set.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("fetch semaphore closed");
                let name = client.source_name().to_string();
                let result = client.fetch(&token, CachePolicy::ReadThrough).await;
                (name, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => warn!("ingestion fetch task panicked: {e}"),
            }
        }
        results
    }

    /// Buffer `snapshot` for the next adaptive-weight recalculation and, once
    /// `recalc_interval` scans have accumulated, recompute the per-feature
    /// adjustments driving `effective_weights` for subsequent scans.
    fn record_for_adaptive_recalculation(&self, snapshot: GemScoreSnapshot) {
        let mut state = self.adaptive.lock();
        state.recent_snapshots.push(snapshot);
        if state.recent_snapshots.len() as u32 >= self.recalc_interval {
            let batch = std::mem::take(&mut state.recent_snapshots);
            state.weights.recalculate(&batch);
        }
    }
}

pub(crate) fn build_candidate(snapshot: &GemScoreSnapshot, delta: Option<crate::model::ScoreDelta>) -> AlertCandidate {
    let mut metrics: HashMap<String, FeatureValue> =
        snapshot.features.iter().map(|(name, value)| (name.clone(), FeatureValue::Numeric(*value))).collect();
    metrics.insert("gem_score".to_string(), FeatureValue::Numeric(snapshot.score));
    metrics.insert("confidence".to_string(), FeatureValue::Numeric(snapshot.confidence));
    if let Some(delta) = &delta {
        metrics.insert("delta_score".to_string(), FeatureValue::Numeric(delta.delta_score));
    }

    AlertCandidate {
        token: snapshot.token.clone(),
        timestamp: snapshot.timestamp,
        metrics,
        feature_diff: delta,
        prior_period: None,
        rule_ids_matched: vec![],
    }
}
