//! Pluggable adaptive weight adjustment, generalized from
//! `oracle::weights::AdaptiveWeights`'s fixed `Feature` enum to arbitrary
//! feature names, and from wall-clock-gated recalculation to an explicit
//! `recalculate` call the orchestrator drives by scan count
//! (`determinism.adaptive_recalc_interval`) so the scoring pipeline never
//! reads the clock on its own (spec §4.5 determinism requirement).

use crate::model::GemScoreSnapshot;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct FeaturePerformance {
    successful_scores: Vec<f64>,
    failed_scores: Vec<f64>,
    effectiveness: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl FeaturePerformance {
    fn recompute_effectiveness(&mut self) {
        let success_mean = mean(&self.successful_scores);
        let failure_mean = mean(&self.failed_scores);
        // Higher mean on successes than failures means this feature is
        // discriminating well; clamp to a sane [-1, 1] adjustment input.
        self.effectiveness = (success_mean - failure_mean).clamp(-1.0, 1.0);
    }
}

/// Wraps base weights with a dynamic per-feature adjustment in
/// `[-adaptation_rate, +adaptation_rate]` of the base value, derived from
/// how well each feature discriminated high-scoring snapshots from
/// low-scoring ones in the most recent `recalculate` batch.
pub struct AdaptiveWeights {
    base_weights: HashMap<String, f64>,
    adjustments: HashMap<String, f64>,
    performance: HashMap<String, FeaturePerformance>,
    adaptation_rate: f64,
    recalculation_count: u64,
}

impl AdaptiveWeights {
    pub fn new(base_weights: HashMap<String, f64>, adaptation_rate: f64) -> Self {
        let performance = base_weights.keys().map(|k| (k.clone(), FeaturePerformance::default())).collect();
        Self {
            base_weights,
            adjustments: HashMap::new(),
            performance,
            adaptation_rate,
            recalculation_count: 0,
        }
    }

    /// Base weight adjusted by this feature's current effectiveness,
    /// clamped to `[0.01, 1.0]` the way the teacher kept weights in a
    /// "reasonable" band regardless of how extreme the adjustment got, then
    /// renormalized so the result still sums to 1.0 — the scoring pipeline's
    /// weight-sum invariant (spec §3) holds for adapted weights exactly as
    /// it does for the base configuration.
    pub fn effective_weights(&self) -> HashMap<String, f64> {
        let raw: HashMap<String, f64> = self
            .base_weights
            .iter()
            .map(|(name, base)| {
                let adjustment = self.adjustments.get(name).copied().unwrap_or(0.0);
                (name.clone(), (base * (1.0 + adjustment)).clamp(0.01, 1.0))
            })
            .collect();
        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            return raw;
        }
        raw.into_iter().map(|(name, w)| (name, w / total)).collect()
    }

    /// Recompute adjustments from a batch of recent snapshots, splitting
    /// into "successful" (score >= 80) and "failed" (score < 50) the same
    /// way the teacher separated scored candidates before measuring each
    /// feature's discriminative power.
    pub fn recalculate(&mut self, recent_snapshots: &[GemScoreSnapshot]) {
        if recent_snapshots.is_empty() {
            return;
        }

        let successful: Vec<&GemScoreSnapshot> = recent_snapshots.iter().filter(|s| s.score >= 80.0).collect();
        let failed: Vec<&GemScoreSnapshot> = recent_snapshots.iter().filter(|s| s.score < 50.0).collect();

        for name in self.base_weights.keys().cloned().collect::<Vec<_>>() {
            let perf = self.performance.entry(name.clone()).or_default();
            perf.successful_scores = successful.iter().filter_map(|s| s.features.get(&name).copied()).collect();
            perf.failed_scores = failed.iter().filter_map(|s| s.features.get(&name).copied()).collect();
            perf.recompute_effectiveness();
            self.adjustments.insert(name, perf.effectiveness * self.adaptation_rate);
        }

        self.recalculation_count += 1;
    }

    pub fn recalculation_count(&self) -> u64 {
        self.recalculation_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ScanStatus, SnapshotMetadata};

    fn snapshot(score: f64, feature_value: f64) -> GemScoreSnapshot {
        let mut features = HashMap::new();
        features.insert("sentiment".to_string(), feature_value);
        GemScoreSnapshot {
            token: "PEPE".into(),
            timestamp: 0,
            score,
            confidence: 1.0,
            contributions: features.clone(),
            features,
            metadata: SnapshotMetadata { missing_sources: vec![], status: ScanStatus::Success, extra_features: HashMap::new() },
        }
    }

    #[test]
    fn no_adjustment_before_any_recalculation() {
        // A realistic base weight set already sums to 1.0 (as
        // `FeatureWeights::validated` would require), so with zero
        // adjustment the renormalization step is a no-op.
        let mut weights = HashMap::new();
        weights.insert("sentiment".to_string(), 1.0);
        let adaptive = AdaptiveWeights::new(weights.clone(), 0.1);
        assert_eq!(adaptive.effective_weights(), weights);
    }

    fn two_feature_snapshot(score: f64, sentiment: f64, narrative: f64) -> GemScoreSnapshot {
        let mut features = HashMap::new();
        features.insert("sentiment".to_string(), sentiment);
        features.insert("narrative".to_string(), narrative);
        GemScoreSnapshot {
            token: "PEPE".into(),
            timestamp: 0,
            score,
            confidence: 1.0,
            contributions: features.clone(),
            features,
            metadata: SnapshotMetadata { missing_sources: vec![], status: ScanStatus::Success, extra_features: HashMap::new() },
        }
    }

    #[test]
    fn discriminating_feature_gets_boosted() {
        let mut weights = HashMap::new();
        weights.insert("sentiment".to_string(), 0.5);
        weights.insert("narrative".to_string(), 0.5);
        let mut adaptive = AdaptiveWeights::new(weights, 0.1);

        // `sentiment` separates successes from failures cleanly; `narrative`
        // doesn't move at all, so it has zero discriminative power.
        let snapshots = vec![
            two_feature_snapshot(90.0, 0.9, 0.5),
            two_feature_snapshot(90.0, 0.9, 0.5),
            two_feature_snapshot(30.0, 0.1, 0.5),
        ];
        adaptive.recalculate(&snapshots);

        let effective = adaptive.effective_weights();
        assert!(effective["sentiment"] > effective["narrative"]);
        assert!(effective["sentiment"] > 0.5);
    }

    #[test]
    fn weights_stay_within_bounds() {
        let mut weights = HashMap::new();
        weights.insert("sentiment".to_string(), 0.99);
        weights.insert("narrative".to_string(), 0.01);
        let mut adaptive = AdaptiveWeights::new(weights, 10.0);
        let snapshots = vec![two_feature_snapshot(90.0, 1.0, 0.0), two_feature_snapshot(30.0, 0.0, 1.0)];
        adaptive.recalculate(&snapshots);
        let effective = adaptive.effective_weights();
        for w in effective.values() {
            assert!(*w >= 0.0 && *w <= 1.0);
        }
        let sum: f64 = effective.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut weights = HashMap::new();
        weights.insert("sentiment".to_string(), 0.5);
        let mut adaptive = AdaptiveWeights::new(weights, 0.1);
        adaptive.recalculate(&[]);
        assert_eq!(adaptive.recalculation_count(), 0);
    }
}
