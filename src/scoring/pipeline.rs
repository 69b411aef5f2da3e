//! Weighted composite scoring pipeline — "GemScore" (C5, spec §4.5).
//!
//! Shape follows `OracleScorer::score_candidate` /
//! `calculate_predicted_score`: normalize each feature, weight-sum to a
//! `[0, 100]` score, then attach a confidence and per-feature contribution
//! breakdown. Unlike the teacher's fixed nine-`Feature`-enum loop, this
//! iterates over whatever feature names the active `FeatureWeights`
//! configures, so the weight set is entirely config-driven.

use crate::model::{Feature, FeatureWeights, GemScoreSnapshot, ScanStatus, SnapshotMetadata};
use crate::scoring::normalize::Transform;
use std::collections::HashMap;

/// Missing-data policy (spec §4.5, Open Question resolved in
/// `DESIGN.md`): a feature absent from `latest_features` contributes
/// value 0.0 at confidence 0.0, so it drags the weighted average down
/// without crashing the scan. The source is recorded in
/// `SnapshotMetadata::missing_sources` for auditability.
pub fn score(
    token: &str,
    timestamp: i64,
    latest_features: &HashMap<String, Feature>,
    weights: &FeatureWeights,
    transforms: &HashMap<String, Transform>,
) -> GemScoreSnapshot {
    let mut weighted_sum = 0.0;
    let mut confidence_weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut normalized = HashMap::new();
    let mut contributions = HashMap::new();
    let mut missing_sources = Vec::new();

    for name in weights.names() {
        let weight = weights.get(name).unwrap_or(0.0);
        total_weight += weight;

        let (normalized_value, confidence) = match latest_features.get(name) {
            Some(feature) => {
                let transform = transforms.get(name);
                let value = match transform {
                    Some(t) => t.apply(&feature.value),
                    None => feature.value.as_f64().unwrap_or(0.0).clamp(0.0, 1.0),
                };
                (value, feature.confidence)
            }
            None => {
                missing_sources.push(name.to_string());
                (0.0, 0.0)
            }
        };

        normalized.insert(name.to_string(), normalized_value);
        weighted_sum += weight * normalized_value;
        confidence_weighted_sum += weight * confidence;
        contributions.insert(name.to_string(), 100.0 * weight * normalized_value);
    }

    let score = if total_weight > 0.0 { (100.0 * weighted_sum / total_weight).min(100.0) } else { 0.0 };
    let confidence = if total_weight > 0.0 { (confidence_weighted_sum / total_weight).clamp(0.0, 1.0) } else { 0.0 };

    let status = if missing_sources.is_empty() {
        ScanStatus::Success
    } else if missing_sources.len() < weights.0.len() {
        ScanStatus::Partial
    } else {
        ScanStatus::Failed
    };

    GemScoreSnapshot {
        token: token.to_string(),
        timestamp,
        score,
        confidence,
        features: normalized,
        contributions,
        metadata: SnapshotMetadata { missing_sources, status, extra_features: HashMap::new() },
    }
}
