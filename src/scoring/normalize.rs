//! Normalization transforms: raw `FeatureValue` -> `[0, 1]` (spec §4.5).
//!
//! Mirrors the teacher's per-feature min/max clamp
//! (`compute_liquidity_score`'s "0.0 at min, 1.0 at 10x min") generalized
//! into a small set of reusable transform shapes keyed by feature name,
//! instead of one bespoke function per feature.

use crate::model::FeatureValue;
use std::collections::HashMap;

/// How a named feature's raw value maps onto `[0, 1]`.
#[derive(Debug, Clone)]
pub enum Transform {
    /// Linear clamp between `min` (-> 0.0) and `max` (-> 1.0).
    LinearClamp { min: f64, max: f64 },
    /// `log1p`-scaled linear clamp, for heavy-tailed counts (volume,
    /// holder counts) where a raw linear clamp would saturate instantly.
    LogClamp { min: f64, max: f64 },
    /// `true` -> 1.0, `false` -> 0.0.
    BooleanPassthrough,
    /// `true` -> 0.0, `false` -> 1.0 (for features where presence is bad,
    /// e.g. a rug-pull indicator).
    BooleanInverse,
    /// Exact-match lookup table for categorical values; unmatched values
    /// normalize to 0.0.
    Categorical(HashMap<String, f64>),
}

impl Transform {
    pub fn apply(&self, value: &FeatureValue) -> f64 {
        match (self, value) {
            (Transform::LinearClamp { min, max }, _) => {
                linear_clamp(value.as_f64().unwrap_or(0.0), *min, *max)
            }
            (Transform::LogClamp { min, max }, _) => {
                let raw = value.as_f64().unwrap_or(0.0).max(0.0);
                linear_clamp((1.0 + raw).ln(), (1.0 + min).ln(), (1.0 + max).ln())
            }
            (Transform::BooleanPassthrough, FeatureValue::Boolean(b)) => if *b { 1.0 } else { 0.0 },
            (Transform::BooleanPassthrough, _) => value.as_f64().unwrap_or(0.0).clamp(0.0, 1.0),
            (Transform::BooleanInverse, FeatureValue::Boolean(b)) => if *b { 0.0 } else { 1.0 },
            (Transform::BooleanInverse, _) => 1.0 - value.as_f64().unwrap_or(1.0).clamp(0.0, 1.0),
            (Transform::Categorical(table), FeatureValue::Categorical(key)) => {
                table.get(key).copied().unwrap_or(0.0)
            }
            (Transform::Categorical(_), _) => 0.0,
        }
    }
}

fn linear_clamp(value: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// Default transforms for the eight canonical features, mirroring the
/// teacher's own thresholds-driven min/max bands but generalized to this
/// domain's metric names.
pub fn default_transforms() -> HashMap<String, Transform> {
    use crate::model::canonical_features::*;
    let mut m = HashMap::new();
    m.insert(SENTIMENT.to_string(), Transform::LinearClamp { min: -1.0, max: 1.0 });
    m.insert(ACCUMULATION.to_string(), Transform::LogClamp { min: 0.0, max: 1_000_000.0 });
    m.insert(ONCHAIN_ACTIVITY.to_string(), Transform::LogClamp { min: 0.0, max: 10_000.0 });
    m.insert(LIQUIDITY_DEPTH.to_string(), Transform::LogClamp { min: 1_000.0, max: 10_000_000.0 });
    m.insert(TOKENOMICS_RISK.to_string(), Transform::BooleanInverse);
    m.insert(CONTRACT_SAFETY.to_string(), Transform::LinearClamp { min: 0.0, max: 1.0 });
    m.insert(NARRATIVE_MOMENTUM.to_string(), Transform::LinearClamp { min: 0.0, max: 1.0 });
    m.insert(COMMUNITY_GROWTH.to_string(), Transform::LogClamp { min: 0.0, max: 100_000.0 });
    m
}
