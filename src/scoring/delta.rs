//! Standalone score-delta computation, for callers (backtest, tests) that
//! hold two snapshots directly instead of going through a `FeatureStore`.

use crate::model::{GemScoreSnapshot, ScoreDelta};

pub fn compare(previous: &GemScoreSnapshot, current: &GemScoreSnapshot) -> ScoreDelta {
    crate::store::delta_from_snapshots(previous, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ScanStatus, SnapshotMetadata};
    use std::collections::HashMap;

    fn snapshot(score: f64, ts: i64, feature_a: f64) -> GemScoreSnapshot {
        let mut features = HashMap::new();
        features.insert("a".to_string(), feature_a);
        GemScoreSnapshot {
            token: "PEPE".into(),
            timestamp: ts,
            score,
            confidence: 1.0,
            contributions: features.clone(),
            features,
            metadata: SnapshotMetadata { missing_sources: vec![], status: ScanStatus::Success, extra_features: HashMap::new() },
        }
    }

    #[test]
    fn percent_change_matches_score_delta() {
        let delta = compare(&snapshot(50.0, 100, 0.5), &snapshot(75.0, 200, 0.8));
        assert_eq!(delta.delta_score, 25.0);
        assert_eq!(delta.percent_change, 50.0);
        assert_eq!(delta.time_delta_hours, 100.0 / 3600.0);
    }

    #[test]
    fn top_positive_excludes_negative_deltas() {
        let delta = compare(&snapshot(50.0, 100, 0.5), &snapshot(40.0, 200, 0.2));
        assert!(delta.top_positive(5).is_empty());
        assert_eq!(delta.top_negative(5).len(), 1);
    }
}
