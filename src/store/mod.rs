//! C4: Point-in-time feature store — append-only feature history plus
//! snapshot persistence, behind one trait so the engine can run against an
//! in-memory backend (tests, backtests) or a durable SQLite backend
//! (live), the way `oracle::storage::LedgerStorage` generalized the
//! teacher's own persistence behind one trait for `SqliteLedger`.

pub mod memory;
pub mod sqlite;

use crate::model::{Feature, GemScoreSnapshot, ScoreDelta};
use async_trait::async_trait;

#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Append a feature observation. `(token, name, timestamp)` is the
    /// natural key; writing the same key twice appends a second history
    /// row rather than overwriting (spec §4.4: history is append-only).
    async fn write_feature(&self, feature: &Feature) -> anyhow::Result<()>;

    /// Most recent observation for `(token, name)`, if any.
    async fn read_latest(&self, token: &str, name: &str) -> anyhow::Result<Option<Feature>>;

    /// Most recent `limit` observations for `(token, name)`, newest first
    /// (spec §4.4).
    async fn read_history(&self, token: &str, name: &str, limit: usize) -> anyhow::Result<Vec<Feature>>;

    /// Persist a scoring snapshot.
    async fn write_snapshot(&self, snapshot: &GemScoreSnapshot) -> anyhow::Result<()>;

    /// Most recent `limit` snapshots for `token`, newest first (spec §4.4).
    async fn read_snapshot_history(&self, token: &str, limit: usize) -> anyhow::Result<Vec<GemScoreSnapshot>>;

    /// Compare the two most recent snapshots for `token`. Returns `None`
    /// when fewer than two snapshots exist.
    async fn compute_score_delta(&self, token: &str) -> anyhow::Result<Option<ScoreDelta>>;

    /// Delete feature and snapshot rows older than `older_than` (Unix
    /// seconds), returning the number of rows removed.
    async fn clear_old(&self, older_than: i64) -> anyhow::Result<u64>;
}

/// Build a `ScoreDelta` from two ordered snapshots. Shared by every backend
/// so the narrative and sort order stay identical regardless of storage.
pub(crate) fn delta_from_snapshots(previous: &GemScoreSnapshot, current: &GemScoreSnapshot) -> ScoreDelta {
    use crate::model::FeatureDelta;
    use std::collections::HashSet;

    let mut names: HashSet<&String> = previous.features.keys().collect();
    names.extend(current.features.keys());

    let mut feature_deltas: Vec<FeatureDelta> = names
        .into_iter()
        .map(|name| {
            let prev_v = previous.features.get(name).copied().unwrap_or(0.0);
            let cur_v = current.features.get(name).copied().unwrap_or(0.0);
            let prev_contrib = previous.contributions.get(name).copied().unwrap_or(0.0);
            let cur_contrib = current.contributions.get(name).copied().unwrap_or(0.0);
            FeatureDelta {
                name: name.clone(),
                previous_value: prev_v,
                current_value: cur_v,
                delta_value: cur_v - prev_v,
                delta_contribution: cur_contrib - prev_contrib,
            }
        })
        .collect();

    feature_deltas.sort_by(|a, b| {
        b.delta_contribution
            .abs()
            .partial_cmp(&a.delta_contribution.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let delta_score = current.score - previous.score;
    let percent_change = if previous.score.abs() > f64::EPSILON {
        100.0 * delta_score / previous.score
    } else {
        0.0
    };
    let time_delta_hours = (current.timestamp - previous.timestamp) as f64 / 3600.0;

    let narrative = build_narrative(&current.token, delta_score, &feature_deltas);

    ScoreDelta {
        token: current.token.clone(),
        previous_timestamp: previous.timestamp,
        current_timestamp: current.timestamp,
        previous_score: previous.score,
        current_score: current.score,
        delta_score,
        percent_change,
        time_delta_hours,
        feature_deltas,
        narrative,
    }
}

fn build_narrative(token: &str, delta_score: f64, feature_deltas: &[crate::model::FeatureDelta]) -> String {
    let direction = if delta_score >= 0.0 { "up" } else { "down" };
    let driver = feature_deltas.first().map(|d| d.name.as_str()).unwrap_or("no single feature");
    format!(
        "{token} score moved {direction} {:.1} points, mainly driven by {driver}",
        delta_score.abs()
    )
}
