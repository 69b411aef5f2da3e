//! In-memory `FeatureStore`, used by the backtest harness and by tests
//! that don't want a SQLite file on disk.

use super::{delta_from_snapshots, FeatureStore};
use crate::model::{Feature, GemScoreSnapshot, ScoreDelta};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Tables {
    features: HashMap<(String, String), Vec<Feature>>,
    snapshots: HashMap<String, Vec<GemScoreSnapshot>>,
}

pub struct MemoryFeatureStore {
    tables: RwLock<Tables>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self { tables: RwLock::new(Tables::default()) }
    }
}

impl Default for MemoryFeatureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureStore for MemoryFeatureStore {
    async fn write_feature(&self, feature: &Feature) -> anyhow::Result<()> {
        let key = (feature.token.clone(), feature.name.clone());
        self.tables.write().features.entry(key).or_default().push(feature.clone());
        Ok(())
    }

    async fn read_latest(&self, token: &str, name: &str) -> anyhow::Result<Option<Feature>> {
        let key = (token.to_string(), name.to_string());
        Ok(self.tables.read().features.get(&key).and_then(|h| h.last().cloned()))
    }

    async fn read_history(&self, token: &str, name: &str, limit: usize) -> anyhow::Result<Vec<Feature>> {
        let key = (token.to_string(), name.to_string());
        let tables = self.tables.read();
        let Some(history) = tables.features.get(&key) else {
            return Ok(Vec::new());
        };
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    async fn write_snapshot(&self, snapshot: &GemScoreSnapshot) -> anyhow::Result<()> {
        self.tables.write().snapshots.entry(snapshot.token.clone()).or_default().push(snapshot.clone());
        Ok(())
    }

    async fn read_snapshot_history(&self, token: &str, limit: usize) -> anyhow::Result<Vec<GemScoreSnapshot>> {
        let tables = self.tables.read();
        let Some(history) = tables.snapshots.get(token) else {
            return Ok(Vec::new());
        };
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    async fn compute_score_delta(&self, token: &str) -> anyhow::Result<Option<ScoreDelta>> {
        let tables = self.tables.read();
        let Some(history) = tables.snapshots.get(token) else {
            return Ok(None);
        };
        if history.len() < 2 {
            return Ok(None);
        }
        let current = &history[history.len() - 1];
        let previous = &history[history.len() - 2];
        Ok(Some(delta_from_snapshots(previous, current)))
    }

    async fn clear_old(&self, older_than: i64) -> anyhow::Result<u64> {
        let mut tables = self.tables.write();
        let mut removed = 0u64;
        for history in tables.features.values_mut() {
            let before = history.len();
            history.retain(|f| f.timestamp >= older_than);
            removed += (before - history.len()) as u64;
        }
        for history in tables.snapshots.values_mut() {
            let before = history.len();
            history.retain(|s| s.timestamp >= older_than);
            removed += (before - history.len()) as u64;
        }
        Ok(removed)
    }
}
