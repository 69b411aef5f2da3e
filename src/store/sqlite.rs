//! Durable `FeatureStore` backed by SQLite, grounded on
//! `oracle::sqlite_ledger::SqliteLedger`'s pool setup and schema-creation
//! pattern (`SqlitePoolOptions` + `CREATE TABLE IF NOT EXISTS` run at
//! construction).

use super::{delta_from_snapshots, FeatureStore};
use crate::model::{Feature, GemScoreSnapshot, ScoreDelta, ScanStatus, SnapshotMetadata};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use tracing::{info, instrument};

pub struct SqliteFeatureStore {
    pool: Pool<Sqlite>,
}

impl SqliteFeatureStore {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        // A pooled in-memory database gives each connection its own empty
        // database, so cap the pool at one connection in that case.
        let (url, max_connections) = if path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite:{path}?mode=rwc"), 5)
        };
        let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(&url).await?;
        Self::create_schema(&pool).await?;
        info!("feature store connected at {path}");
        Ok(Self { pool })
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS features (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                name TEXT NOT NULL,
                value_json TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                confidence REAL NOT NULL,
                category TEXT NOT NULL,
                provenance_json TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_features_token_name ON features (token, name);")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                score REAL NOT NULL,
                confidence REAL NOT NULL,
                features_json TEXT NOT NULL,
                contributions_json TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_token ON snapshots (token);")
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[derive(FromRow)]
struct FeatureRow {
    token: String,
    name: String,
    value_json: String,
    timestamp: i64,
    confidence: f64,
    category: String,
    provenance_json: String,
}

impl TryFrom<FeatureRow> for Feature {
    type Error = anyhow::Error;

    fn try_from(row: FeatureRow) -> Result<Self, Self::Error> {
        Ok(Feature {
            token: row.token,
            name: row.name,
            value: serde_json::from_str(&row.value_json)?,
            timestamp: row.timestamp,
            confidence: row.confidence,
            category: serde_json::from_str(&row.category)?,
            provenance: serde_json::from_str(&row.provenance_json)?,
        })
    }
}

#[derive(FromRow)]
struct SnapshotRow {
    token: String,
    timestamp: i64,
    score: f64,
    confidence: f64,
    features_json: String,
    contributions_json: String,
    metadata_json: String,
}

impl TryFrom<SnapshotRow> for GemScoreSnapshot {
    type Error = anyhow::Error;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(GemScoreSnapshot {
            token: row.token,
            timestamp: row.timestamp,
            score: row.score,
            confidence: row.confidence,
            features: serde_json::from_str(&row.features_json)?,
            contributions: serde_json::from_str(&row.contributions_json)?,
            metadata: serde_json::from_str::<SnapshotMetadata>(&row.metadata_json)
                .unwrap_or_else(|_| SnapshotMetadata { missing_sources: vec![], status: ScanStatus::Success, extra_features: Default::default() }),
        })
    }
}

#[async_trait]
impl FeatureStore for SqliteFeatureStore {
    #[instrument(skip(self, feature), fields(token = %feature.token, name = %feature.name))]
    async fn write_feature(&self, feature: &Feature) -> anyhow::Result<()> {
        let value_json = serde_json::to_string(&feature.value)?;
        let category_json = serde_json::to_string(&feature.category)?;
        let provenance_json = serde_json::to_string(&feature.provenance)?;

        sqlx::query(
            "INSERT INTO features (token, name, value_json, timestamp, confidence, category, provenance_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&feature.token)
        .bind(&feature.name)
        .bind(value_json)
        .bind(feature.timestamp)
        .bind(feature.confidence)
        .bind(category_json)
        .bind(provenance_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_latest(&self, token: &str, name: &str) -> anyhow::Result<Option<Feature>> {
        let row: Option<FeatureRow> = sqlx::query_as(
            "SELECT token, name, value_json, timestamp, confidence, category, provenance_json
             FROM features WHERE token = ? AND name = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(token)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Feature::try_from).transpose()
    }

    async fn read_history(&self, token: &str, name: &str, limit: usize) -> anyhow::Result<Vec<Feature>> {
        let rows: Vec<FeatureRow> = sqlx::query_as(
            "SELECT token, name, value_json, timestamp, confidence, category, provenance_json
             FROM features WHERE token = ? AND name = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(token)
        .bind(name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Feature::try_from).collect()
    }

    #[instrument(skip(self, snapshot), fields(token = %snapshot.token))]
    async fn write_snapshot(&self, snapshot: &GemScoreSnapshot) -> anyhow::Result<()> {
        let features_json = serde_json::to_string(&snapshot.features)?;
        let contributions_json = serde_json::to_string(&snapshot.contributions)?;
        let metadata_json = serde_json::to_string(&snapshot.metadata)?;

        sqlx::query(
            "INSERT INTO snapshots (token, timestamp, score, confidence, features_json, contributions_json, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.token)
        .bind(snapshot.timestamp)
        .bind(snapshot.score)
        .bind(snapshot.confidence)
        .bind(features_json)
        .bind(contributions_json)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_snapshot_history(&self, token: &str, limit: usize) -> anyhow::Result<Vec<GemScoreSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT token, timestamp, score, confidence, features_json, contributions_json, metadata_json
             FROM snapshots WHERE token = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(token)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(GemScoreSnapshot::try_from).collect()
    }

    async fn compute_score_delta(&self, token: &str) -> anyhow::Result<Option<ScoreDelta>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT token, timestamp, score, confidence, features_json, contributions_json, metadata_json
             FROM snapshots WHERE token = ? ORDER BY timestamp DESC LIMIT 2",
        )
        .bind(token)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() < 2 {
            return Ok(None);
        }
        let mut rows = rows.into_iter();
        let current = GemScoreSnapshot::try_from(rows.next().unwrap())?;
        let previous = GemScoreSnapshot::try_from(rows.next().unwrap())?;

        Ok(Some(delta_from_snapshots(&previous, &current)))
    }

    async fn clear_old(&self, older_than: i64) -> anyhow::Result<u64> {
        let features_result = sqlx::query("DELETE FROM features WHERE timestamp < ?")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        let snapshots_result = sqlx::query("DELETE FROM snapshots WHERE timestamp < ?")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        Ok(features_result.rows_affected() + snapshots_result.rows_affected())
    }
}
