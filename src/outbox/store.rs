//! Outbox persistence (C7, spec §4.7): durable or in-memory, selectable at
//! construction, behind one trait — the same duality `store::FeatureStore`
//! gives C4, grounded on the same `oracle::sqlite_ledger::SqliteLedger`
//! pattern of a `sqlx` pool plus `CREATE TABLE IF NOT EXISTS` at connect
//! time.

use crate::model::AlertOutboxEntry;
use async_trait::async_trait;

/// Whether `enqueue` actually admitted the entry or suppressed it as a
/// duplicate of an already-active entry sharing the same `dedupe_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Suppressed,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Admit `entry`. If another entry with the same `dedupe_key` is already
    /// `Pending`, `InFlight`, or `Delivered`, `entry` is persisted with state
    /// `Suppressed` (for audit) and `Suppressed` is returned rather than
    /// scheduling a duplicate delivery (spec §4.6's suppression contract,
    /// enforced here since this is the single admission point).
    async fn enqueue(&self, entry: AlertOutboxEntry) -> anyhow::Result<EnqueueOutcome>;

    /// `Pending` entries due at or before `now`, oldest-enqueued first,
    /// capped at `limit`.
    async fn fetch_ready(&self, now: i64, limit: usize) -> anyhow::Result<Vec<AlertOutboxEntry>>;

    /// Move `alert_id` to `InFlight`. `in_flight_until` is the deadline by
    /// which delivery should have completed; `recover_stale_in_flight` uses
    /// it to detect and revert entries orphaned by a crashed dispatcher,
    /// since the state machine has no separate "claimed at" column.
    async fn mark_in_flight(&self, alert_id: &str, in_flight_until: i64) -> anyhow::Result<()>;

    async fn mark_delivered(&self, alert_id: &str) -> anyhow::Result<()>;

    /// Delivery failed but attempts remain: revert to `Pending`, bump
    /// `attempts`, and reschedule for `next_attempt_at`.
    async fn mark_retry(&self, alert_id: &str, attempts: u32, next_attempt_at: i64) -> anyhow::Result<()>;

    /// Delivery exhausted `max_attempts`: terminal `Failed`.
    async fn mark_failed(&self, alert_id: &str, attempts: u32) -> anyhow::Result<()>;

    /// Revert every `InFlight` entry whose `in_flight_until` deadline has
    /// already passed back to `Pending`, returning the count reverted. Run
    /// once at dispatcher startup so entries orphaned by a crash mid-delivery
    /// aren't stuck forever (spec §4.7 crash-recovery requirement).
    async fn recover_stale_in_flight(&self, now: i64) -> anyhow::Result<u64>;

    async fn get(&self, alert_id: &str) -> anyhow::Result<Option<AlertOutboxEntry>>;

    /// Entries still `Pending` or `InFlight` that carry an escalation policy
    /// — candidates the dispatcher's escalation pass checks against each
    /// policy step's `after_seconds` (spec §4.6 escalation).
    async fn escalation_candidates(&self) -> anyhow::Result<Vec<AlertOutboxEntry>>;

    /// Record that every step up to and including `through_s` has already
    /// been dispatched for `alert_id`, so the escalation pass never fires
    /// the same step twice.
    async fn mark_escalated(&self, alert_id: &str, through_s: u64) -> anyhow::Result<()>;
}

pub struct MemoryOutboxStore {
    entries: parking_lot::RwLock<std::collections::HashMap<String, StoredEntry>>,
}

struct StoredEntry {
    entry: AlertOutboxEntry,
    in_flight_until: i64,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self { entries: parking_lot::RwLock::new(std::collections::HashMap::new()) }
    }
}

impl Default for MemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn enqueue(&self, mut entry: AlertOutboxEntry) -> anyhow::Result<EnqueueOutcome> {
        use crate::model::OutboxState;

        let mut entries = self.entries.write();
        let duplicate_active = entries.values().any(|stored| {
            stored.entry.dedupe_key == entry.dedupe_key
                && stored.entry.alert_id != entry.alert_id
                && matches!(stored.entry.state, OutboxState::Pending | OutboxState::InFlight | OutboxState::Delivered)
        });

        let outcome = if duplicate_active {
            entry.state = OutboxState::Suppressed;
            EnqueueOutcome::Suppressed
        } else {
            EnqueueOutcome::Enqueued
        };

        entries.insert(entry.alert_id.clone(), StoredEntry { entry, in_flight_until: 0 });
        Ok(outcome)
    }

    async fn fetch_ready(&self, now: i64, limit: usize) -> anyhow::Result<Vec<AlertOutboxEntry>> {
        use crate::model::OutboxState;

        let entries = self.entries.read();
        let mut ready: Vec<&AlertOutboxEntry> = entries
            .values()
            .map(|stored| &stored.entry)
            .filter(|e| e.state == OutboxState::Pending && e.next_attempt_at <= now)
            .collect();
        ready.sort_by_key(|e| e.enqueued_at);
        Ok(ready.into_iter().take(limit).cloned().collect())
    }

    async fn mark_in_flight(&self, alert_id: &str, in_flight_until: i64) -> anyhow::Result<()> {
        use crate::model::OutboxState;

        if let Some(stored) = self.entries.write().get_mut(alert_id) {
            stored.entry.state = OutboxState::InFlight;
            stored.in_flight_until = in_flight_until;
        }
        Ok(())
    }

    async fn mark_delivered(&self, alert_id: &str) -> anyhow::Result<()> {
        use crate::model::OutboxState;

        if let Some(stored) = self.entries.write().get_mut(alert_id) {
            stored.entry.state = OutboxState::Delivered;
        }
        Ok(())
    }

    async fn mark_retry(&self, alert_id: &str, attempts: u32, next_attempt_at: i64) -> anyhow::Result<()> {
        use crate::model::OutboxState;

        if let Some(stored) = self.entries.write().get_mut(alert_id) {
            stored.entry.state = OutboxState::Pending;
            stored.entry.attempts = attempts;
            stored.entry.next_attempt_at = next_attempt_at;
        }
        Ok(())
    }

    async fn mark_failed(&self, alert_id: &str, attempts: u32) -> anyhow::Result<()> {
        use crate::model::OutboxState;

        if let Some(stored) = self.entries.write().get_mut(alert_id) {
            stored.entry.state = OutboxState::Failed;
            stored.entry.attempts = attempts;
        }
        Ok(())
    }

    async fn recover_stale_in_flight(&self, now: i64) -> anyhow::Result<u64> {
        use crate::model::OutboxState;

        let mut entries = self.entries.write();
        let mut recovered = 0u64;
        for stored in entries.values_mut() {
            if stored.entry.state == OutboxState::InFlight && stored.in_flight_until <= now {
                stored.entry.state = OutboxState::Pending;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn get(&self, alert_id: &str) -> anyhow::Result<Option<AlertOutboxEntry>> {
        Ok(self.entries.read().get(alert_id).map(|stored| stored.entry.clone()))
    }

    async fn escalation_candidates(&self) -> anyhow::Result<Vec<AlertOutboxEntry>> {
        use crate::model::OutboxState;

        Ok(self
            .entries
            .read()
            .values()
            .map(|stored| &stored.entry)
            .filter(|e| {
                e.escalation_policy_id.is_some() && matches!(e.state, OutboxState::Pending | OutboxState::InFlight)
            })
            .cloned()
            .collect())
    }

    async fn mark_escalated(&self, alert_id: &str, through_s: u64) -> anyhow::Result<()> {
        if let Some(stored) = self.entries.write().get_mut(alert_id) {
            stored.entry.escalated_through_s = through_s;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OutboxState, Severity};

    fn entry(id: &str, dedupe_key: &str, enqueued_at: i64) -> AlertOutboxEntry {
        AlertOutboxEntry {
            alert_id: id.into(),
            rule_id: "r1".into(),
            token: "PEPE".into(),
            severity: Severity::Warning,
            rendered_message: "m".into(),
            channels: vec!["log".into()],
            enqueued_at,
            state: OutboxState::Pending,
            attempts: 0,
            dedupe_key: dedupe_key.into(),
            next_attempt_at: enqueued_at,
            escalation_policy_id: None,
            escalated_through_s: 0,
        }
    }

    #[tokio::test]
    async fn second_enqueue_with_same_dedupe_key_is_suppressed() {
        let store = MemoryOutboxStore::new();
        assert_eq!(store.enqueue(entry("a1", "k1", 0)).await.unwrap(), EnqueueOutcome::Enqueued);
        assert_eq!(store.enqueue(entry("a2", "k1", 10)).await.unwrap(), EnqueueOutcome::Suppressed);
        let suppressed = store.get("a2").await.unwrap().unwrap();
        assert_eq!(suppressed.state, OutboxState::Suppressed);
    }

    #[tokio::test]
    async fn different_dedupe_keys_both_enqueue() {
        let store = MemoryOutboxStore::new();
        assert_eq!(store.enqueue(entry("a1", "k1", 0)).await.unwrap(), EnqueueOutcome::Enqueued);
        assert_eq!(store.enqueue(entry("a2", "k2", 0)).await.unwrap(), EnqueueOutcome::Enqueued);
    }

    #[tokio::test]
    async fn fetch_ready_respects_next_attempt_at() {
        let store = MemoryOutboxStore::new();
        store.enqueue(entry("a1", "k1", 0)).await.unwrap();
        store.mark_retry("a1", 1, 500).await.unwrap();
        assert!(store.fetch_ready(100, 10).await.unwrap().is_empty());
        assert_eq!(store.fetch_ready(500, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_in_flight_entry_is_recovered_to_pending() {
        let store = MemoryOutboxStore::new();
        store.enqueue(entry("a1", "k1", 0)).await.unwrap();
        store.mark_in_flight("a1", 100).await.unwrap();
        assert_eq!(store.recover_stale_in_flight(50).await.unwrap(), 0);
        assert_eq!(store.recover_stale_in_flight(200).await.unwrap(), 1);
        assert_eq!(store.get("a1").await.unwrap().unwrap().state, OutboxState::Pending);
    }

    #[tokio::test]
    async fn mark_failed_is_terminal() {
        let store = MemoryOutboxStore::new();
        store.enqueue(entry("a1", "k1", 0)).await.unwrap();
        store.mark_failed("a1", 5).await.unwrap();
        let stored = store.get("a1").await.unwrap().unwrap();
        assert_eq!(stored.state, OutboxState::Failed);
        assert_eq!(stored.attempts, 5);
    }
}

pub struct SqliteOutboxStore {
    pool: sqlx::Pool<sqlx::Sqlite>,
}

impl SqliteOutboxStore {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        use sqlx::sqlite::SqlitePoolOptions;

        let (url, max_connections) = if path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite:{path}?mode=rwc"), 5)
        };
        let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(&url).await?;
        Self::create_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_schema(pool: &sqlx::Pool<sqlx::Sqlite>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_entries (
                alert_id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                token TEXT NOT NULL,
                severity_json TEXT NOT NULL,
                rendered_message TEXT NOT NULL,
                channels_json TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                state_json TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                dedupe_key TEXT NOT NULL,
                next_attempt_at INTEGER NOT NULL,
                in_flight_until INTEGER NOT NULL DEFAULT 0,
                escalation_policy_id TEXT,
                escalated_through_s INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_dedupe ON outbox_entries (dedupe_key);")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_state_next ON outbox_entries (state_json, next_attempt_at);")
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    alert_id: String,
    rule_id: String,
    token: String,
    severity_json: String,
    rendered_message: String,
    channels_json: String,
    enqueued_at: i64,
    state_json: String,
    attempts: i64,
    dedupe_key: String,
    next_attempt_at: i64,
    escalation_policy_id: Option<String>,
    escalated_through_s: i64,
}

impl TryFrom<OutboxRow> for AlertOutboxEntry {
    type Error = anyhow::Error;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(AlertOutboxEntry {
            alert_id: row.alert_id,
            rule_id: row.rule_id,
            token: row.token,
            severity: serde_json::from_str(&row.severity_json)?,
            rendered_message: row.rendered_message,
            channels: serde_json::from_str(&row.channels_json)?,
            enqueued_at: row.enqueued_at,
            state: serde_json::from_str(&row.state_json)?,
            attempts: row.attempts as u32,
            dedupe_key: row.dedupe_key,
            next_attempt_at: row.next_attempt_at,
            escalation_policy_id: row.escalation_policy_id,
            escalated_through_s: row.escalated_through_s as u64,
        })
    }
}

const OUTBOX_COLUMNS: &str = "alert_id, rule_id, token, severity_json, rendered_message, channels_json,
                    enqueued_at, state_json, attempts, dedupe_key, next_attempt_at,
                    escalation_policy_id, escalated_through_s";

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn enqueue(&self, mut entry: AlertOutboxEntry) -> anyhow::Result<EnqueueOutcome> {
        use crate::model::OutboxState;

        let mut tx = self.pool.begin().await?;

        let duplicate_active: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM outbox_entries
             WHERE dedupe_key = ? AND alert_id != ?
               AND state_json IN ('\"Pending\"', '\"InFlight\"', '\"Delivered\"')
             LIMIT 1",
        )
        .bind(&entry.dedupe_key)
        .bind(&entry.alert_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = if duplicate_active.is_some() {
            entry.state = OutboxState::Suppressed;
            EnqueueOutcome::Suppressed
        } else {
            EnqueueOutcome::Enqueued
        };

        sqlx::query(
            "INSERT INTO outbox_entries
             (alert_id, rule_id, token, severity_json, rendered_message, channels_json,
              enqueued_at, state_json, attempts, dedupe_key, next_attempt_at, in_flight_until,
              escalation_policy_id, escalated_through_s)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(&entry.alert_id)
        .bind(&entry.rule_id)
        .bind(&entry.token)
        .bind(serde_json::to_string(&entry.severity)?)
        .bind(&entry.rendered_message)
        .bind(serde_json::to_string(&entry.channels)?)
        .bind(entry.enqueued_at)
        .bind(serde_json::to_string(&entry.state)?)
        .bind(entry.attempts as i64)
        .bind(&entry.dedupe_key)
        .bind(entry.next_attempt_at)
        .bind(&entry.escalation_policy_id)
        .bind(entry.escalated_through_s as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn fetch_ready(&self, now: i64, limit: usize) -> anyhow::Result<Vec<AlertOutboxEntry>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS}
             FROM outbox_entries
             WHERE state_json = '\"Pending\"' AND next_attempt_at <= ?
             ORDER BY enqueued_at ASC
             LIMIT ?"
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertOutboxEntry::try_from).collect()
    }

    async fn mark_in_flight(&self, alert_id: &str, in_flight_until: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE outbox_entries SET state_json = '\"InFlight\"', in_flight_until = ? WHERE alert_id = ?")
            .bind(in_flight_until)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_delivered(&self, alert_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE outbox_entries SET state_json = '\"Delivered\"' WHERE alert_id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_retry(&self, alert_id: &str, attempts: u32, next_attempt_at: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE outbox_entries SET state_json = '\"Pending\"', attempts = ?, next_attempt_at = ? WHERE alert_id = ?",
        )
        .bind(attempts as i64)
        .bind(next_attempt_at)
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, alert_id: &str, attempts: u32) -> anyhow::Result<()> {
        sqlx::query("UPDATE outbox_entries SET state_json = '\"Failed\"', attempts = ? WHERE alert_id = ?")
            .bind(attempts as i64)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recover_stale_in_flight(&self, now: i64) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE outbox_entries SET state_json = '\"Pending\"'
             WHERE state_json = '\"InFlight\"' AND in_flight_until <= ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, alert_id: &str) -> anyhow::Result<Option<AlertOutboxEntry>> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_entries WHERE alert_id = ?"
        ))
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AlertOutboxEntry::try_from).transpose()
    }

    async fn escalation_candidates(&self) -> anyhow::Result<Vec<AlertOutboxEntry>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS}
             FROM outbox_entries
             WHERE escalation_policy_id IS NOT NULL
               AND state_json IN ('\"Pending\"', '\"InFlight\"')"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertOutboxEntry::try_from).collect()
    }

    async fn mark_escalated(&self, alert_id: &str, through_s: u64) -> anyhow::Result<()> {
        sqlx::query("UPDATE outbox_entries SET escalated_through_s = ? WHERE alert_id = ?")
            .bind(through_s as i64)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
