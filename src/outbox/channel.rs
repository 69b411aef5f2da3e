//! Delivery channels (C7, spec §4.7): anything that can take a rendered
//! `AlertOutboxEntry` and attempt to deliver it. Generalized from the
//! teacher's `generate_reason`-then-log pattern into a trait so the
//! dispatcher can fan an entry's `channels` list out to real sinks
//! (log, webhook, ...) without knowing which.

use crate::error::OutboxError;
use crate::model::AlertOutboxEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Attempt delivery. Any `Err` counts as a failed attempt for this
    /// channel; the dispatcher still tries the entry's remaining channels.
    async fn send(&self, entry: &AlertOutboxEntry) -> Result<(), OutboxError>;
}

/// Delivers by structured log line — the only channel this crate wires by
/// default, the way the teacher surfaces decisions via `tracing` rather than
/// a concrete notification backend.
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, entry: &AlertOutboxEntry) -> Result<(), OutboxError> {
        info!(
            alert_id = %entry.alert_id,
            token = %entry.token,
            severity = ?entry.severity,
            "{}",
            entry.rendered_message
        );
        Ok(())
    }
}

/// Records every delivered entry in memory instead of sending it anywhere —
/// the sink the backtest harness (C9) routes the outbox through, and handy
/// in tests that want to assert on what would have gone out.
pub struct InMemoryChannel {
    name: String,
    delivered: Arc<Mutex<Vec<AlertOutboxEntry>>>,
}

impl InMemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), delivered: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn delivered(&self) -> Vec<AlertOutboxEntry> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl AlertChannel for InMemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, entry: &AlertOutboxEntry) -> Result<(), OutboxError> {
        self.delivered.lock().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OutboxState, Severity};

    fn entry() -> AlertOutboxEntry {
        AlertOutboxEntry {
            alert_id: "a1".into(),
            rule_id: "r1".into(),
            token: "PEPE".into(),
            severity: Severity::Warning,
            rendered_message: "hi".into(),
            channels: vec!["log".into()],
            enqueued_at: 0,
            state: OutboxState::Pending,
            attempts: 0,
            dedupe_key: "k".into(),
            next_attempt_at: 0,
            escalation_policy_id: None,
            escalated_through_s: 0,
        }
    }

    #[tokio::test]
    async fn in_memory_channel_records_sends() {
        let channel = InMemoryChannel::new("sink");
        channel.send(&entry()).await.unwrap();
        assert_eq!(channel.delivered().len(), 1);
    }

    #[tokio::test]
    async fn log_channel_never_fails() {
        let channel = LogChannel::new("log");
        assert!(channel.send(&entry()).await.is_ok());
    }
}
