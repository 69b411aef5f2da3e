//! Cooperative dispatch loop (C7, spec §4.7).
//!
//! Shape mirrors `oracle::transaction_monitor::TransactionMonitor::run`: a
//! `tokio::select!` between a periodic poll tick and a shutdown signal, so
//! the dispatcher exits cleanly instead of looping forever once told to
//! stop. Delivery for a single `dedupe_key` is serialized through a sharded
//! lock, the fine-grained-locking discipline spec §5 calls for, so two
//! escalation waves of the same alert never race past each other.

use crate::config::OutboxConfig;
use crate::model::{AlertOutboxEntry, EscalationPolicy};
use crate::outbox::channel::AlertChannel;
use crate::outbox::entry::next_backoff_ms;
use crate::outbox::store::OutboxStore;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

/// How long a claimed entry may sit `InFlight` before the dispatcher
/// considers it orphaned (a crashed worker never reported back) and eligible
/// for `recover_stale_in_flight` to revert it to `Pending`.
const IN_FLIGHT_GRACE_S: i64 = 30;

const SHARD_COUNT: usize = 32;

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    channels: HashMap<String, Arc<dyn AlertChannel>>,
    config: OutboxConfig,
    shards: Vec<AsyncMutex<()>>,
    policies: HashMap<String, EscalationPolicy>,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        channels: Vec<Arc<dyn AlertChannel>>,
        config: OutboxConfig,
    ) -> Self {
        Self::with_policies(store, channels, config, vec![])
    }

    /// Same as `new`, but additionally takes the escalation policies
    /// referenced by any enqueued entry's `escalation_policy_id`, so
    /// `escalate_once` can resolve steps by name (spec §4.6 escalation).
    pub fn with_policies(
        store: Arc<dyn OutboxStore>,
        channels: Vec<Arc<dyn AlertChannel>>,
        config: OutboxConfig,
        policies: Vec<EscalationPolicy>,
    ) -> Self {
        Self {
            store,
            channels: channels.into_iter().map(|c| (c.name().to_string(), c)).collect(),
            config,
            shards: (0..SHARD_COUNT).map(|_| AsyncMutex::new(())).collect(),
            policies: policies.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// Admit one evaluated alert into the durable queue.
    pub async fn enqueue(&self, entry: AlertOutboxEntry) -> anyhow::Result<crate::outbox::store::EnqueueOutcome> {
        self.store.enqueue(entry).await
    }

    /// Revert any entry orphaned by a previous crash back to `Pending`. Call
    /// once before `run` on every process start (spec §4.7 crash recovery).
    pub async fn recover(&self, now: i64) -> anyhow::Result<u64> {
        let recovered = self.store.recover_stale_in_flight(now).await?;
        if recovered > 0 {
            info!("recovered {recovered} stale in-flight outbox entries");
        }
        Ok(recovered)
    }

    /// Run the poll loop until `shutdown` fires or is dropped.
    pub async fn run(&self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.dispatch_poll_interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = now_unix();
                    if let Err(e) = self.dispatch_once(now).await {
                        warn!("outbox dispatch tick failed: {e}");
                    }
                    if let Err(e) = self.escalate_once(now).await {
                        warn!("outbox escalation tick failed: {e}");
                    }
                }
                _ = shutdown.recv() => {
                    info!("outbox dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// Pull everything ready at `now` and attempt delivery once each. Public
    /// so tests and the backtest harness can drive the loop deterministically
    /// instead of waiting on wall-clock ticks.
    #[instrument(skip(self))]
    pub async fn dispatch_once(&self, now: i64) -> anyhow::Result<()> {
        let ready = self.store.fetch_ready(now, 256).await?;
        for entry in ready {
            self.deliver(entry, now).await?;
        }
        Ok(())
    }

    async fn deliver(&self, mut entry: AlertOutboxEntry, now: i64) -> anyhow::Result<()> {
        let shard = &self.shards[shard_index(&entry.dedupe_key, self.shards.len())];
        let _guard = shard.lock().await;

        self.store.mark_in_flight(&entry.alert_id, now + IN_FLIGHT_GRACE_S).await?;

        let mut delivered_all = true;
        for channel_name in &entry.channels {
            match self.channels.get(channel_name) {
                Some(channel) => {
                    if let Err(e) = channel.send(&entry).await {
                        warn!("channel '{channel_name}' failed to deliver {}: {e}", entry.alert_id);
                        delivered_all = false;
                    }
                }
                None => {
                    warn!("no channel registered for '{channel_name}', dropping that leg of {}", entry.alert_id);
                    delivered_all = false;
                }
            }
        }

        if delivered_all {
            self.store.mark_delivered(&entry.alert_id).await?;
            return Ok(());
        }

        entry.attempts += 1;
        if entry.attempts >= self.config.max_attempts {
            warn!("outbox entry {} exhausted retries, marking Failed", entry.alert_id);
            self.store.mark_failed(&entry.alert_id, entry.attempts).await?;
        } else {
            let delay_ms = next_backoff_ms(entry.attempts, self.config.base_backoff_ms, self.config.max_backoff_ms);
            let next_attempt_at = now + (delay_ms / 1000).max(1) as i64;
            self.store.mark_retry(&entry.alert_id, entry.attempts, next_attempt_at).await?;
        }
        Ok(())
    }

    /// Promote any still-undelivered entry past an unfired escalation step
    /// to that step's additional channels, without touching delivery state
    /// or `attempts` — escalation adds legs, it never replaces the original
    /// entry (spec §4.6: "escalation never deletes the original entry").
    /// Public for the same reason `dispatch_once` is: tests and the demo
    /// harness drive it without waiting on the wall clock.
    #[instrument(skip(self))]
    pub async fn escalate_once(&self, now: i64) -> anyhow::Result<()> {
        for entry in self.store.escalation_candidates().await? {
            let Some(policy_id) = entry.escalation_policy_id.as_ref() else { continue };
            let Some(policy) = self.policies.get(policy_id) else { continue };

            let elapsed = (now - entry.enqueued_at).max(0) as u64;
            let mut new_channels = Vec::new();
            let mut highest_fired = entry.escalated_through_s;

            for step in &policy.steps {
                if step.after_seconds <= elapsed && step.after_seconds > entry.escalated_through_s {
                    for channel in &step.channels {
                        if !new_channels.contains(channel) {
                            new_channels.push(channel.clone());
                        }
                    }
                    highest_fired = highest_fired.max(step.after_seconds);
                }
            }

            if new_channels.is_empty() {
                continue;
            }

            for channel_name in &new_channels {
                match self.channels.get(channel_name) {
                    Some(channel) => {
                        if let Err(e) = channel.send(&entry).await {
                            warn!("escalation channel '{channel_name}' failed for {}: {e}", entry.alert_id);
                        }
                    }
                    None => warn!("no channel registered for escalation target '{channel_name}'"),
                }
            }
            self.store.mark_escalated(&entry.alert_id, highest_fired).await?;
        }
        Ok(())
    }
}

fn shard_index(dedupe_key: &str, shard_count: usize) -> usize {
    let mut hasher = rustc_hash::FxHasher::default();
    dedupe_key.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OutboxState, Severity};
    use crate::outbox::channel::InMemoryChannel;
    use crate::outbox::store::MemoryOutboxStore;

    fn config() -> OutboxConfig {
        OutboxConfig { max_attempts: 3, base_backoff_ms: 100, max_backoff_ms: 1_000, dispatch_poll_interval_ms: 10, channel_concurrency: HashMap::new() }
    }

    fn entry(id: &str, channels: &[&str]) -> AlertOutboxEntry {
        AlertOutboxEntry {
            alert_id: id.into(),
            rule_id: "r1".into(),
            token: "PEPE".into(),
            severity: Severity::Warning,
            rendered_message: "m".into(),
            channels: channels.iter().map(|s| s.to_string()).collect(),
            enqueued_at: 0,
            state: OutboxState::Pending,
            attempts: 0,
            dedupe_key: id.into(),
            next_attempt_at: 0,
            escalation_policy_id: None,
            escalated_through_s: 0,
        }
    }

    #[tokio::test]
    async fn successful_delivery_marks_delivered() {
        let store: Arc<dyn OutboxStore> = Arc::new(MemoryOutboxStore::new());
        let sink = Arc::new(InMemoryChannel::new("log"));
        let channel: Arc<dyn AlertChannel> = sink.clone();
        let dispatcher = OutboxDispatcher::new(store.clone(), vec![channel], config());

        dispatcher.enqueue(entry("a1", &["log"])).await.unwrap();
        dispatcher.dispatch_once(0).await.unwrap();

        assert_eq!(store.get("a1").await.unwrap().unwrap().state, OutboxState::Delivered);
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn missing_channel_retries_then_fails() {
        let store: Arc<dyn OutboxStore> = Arc::new(MemoryOutboxStore::new());
        let dispatcher = OutboxDispatcher::new(store.clone(), vec![], config());

        dispatcher.enqueue(entry("a1", &["nonexistent"])).await.unwrap();

        dispatcher.dispatch_once(0).await.unwrap();
        assert_eq!(store.get("a1").await.unwrap().unwrap().state, OutboxState::Pending);

        dispatcher.dispatch_once(1_000).await.unwrap();
        dispatcher.dispatch_once(2_000).await.unwrap();
        dispatcher.dispatch_once(3_000).await.unwrap();

        assert_eq!(store.get("a1").await.unwrap().unwrap().state, OutboxState::Failed);
    }

    fn escalating_entry(id: &str, policy_id: &str) -> AlertOutboxEntry {
        let mut e = entry(id, &["log"]);
        e.escalation_policy_id = Some(policy_id.to_string());
        e
    }

    #[tokio::test]
    async fn escalation_adds_channels_without_changing_state() {
        use crate::model::EscalationStep;

        let store: Arc<dyn OutboxStore> = Arc::new(MemoryOutboxStore::new());
        let log = Arc::new(InMemoryChannel::new("log"));
        let slack = Arc::new(InMemoryChannel::new("slack"));
        let pager = Arc::new(InMemoryChannel::new("pager"));
        let channels: Vec<Arc<dyn AlertChannel>> = vec![log.clone(), slack.clone(), pager.clone()];
        let policy = EscalationPolicy {
            name: "p1".into(),
            steps: vec![
                EscalationStep { after_seconds: 300, channels: vec!["slack".into()] },
                EscalationStep { after_seconds: 1800, channels: vec!["pager".into()] },
            ],
        };
        let dispatcher = OutboxDispatcher::with_policies(store.clone(), channels, config(), vec![policy]);

        dispatcher.enqueue(escalating_entry("a1", "p1")).await.unwrap();

        // Before the first step elapses, no escalation channel fires.
        dispatcher.escalate_once(100).await.unwrap();
        assert!(slack.delivered().is_empty());

        // Past the first step: slack fires, pager does not yet.
        dispatcher.escalate_once(400).await.unwrap();
        assert_eq!(slack.delivered().len(), 1);
        assert!(pager.delivered().is_empty());

        // A second pass before the next step does not re-fire slack.
        dispatcher.escalate_once(500).await.unwrap();
        assert_eq!(slack.delivered().len(), 1);

        // Past the second step: pager fires too.
        dispatcher.escalate_once(2_000).await.unwrap();
        assert_eq!(pager.delivered().len(), 1);

        // The original entry is untouched — still Pending, not delivered.
        assert_eq!(store.get("a1").await.unwrap().unwrap().state, OutboxState::Pending);
    }

    #[tokio::test]
    async fn recover_reverts_orphaned_in_flight_entries() {
        let store = Arc::new(MemoryOutboxStore::new());
        store.enqueue(entry("a1", &["log"])).await.unwrap();
        store.mark_in_flight("a1", 10).await.unwrap();

        let dispatcher = OutboxDispatcher::new(store.clone(), vec![], config());
        let recovered = dispatcher.recover(100).await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(store.get("a1").await.unwrap().unwrap().state, OutboxState::Pending);
    }
}
