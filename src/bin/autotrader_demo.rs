//! Demo entry point for the AutoTrader engine.
//!
//! Wires together an in-memory feature store, a couple of synthetic data
//! sources, and a log-only outbox channel, then runs a handful of scans so
//! the engine's moving parts (ingestion, scoring, alerting, dispatch) are
//! visible end to end. Config file loading, process supervision, and a
//! real CLI surface are the host application's job (spec §1's explicit
//! scope boundary) — this binary is a demonstration harness, not a
//! shippable CLI.

use anyhow::Result;
use async_trait::async_trait;
use autotrader_engine::alerts::AlertEngine;
use autotrader_engine::error::FetchError;
use autotrader_engine::ingestion::{DataSource, IngestionClient};
use autotrader_engine::model::{
    AlertRule, CompareOp, Condition, Feature, FeatureCategory, FeatureValue, FeatureWeights,
    Provenance, RuleVersion, Severity, Threshold,
};
use autotrader_engine::outbox::{InMemoryChannel, MemoryOutboxStore, OutboxDispatcher};
use autotrader_engine::reliability::{AdaptiveCache, ReliabilityHub};
use autotrader_engine::store::memory::MemoryFeatureStore;
use autotrader_engine::store::FeatureStore;
use autotrader_engine::Orchestrator;
use clap::Parser;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

/// Run a handful of synthetic scans against an in-memory engine and print
/// the resulting summaries.
#[derive(Parser, Debug)]
#[command(name = "autotrader-demo")]
#[command(about = "Runs a few synthetic scans through the AutoTrader scoring/alerting engine")]
struct Cli {
    /// Tokens to scan, comma-separated.
    #[arg(long, value_delimiter = ',', default_value = "PEPE,WOJAK,SNEK")]
    tokens: Vec<String>,

    /// Emit structured JSON log lines instead of the default compact format.
    #[arg(long, env = "AUTOTRADER_JSON_LOGS", default_value_t = false)]
    json_logs: bool,
}

/// Synthetic "sentiment" data source — returns a random score in `[-1, 1]`.
struct SentimentSource;

#[async_trait]
impl DataSource for SentimentSource {
    fn name(&self) -> &str {
        "sentiment_feed"
    }

    async fn fetch(&self, token: &str) -> Result<Vec<Feature>, FetchError> {
        let value = rand::thread_rng().gen_range(-1.0..=1.0);
        Ok(vec![feature(token, "sentiment", value, "sentiment_feed", FeatureCategory::Sentiment)])
    }
}

/// Synthetic on-chain liquidity source — occasionally times out, exercising
/// the orchestrator's partial-failure tolerance.
struct LiquiditySource;

#[async_trait]
impl DataSource for LiquiditySource {
    fn name(&self) -> &str {
        "liquidity_rpc"
    }

    async fn fetch(&self, token: &str) -> Result<Vec<Feature>, FetchError> {
        if rand::thread_rng().gen_bool(0.15) {
            return Err(FetchError::Timeout);
        }
        let value = rand::thread_rng().gen_range(1_000.0..=5_000_000.0);
        Ok(vec![feature(token, "liquidity_depth", value, "liquidity_rpc", FeatureCategory::Liquidity)])
    }
}

fn feature(token: &str, name: &str, value: f64, source: &str, category: FeatureCategory) -> Feature {
    Feature {
        token: token.to_string(),
        name: name.to_string(),
        value: FeatureValue::Numeric(value),
        timestamp: now_unix(),
        confidence: 0.9,
        category,
        provenance: Provenance {
            source: source.to_string(),
            endpoint: "demo".to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            fetched_at: now_unix(),
        },
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn demo_weights() -> FeatureWeights {
    let mut weights = HashMap::new();
    weights.insert("sentiment".to_string(), 0.5);
    weights.insert("liquidity_depth".to_string(), 0.5);
    FeatureWeights::validated(weights).expect("demo weights sum to 1.0")
}

fn demo_rules() -> Vec<AlertRule> {
    vec![AlertRule {
        id: "gem-score-high".to_string(),
        version: RuleVersion::V2,
        enabled: true,
        condition: Condition::Simple {
            metric: "gem_score".to_string(),
            operator: CompareOp::Gt,
            threshold: Threshold::Number(60.0),
        },
        severity: Severity::High,
        channels: vec!["log".to_string()],
        suppression_duration_s: 300,
        escalation_policy_id: None,
        message_template: "{{token}} crossed gem_score={{gem_score}} (confidence={{confidence}})".to_string(),
        tags: vec!["demo".to_string()],
    }]
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt().with_max_level(Level::INFO);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("starting AutoTrader demo over tokens: {:?}", cli.tokens);

    let reliability = Arc::new(ReliabilityHub::new(3, 30, 20, 0.5, 0.9, 0.5));
    let sources: Vec<Arc<IngestionClient>> = vec![
        Arc::new(IngestionClient::new(
            Arc::new(SentimentSource) as Arc<dyn DataSource>,
            reliability.clone(),
            Arc::new(AdaptiveCache::new(1_000, Duration::from_secs(60), Duration::from_secs(300), 0.5, 3.0)),
            50,
            2,
            Duration::from_millis(500),
        )),
        Arc::new(IngestionClient::new(
            Arc::new(LiquiditySource) as Arc<dyn DataSource>,
            reliability,
            Arc::new(AdaptiveCache::new(1_000, Duration::from_secs(60), Duration::from_secs(300), 0.5, 3.0)),
            50,
            2,
            Duration::from_millis(500),
        )),
    ];

    let feature_store: Arc<dyn FeatureStore> = Arc::new(MemoryFeatureStore::new());
    let outbox_store: Arc<dyn autotrader_engine::outbox::OutboxStore> = Arc::new(MemoryOutboxStore::new());
    let log_channel = Arc::new(InMemoryChannel::new("log"));
    let channel: Arc<dyn autotrader_engine::outbox::AlertChannel> = log_channel.clone();
    let outbox = Arc::new(OutboxDispatcher::new(
        outbox_store,
        vec![channel],
        autotrader_engine::config::OutboxConfig::default(),
    ));
    let alert_engine = AlertEngine::new(demo_rules(), vec![]);
    let freshness = Arc::new(Mutex::new(autotrader_engine::freshness::FreshnessTracker::new()));

    let orchestrator = Orchestrator::new(
        sources,
        feature_store,
        demo_weights(),
        autotrader_engine::scoring::normalize::default_transforms(),
        alert_engine,
        outbox.clone(),
        freshness,
        4,
        5_000,
        autotrader_engine::config::DeterminismConfig::default().adaptive_recalc_interval,
    );

    for token in &cli.tokens {
        let outcome = orchestrator.scan(token, now_unix()).await?;
        info!(
            token = %outcome.token,
            score = outcome.score,
            confidence = outcome.confidence,
            status = ?outcome.status,
            missing_sources = ?outcome.missing_sources,
            rule_hits = ?outcome.rule_hits,
            "scan complete"
        );
        outbox.dispatch_once(now_unix()).await?;
    }

    info!("delivered {} alert(s) via the log channel", log_channel.delivered().len());
    Ok(())
}
