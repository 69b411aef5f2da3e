//! Core data model shared across every component (spec §3).
//!
//! Timestamps are Unix seconds (`i64`) everywhere in this crate — sources
//! that report milliseconds or nanoseconds are coerced to seconds once, at
//! the ingestion boundary (`ingestion::client`), per the timestamp-unit
//! Open Question resolved in `DESIGN.md`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical identifier for a token: case-normalised symbol plus an
/// optional chain-qualified contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Case-normalised symbol, used as the primary key everywhere else in
    /// the engine (feature store keys, outbox dedupe keys, etc).
    pub symbol: String,
    /// Human-facing display symbol (may preserve original casing).
    pub display_symbol: String,
    /// Chain-qualified contract address, if known.
    pub contract_address: Option<String>,
    /// Sources that discovered or corroborate this token.
    pub discovery_sources: Vec<String>,
}

impl Token {
    pub fn new(symbol: impl Into<String>) -> Self {
        let display_symbol = symbol.into();
        Self {
            symbol: display_symbol.to_uppercase(),
            display_symbol,
            contract_address: None,
            discovery_sources: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = Some(address.into());
        self
    }
}

/// Coarse category tag used only for grouping/UI purposes; it never
/// influences scoring directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureCategory {
    Market,
    Liquidity,
    Sentiment,
    OnChain,
    Technical,
    Quality,
}

/// A tagged-sum feature value. Normalization (scoring::normalize) dispatches
/// on the variant — see spec §9's note on avoiding duck-typed feature
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FeatureValue {
    Numeric(f64),
    Boolean(bool),
    Categorical(String),
    Timestamp(i64),
    Vector(Vec<f64>),
}

impl FeatureValue {
    /// Best-effort conversion to a plain `f64`, used by the rule evaluator
    /// for metric comparisons against a `Simple` condition threshold.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Numeric(v) => Some(*v),
            FeatureValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            FeatureValue::Timestamp(t) => Some(*t as f64),
            FeatureValue::Vector(v) => v.first().copied(),
            FeatureValue::Categorical(_) => None,
        }
    }
}

/// Provenance attached to every feature and every ingestion response:
/// which source produced it, through which endpoint, under which request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub endpoint: String,
    pub request_id: String,
    pub fetched_at: i64,
}

/// `(token, name, value, feature_type, timestamp, confidence, category,
/// provenance)` tuple from spec §3. `(token, name, timestamp)` is unique;
/// history is append-only (enforced by the feature store, not this type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub token: String,
    pub name: String,
    pub value: FeatureValue,
    pub timestamp: i64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub category: FeatureCategory,
    pub provenance: Provenance,
}

impl Feature {
    /// Clamp confidence into `[0, 1]` in case a caller passed something out
    /// of range; scoring treats out-of-range confidence as a programming
    /// error elsewhere, so this is the one place it's made safe by
    /// construction.
    pub fn clamp_confidence(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// The eight canonical feature-weight names from spec §3. Additional
/// weights are allowed as long as the sum invariant holds; these constants
/// exist so normalization and rule authors share one spelling.
pub mod canonical_features {
    pub const SENTIMENT: &str = "sentiment";
    pub const ACCUMULATION: &str = "accumulation";
    pub const ONCHAIN_ACTIVITY: &str = "onchain_activity";
    pub const LIQUIDITY_DEPTH: &str = "liquidity_depth";
    pub const TOKENOMICS_RISK: &str = "tokenomics_risk";
    pub const CONTRACT_SAFETY: &str = "contract_safety";
    pub const NARRATIVE_MOMENTUM: &str = "narrative_momentum";
    pub const COMMUNITY_GROWTH: &str = "community_growth";

    pub const ALL: [&str; 8] = [
        SENTIMENT,
        ACCUMULATION,
        ONCHAIN_ACTIVITY,
        LIQUIDITY_DEPTH,
        TOKENOMICS_RISK,
        CONTRACT_SAFETY,
        NARRATIVE_MOMENTUM,
        COMMUNITY_GROWTH,
    ];
}

/// A mapping from feature name to non-negative weight. The sum of all
/// weights must equal 1.0 within `WEIGHT_SUM_TOLERANCE`; this is enforced
/// at construction (`FeatureWeights::validated`), never re-checked per
/// scoring call (spec §4.5: weight-sum invariant violations are a fatal
/// configuration error).
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights(pub HashMap<String, f64>);

impl FeatureWeights {
    /// Validate the sum-to-one invariant and reject negative weights.
    pub fn validated(weights: HashMap<String, f64>) -> Result<Self, crate::error::ConfigError> {
        for (name, weight) in &weights {
            if *weight < 0.0 {
                return Err(crate::error::ConfigError::NegativeWeight {
                    name: name.clone(),
                    weight: *weight,
                });
            }
        }
        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(crate::error::ConfigError::WeightSumInvariant {
                sum,
                tolerance: WEIGHT_SUM_TOLERANCE,
            });
        }
        Ok(FeatureWeights(weights))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }
}

/// Immutable record of a scoring event — the atomic unit of delta
/// explainability (spec §3, §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemScoreSnapshot {
    pub token: String,
    pub timestamp: i64,
    /// `score = 100 * sum(weight[n] * features[n])`, in `[0, 100]`.
    pub score: f64,
    /// Weight-weighted average of per-feature confidences, in `[0, 1]`.
    pub confidence: f64,
    /// Normalized `[0, 1]` value per feature name actually used in scoring.
    pub features: HashMap<String, f64>,
    /// `100 * weight[n] * features[n]` per feature name.
    pub contributions: HashMap<String, f64>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub missing_sources: Vec<String>,
    pub status: ScanStatus,
    /// Raw feature values carried along for explainability even when a
    /// feature falls outside the active weight set (spec §3: "may be
    /// carried in metadata but do not influence score").
    pub extra_features: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Success,
    Partial,
    Failed,
}

impl Default for ScanStatus {
    fn default() -> Self {
        ScanStatus::Success
    }
}

/// Per-feature delta, sorted by the caller into top-positive/top-negative
/// lists ranked by `|delta_contribution|` (spec §3, §4.5 step 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDelta {
    pub name: String,
    pub previous_value: f64,
    pub current_value: f64,
    pub delta_value: f64,
    pub delta_contribution: f64,
}

/// Derived, non-persistent comparison between two consecutive snapshots
/// (spec §3, §4.4's `compute_score_delta`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDelta {
    pub token: String,
    pub previous_timestamp: i64,
    pub current_timestamp: i64,
    pub previous_score: f64,
    pub current_score: f64,
    pub delta_score: f64,
    pub percent_change: f64,
    pub time_delta_hours: f64,
    /// Feature deltas sorted by `|delta_contribution|` descending.
    pub feature_deltas: Vec<FeatureDelta>,
    pub narrative: String,
}

impl ScoreDelta {
    pub fn top_positive(&self, k: usize) -> Vec<&FeatureDelta> {
        self.feature_deltas
            .iter()
            .filter(|d| d.delta_contribution > 0.0)
            .take(k)
            .collect()
    }

    pub fn top_negative(&self, k: usize) -> Vec<&FeatureDelta> {
        self.feature_deltas
            .iter()
            .filter(|d| d.delta_contribution < 0.0)
            .take(k)
            .collect()
    }
}

/// Health classification for a data source, derived from its rolling
/// success rate (spec §4.1's SLA tracker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceHealth {
    Healthy,
    Degraded,
    Failed,
}

/// `(source_name, latency_p50/p95/p99, success_rate, uptime_pct, state)`
/// from spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSla {
    pub source_name: String,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub success_rate: f64,
    pub uptime_pct: f64,
    pub state: SourceHealth,
}

/// Freshness classification relative to a source's expected update
/// frequency (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreshnessLevel {
    Fresh,
    Recent,
    Stale,
    Outdated,
}

/// Circuit breaker state per spec §3/§4.1's three-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Comparison operator for a `Simple` condition leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Lt,
    Lte,
    Eq,
    Neq,
    Gte,
    Gt,
}

/// Boolean combinator for a `Compound` condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// A threshold value a `Simple` condition compares a metric against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Number(f64),
    Bool(bool),
}

/// Condition tree: `Simple(metric, op, threshold)` or
/// `Compound(op, children)`. Finite and acyclic by construction — there is
/// no identifier-based self-reference, only nested ownership, so a cycle is
/// structurally impossible (spec §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Condition {
    Simple {
        metric: String,
        operator: CompareOp,
        threshold: Threshold,
    },
    Compound {
        operator: LogicalOp,
        conditions: Vec<Condition>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationStep {
    pub after_seconds: u64,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub name: String,
    pub steps: Vec<EscalationStep>,
}

/// `(id, version, enabled, condition, severity, channels,
/// suppression_duration_s, escalation_policy_id?, message_template, tags)`
/// from spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub version: RuleVersion,
    pub enabled: bool,
    pub condition: Condition,
    pub severity: Severity,
    pub channels: Vec<String>,
    pub suppression_duration_s: u64,
    pub escalation_policy_id: Option<String>,
    pub message_template: String,
    pub tags: Vec<String>,
}

/// `(token, timestamp, metric map, feature diff?, prior period?,
/// rule_ids_matched)` from spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub token: String,
    pub timestamp: i64,
    pub metrics: HashMap<String, FeatureValue>,
    pub feature_diff: Option<ScoreDelta>,
    pub prior_period: Option<GemScoreSnapshot>,
    pub rule_ids_matched: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxState {
    Pending,
    InFlight,
    Delivered,
    Failed,
    Suppressed,
}

/// `(alert_id, rule_id, token, severity, rendered_message, channels,
/// enqueued_at, state, attempts, dedupe_key, next_attempt_at)` from spec §3,
/// plus the two fields the dispatcher needs to drive time-based escalation
/// (spec §4.6/§4.7): which policy (if any) governs this entry, and the
/// highest `after_seconds` step already dispatched so a step is never fired
/// twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertOutboxEntry {
    pub alert_id: String,
    pub rule_id: String,
    pub token: String,
    pub severity: Severity,
    pub rendered_message: String,
    pub channels: Vec<String>,
    pub enqueued_at: i64,
    pub state: OutboxState,
    pub attempts: u32,
    pub dedupe_key: String,
    pub next_attempt_at: i64,
    pub escalation_policy_id: Option<String>,
    pub escalated_through_s: u64,
}
