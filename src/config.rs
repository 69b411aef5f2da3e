//! Typed configuration document (spec §6.1).
//!
//! Deserializable from YAML or TOML via serde; `Config::load_yaml_str` and
//! `Config::load_toml_str` are thin wrappers kept separate so the demo
//! binary and tests can pick whichever is convenient without pulling the
//! parsing choice into library call sites.

use crate::error::ConfigError;
use crate::model::{AlertRule, FeatureWeights};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    pub api_key_env: Option<String>,
    /// Expected seconds between fresh updates, used by the freshness
    /// tracker to classify `Fresh`/`Recent`/`Stale`/`Outdated`.
    pub update_frequency_s: u64,
    /// `sla.max_age_s` (spec §6.1): critical-source SLA ceiling. `None`
    /// means this source isn't SLA-critical.
    #[serde(default)]
    pub sla_max_age_s: Option<u64>,
    pub timeout_ms: u64,
    pub rate_limit_per_second: u32,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub dispatch_poll_interval_ms: u64,
    /// Channel name -> queue concurrency; absent channels default to 1.
    #[serde(default)]
    pub channel_concurrency: HashMap<String, usize>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 60_000,
            dispatch_poll_interval_ms: 250,
            channel_concurrency: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeterminismConfig {
    /// Whether two runs over the same feature history produce byte-identical
    /// `GemScoreSnapshot`s (spec §4.5 determinism requirement). When true,
    /// the scoring pipeline forbids any clock/RNG read inside the hot path.
    pub strict: bool,
    /// Fixed adaptive-weight recalculation interval in scan counts, so
    /// pluggable weight adjustment doesn't depend on wall-clock.
    pub adaptive_recalc_interval: u32,
}

impl Default for DeterminismConfig {
    fn default() -> Self {
        Self {
            strict: true,
            adaptive_recalc_interval: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub default_ttl_s: u64,
    pub max_entries: u64,
    /// Rolling window (seconds) used to compute per-key hit rate for
    /// adaptive TTL extension.
    pub hot_window_s: u64,
    /// Hit-rate threshold above which a key's TTL is extended
    /// (`adaptive_ttl_multiplier`x) instead of expiring on schedule.
    pub hot_threshold: f64,
    pub adaptive_ttl_multiplier: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_s: 300,
            max_entries: 10_000,
            hot_window_s: 300,
            hot_threshold: 0.5,
            adaptive_ttl_multiplier: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    pub weights: HashMap<String, f64>,
    #[serde(with = "alert_rules_codec")]
    pub alert_rules: Vec<AlertRule>,
    pub escalation_policies: Vec<crate::model::EscalationPolicy>,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub determinism: DeterminismConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Wall-clock budget for a single `orchestrator::scan` before it
    /// returns `EngineError::ScanTimeout` (spec §5, §6.5).
    pub scan_timeout_ms: u64,
    pub store_path: String,
}

impl Config {
    /// Parse and fully validate a configuration document: weight-sum
    /// invariant, duplicate rule ids, and metric references all recognized
    /// names. This is the single gate spec §6.1 requires before any
    /// component is constructed from the document.
    pub fn validate(&self) -> Result<FeatureWeights, ConfigError> {
        let weights = FeatureWeights::validated(self.weights.clone())?;

        let mut seen = std::collections::HashSet::new();
        for rule in &self.alert_rules {
            if !seen.insert(rule.id.clone()) {
                return Err(ConfigError::DuplicateRuleId {
                    rule_id: rule.id.clone(),
                });
            }
            check_condition_metrics(rule, &rule.condition, &weights)?;
        }

        Ok(weights)
    }

    pub fn load_yaml_str(s: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn load_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

/// `alert_rules` is stored as `Vec<AlertRule>` for convenient construction
/// in Rust call sites, but on the wire (YAML/TOML config documents) it's
/// written and read through the external grammar (spec §6.3), not the
/// internal model's own serde shape.
mod alert_rules_codec {
    use crate::alerts::grammar::AlertRuleDoc;
    use crate::model::AlertRule;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(rules: &[AlertRule], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let docs: Vec<AlertRuleDoc> = rules.iter().map(AlertRuleDoc::from).collect();
        docs.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<AlertRule>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let docs = Vec::<AlertRuleDoc>::deserialize(deserializer)?;
        Ok(docs.iter().map(AlertRule::from).collect())
    }
}

/// Known derived metrics beyond the configured weight names — rules may
/// reference these even though they never appear in `FeatureWeights`.
const DERIVED_METRICS: [&str; 3] = ["gem_score", "confidence", "delta_score"];

fn check_condition_metrics(
    rule: &AlertRule,
    condition: &crate::model::Condition,
    weights: &FeatureWeights,
) -> Result<(), ConfigError> {
    match condition {
        crate::model::Condition::Simple { metric, .. } => {
            if weights.get(metric).is_none() && !DERIVED_METRICS.contains(&metric.as_str()) {
                return Err(ConfigError::UnknownMetric {
                    rule_id: rule.id.clone(),
                    metric: metric.clone(),
                });
            }
            Ok(())
        }
        crate::model::Condition::Compound { conditions, .. } => {
            for c in conditions {
                check_condition_metrics(rule, c, weights)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompareOp, Condition, RuleVersion, Severity, Threshold};

    fn base_rule(metric: &str) -> AlertRule {
        AlertRule {
            id: "r1".into(),
            version: RuleVersion::V2,
            enabled: true,
            condition: Condition::Simple {
                metric: metric.into(),
                operator: CompareOp::Gt,
                threshold: Threshold::Number(0.8),
            },
            severity: Severity::Warning,
            channels: vec!["log".into()],
            suppression_duration_s: 60,
            escalation_policy_id: None,
            message_template: "{{token}} crossed {{metric}}".into(),
            tags: vec![],
        }
    }

    fn base_config(metric: &str) -> Config {
        let mut weights = HashMap::new();
        weights.insert("sentiment".to_string(), 1.0);
        Config {
            sources: vec![],
            weights,
            alert_rules: vec![base_rule(metric)],
            escalation_policies: vec![],
            outbox: OutboxConfig::default(),
            determinism: DeterminismConfig::default(),
            cache: CacheConfig::default(),
            scan_timeout_ms: 5000,
            store_path: ":memory:".into(),
        }
    }

    #[test]
    fn validate_accepts_known_metric() {
        assert!(base_config("sentiment").validate().is_ok());
    }

    #[test]
    fn validate_accepts_derived_metric() {
        assert!(base_config("gem_score").validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_metric() {
        let err = base_config("nonsense").validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMetric { .. }));
    }

    #[test]
    fn validate_rejects_duplicate_rule_ids() {
        let mut cfg = base_config("sentiment");
        cfg.alert_rules.push(base_rule("sentiment"));
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRuleId { .. }));
    }

    #[test]
    fn alert_rules_parse_through_the_external_yaml_grammar() {
        let yaml = r#"
sources: []
weights:
  sentiment: 1.0
alert_rules:
  - id: r1
    version: v1
    enabled: true
    condition:
      type: simple
      metric: sentiment
      operator: gt
      threshold: 0.5
    severity: warning
    channels: [log]
    suppression_duration_s: 60
    message_template: "{{token}}"
escalation_policies: []
scan_timeout_ms: 5000
store_path: ":memory:"
"#;
        let cfg = Config::load_yaml_str(yaml).unwrap();
        assert_eq!(cfg.alert_rules.len(), 1);
        assert_eq!(cfg.alert_rules[0].id, "r1");
        assert_eq!(cfg.alert_rules[0].version, RuleVersion::V1);
        match &cfg.alert_rules[0].condition {
            Condition::Simple { metric, operator, .. } => {
                assert_eq!(metric, "sentiment");
                assert_eq!(*operator, CompareOp::Gt);
            }
            _ => panic!("expected simple condition"),
        }
    }
}
