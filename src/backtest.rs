//! C9: Backtest harness — fixed-time-step replay of historical feature
//! snapshots through scoring and alert evaluation, with the outbox routed to
//! an in-memory sink instead of live channels (spec §4.9).
//!
//! New relative to the teacher (it has no backtest concept), but the
//! replay-then-aggregate shape is grounded on
//! `oracle::strategy_optimizer::StrategyOptimizer` (iterate historical
//! records, recompute parameters) and
//! `oracle::performance_monitor::PerformanceMonitor::analyze_performance`
//! (fold a time-ordered record stream into one summary report).

use crate::alerts::AlertEngine;
use crate::model::{AlertRule, EscalationPolicy, Feature, FeatureWeights, GemScoreSnapshot, Severity};
use crate::orchestrator::build_candidate;
use crate::scoring::normalize::Transform;
use std::collections::{HashMap, HashSet};

/// One time step of historical data to replay for a single token.
#[derive(Debug, Clone)]
pub struct BacktestStep {
    pub token: String,
    pub timestamp: i64,
    pub features: HashMap<String, Feature>,
    /// Ground truth for precision@k, if this run is being scored against a
    /// known outcome (e.g. "this token went on to 10x").
    pub label: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeverityCounts {
    pub info: usize,
    pub warning: usize,
    pub high: usize,
    pub critical: usize,
}

impl SeverityCounts {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Info => self.info += 1,
            Severity::Warning => self.warning += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
    }
}

/// Aggregate result of one replay (spec §4.9).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BacktestReport {
    pub snapshots_scored: usize,
    pub alerts_fired: usize,
    pub alerts_suppressed: usize,
    pub severity_counts: SeverityCounts,
    /// Fraction of the top-`k` highest-scored labeled steps whose label was
    /// `true`. `None` when no step carried a label or `k` was zero.
    pub precision_at_k: Option<f64>,
}

pub struct BacktestHarness {
    weights: FeatureWeights,
    transforms: HashMap<String, Transform>,
    alert_engine: AlertEngine,
}

impl BacktestHarness {
    pub fn new(weights: FeatureWeights, transforms: HashMap<String, Transform>, alert_engine: AlertEngine) -> Self {
        Self { weights, transforms, alert_engine }
    }

    /// Replay `steps` (assumed time-ordered) through the same scoring and
    /// alert-evaluation path the live orchestrator uses, routing the outbox
    /// to an in-memory tally rather than real channels. Suppression is
    /// approximated here as "a dedupe key already seen earlier in this
    /// replay" — the same admission rule the live outbox store enforces
    /// (spec §4.6).
    pub fn run(&self, steps: &[BacktestStep], k: usize) -> BacktestReport {
        let mut severity_counts = SeverityCounts::default();
        let mut alerts_fired = 0usize;
        let mut alerts_suppressed = 0usize;
        let mut seen_dedupe_keys: HashSet<String> = HashSet::new();
        let mut previous_snapshots: HashMap<String, GemScoreSnapshot> = HashMap::new();
        let mut labeled_scores: Vec<(f64, bool)> = Vec::new();

        for step in steps {
            let snapshot = crate::scoring::score(&step.token, step.timestamp, &step.features, &self.weights, &self.transforms);

            let delta = previous_snapshots.get(&step.token).map(|prev| crate::scoring::delta::compare(prev, &snapshot));
            let candidate = build_candidate(&snapshot, delta);

            for entry in self.alert_engine.evaluate(&candidate) {
                if seen_dedupe_keys.insert(entry.dedupe_key.clone()) {
                    alerts_fired += 1;
                    severity_counts.record(entry.severity);
                } else {
                    alerts_suppressed += 1;
                }
            }

            if let Some(label) = step.label {
                labeled_scores.push((snapshot.score, label));
            }
            previous_snapshots.insert(step.token.clone(), snapshot);
        }

        BacktestReport {
            snapshots_scored: steps.len(),
            alerts_fired,
            alerts_suppressed,
            severity_counts,
            precision_at_k: precision_at_k(&labeled_scores, k),
        }
    }
}

fn precision_at_k(labeled_scores: &[(f64, bool)], k: usize) -> Option<f64> {
    if labeled_scores.is_empty() || k == 0 {
        return None;
    }
    let mut sorted = labeled_scores.to_vec();
    sorted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let top_k = k.min(sorted.len());
    let hits = sorted.into_iter().take(top_k).filter(|(_, label)| *label).count();
    Some(hits as f64 / top_k as f64)
}

/// Run the same replay twice, once per rule set, for an A/B comparison
/// between a V1 and V2 edition of the same alert rules (spec §4.9's optional
/// per-rule-version comparison).
pub fn compare_rule_versions(
    steps: &[BacktestStep],
    weights: &FeatureWeights,
    transforms: &HashMap<String, Transform>,
    rules_a: Vec<AlertRule>,
    rules_b: Vec<AlertRule>,
    policies: Vec<EscalationPolicy>,
    k: usize,
) -> (BacktestReport, BacktestReport) {
    let harness_a = BacktestHarness::new(weights.clone(), transforms.clone(), AlertEngine::new(rules_a, policies.clone()));
    let harness_b = BacktestHarness::new(weights.clone(), transforms.clone(), AlertEngine::new(rules_b, policies));
    (harness_a.run(steps, k), harness_b.run(steps, k))
}
