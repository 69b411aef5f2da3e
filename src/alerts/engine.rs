//! Alert evaluation engine (C6, spec §4.6): turns an `AlertCandidate` plus
//! the active rule set into zero or more `AlertOutboxEntry` values ready
//! for C7 to enqueue. Suppression itself is decided by the outbox at
//! delivery time (spec §4.7) — this stage only attaches the `dedupe_key`
//! each entry will be suppressed or delivered under.

use crate::alerts::{condition, dedupe, rule::active_channels, template};
use crate::model::{AlertCandidate, AlertOutboxEntry, AlertRule, EscalationPolicy, OutboxState, RuleVersion};
use std::collections::HashMap;

pub struct AlertEngine {
    rules: Vec<AlertRule>,
    policies: HashMap<String, EscalationPolicy>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, policies: Vec<EscalationPolicy>) -> Self {
        Self {
            rules,
            policies: policies.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// Evaluate every enabled rule against `candidate`, returning one
    /// `AlertOutboxEntry` per rule whose condition is satisfied.
    pub fn evaluate(&self, candidate: &AlertCandidate) -> Vec<AlertOutboxEntry> {
        let mut entries = Vec::new();

        for rule in self.rules.iter().filter(|r| r.enabled) {
            let mut missing = Vec::new();
            if !condition::evaluate(&rule.condition, &candidate.metrics, &mut missing) {
                continue;
            }

            let values = render_values(candidate, &missing);
            let message = template::render(&rule.message_template, &values);
            let channels = active_channels(rule, &self.policies, 0);
            let key = dedupe::dedupe_key(&rule.id, &candidate.token, candidate.timestamp, rule.suppression_duration_s);

            // V1 rules never escalate (rule::active_channels' documented
            // invariant); carrying the policy id through for them would let
            // the outbox dispatcher's time-based escalation fire anyway.
            let escalation_policy_id = match rule.version {
                RuleVersion::V2 => rule.escalation_policy_id.clone(),
                RuleVersion::V1 => None,
            };

            entries.push(AlertOutboxEntry {
                alert_id: uuid::Uuid::new_v4().to_string(),
                rule_id: rule.id.clone(),
                token: candidate.token.clone(),
                severity: rule.severity,
                rendered_message: message,
                channels,
                enqueued_at: candidate.timestamp,
                state: OutboxState::Pending,
                attempts: 0,
                dedupe_key: key,
                next_attempt_at: candidate.timestamp,
                escalation_policy_id,
                escalated_through_s: 0,
            });
        }

        entries
    }
}

fn render_values(candidate: &AlertCandidate, missing: &[String]) -> HashMap<String, String> {
    let mut values = HashMap::new();
    values.insert("token".to_string(), candidate.token.clone());
    values.insert("timestamp".to_string(), candidate.timestamp.to_string());
    for (name, value) in &candidate.metrics {
        if let Some(f) = value.as_f64() {
            values.insert(name.clone(), format!("{f:.2}"));
        }
    }
    if !missing.is_empty() {
        values.insert("missing_metrics".to_string(), missing.join(", "));
    }
    values
}
