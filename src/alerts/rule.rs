//! Rule-versioning and escalation helpers (C6, spec §4.6).
//!
//! V1 rules are flat: one severity, one channel set, no escalation. V2
//! rules add compound conditions, templating, and escalation policies.
//! Both versions share the same `AlertRule` struct; this module is where
//! the version distinction actually changes behavior.

use crate::model::{AlertRule, EscalationPolicy, RuleVersion};
use std::collections::HashMap;

/// The channel set a firing alert should be dispatched to, given how long
/// it's been since the alert first fired. V1 rules always return their
/// configured `channels`. V2 rules start from the base `channels` and
/// accumulate every escalation step whose `after_seconds` has elapsed —
/// escalation only adds channels, it never drops the original entry or its
/// original channels (spec §4.6: "escalation never deletes the original
/// entry"). Deduplicated, order preserved.
pub fn active_channels(
    rule: &AlertRule,
    policies: &HashMap<String, EscalationPolicy>,
    seconds_since_first_fired: u64,
) -> Vec<String> {
    let mut active: Vec<String> = rule.channels.clone();

    if rule.version == RuleVersion::V2 {
        if let Some(policy) = rule.escalation_policy_id.as_ref().and_then(|id| policies.get(id)) {
            for step in &policy.steps {
                if step.after_seconds <= seconds_since_first_fired {
                    for channel in &step.channels {
                        if !active.contains(channel) {
                            active.push(channel.clone());
                        }
                    }
                }
            }
        }
    }

    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompareOp, Condition, EscalationStep, Severity, Threshold};

    fn base_rule(version: RuleVersion) -> AlertRule {
        AlertRule {
            id: "r1".into(),
            version,
            enabled: true,
            condition: Condition::Simple { metric: "score".into(), operator: CompareOp::Gt, threshold: Threshold::Number(50.0) },
            severity: Severity::Warning,
            channels: vec!["log".into()],
            suppression_duration_s: 60,
            escalation_policy_id: Some("p1".into()),
            message_template: "{{token}}".into(),
            tags: vec![],
        }
    }

    fn policy() -> EscalationPolicy {
        EscalationPolicy {
            name: "p1".into(),
            steps: vec![
                EscalationStep { after_seconds: 300, channels: vec!["slack".into()] },
                EscalationStep { after_seconds: 1800, channels: vec!["pager".into()] },
            ],
        }
    }

    #[test]
    fn v1_rules_ignore_escalation() {
        let rule = base_rule(RuleVersion::V1);
        let policies = HashMap::from([("p1".to_string(), policy())]);
        assert_eq!(active_channels(&rule, &policies, 10_000), vec!["log".to_string()]);
    }

    #[test]
    fn v2_uses_base_channels_before_first_step() {
        let rule = base_rule(RuleVersion::V2);
        let policies = HashMap::from([("p1".to_string(), policy())]);
        assert_eq!(active_channels(&rule, &policies, 100), vec!["log".to_string()]);
    }

    #[test]
    fn v2_escalates_additively() {
        let rule = base_rule(RuleVersion::V2);
        let policies = HashMap::from([("p1".to_string(), policy())]);
        assert_eq!(active_channels(&rule, &policies, 400), vec!["log".to_string(), "slack".to_string()]);
        assert_eq!(
            active_channels(&rule, &policies, 2000),
            vec!["log".to_string(), "slack".to_string(), "pager".to_string()]
        );
    }

    #[test]
    fn missing_policy_falls_back_to_base_channels() {
        let rule = base_rule(RuleVersion::V2);
        assert_eq!(active_channels(&rule, &HashMap::new(), 10_000), vec!["log".to_string()]);
    }
}
