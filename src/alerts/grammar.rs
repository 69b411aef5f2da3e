//! External alert-rule YAML grammar (spec §6.3).
//!
//! The internal `Condition`/`AlertRule` types (`model.rs`) use a serde shape
//! convenient for Rust (`#[serde(tag = "kind")]`, `CompareOp` in lowercase,
//! `LogicalOp`/`RuleVersion`/`Severity` in their Rust casing). Operators
//! hand-author rule files against the stable grammar spec §6.3 actually
//! documents (`type: compound|simple`, `operator: AND|OR|NOT`, lowercase
//! scalar enums) — this module is the one place that wire format is
//! defined, translating to and from the internal model so the two can
//! diverge independently.

use crate::model::{
    AlertRule, Condition, EscalationPolicy, EscalationStep, LogicalOp, RuleVersion, Severity, Threshold,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum LogicalOpDoc {
    AND,
    OR,
    NOT,
}

impl From<LogicalOp> for LogicalOpDoc {
    fn from(op: LogicalOp) -> Self {
        match op {
            LogicalOp::And => LogicalOpDoc::AND,
            LogicalOp::Or => LogicalOpDoc::OR,
            LogicalOp::Not => LogicalOpDoc::NOT,
        }
    }
}

impl From<LogicalOpDoc> for LogicalOp {
    fn from(op: LogicalOpDoc) -> Self {
        match op {
            LogicalOpDoc::AND => LogicalOp::And,
            LogicalOpDoc::OR => LogicalOp::Or,
            LogicalOpDoc::NOT => LogicalOp::Not,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleVersionDoc {
    V1,
    V2,
}

impl From<RuleVersion> for RuleVersionDoc {
    fn from(v: RuleVersion) -> Self {
        match v {
            RuleVersion::V1 => RuleVersionDoc::V1,
            RuleVersion::V2 => RuleVersionDoc::V2,
        }
    }
}

impl From<RuleVersionDoc> for RuleVersion {
    fn from(v: RuleVersionDoc) -> Self {
        match v {
            RuleVersionDoc::V1 => RuleVersion::V1,
            RuleVersionDoc::V2 => RuleVersion::V2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityDoc {
    Info,
    Warning,
    High,
    Critical,
}

impl From<Severity> for SeverityDoc {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Info => SeverityDoc::Info,
            Severity::Warning => SeverityDoc::Warning,
            Severity::High => SeverityDoc::High,
            Severity::Critical => SeverityDoc::Critical,
        }
    }
}

impl From<SeverityDoc> for Severity {
    fn from(s: SeverityDoc) -> Self {
        match s {
            SeverityDoc::Info => Severity::Info,
            SeverityDoc::Warning => Severity::Warning,
            SeverityDoc::High => Severity::High,
            SeverityDoc::Critical => Severity::Critical,
        }
    }
}

/// Condition tree as hand-authored in a rule file: `type: simple` leaves and
/// `type: compound` interior nodes, matching spec §6.3's grammar exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionDoc {
    Simple {
        metric: String,
        operator: crate::model::CompareOp,
        threshold: Threshold,
    },
    Compound {
        operator: LogicalOpDoc,
        conditions: Vec<ConditionDoc>,
    },
}

impl From<&Condition> for ConditionDoc {
    fn from(c: &Condition) -> Self {
        match c {
            Condition::Simple { metric, operator, threshold } => {
                ConditionDoc::Simple { metric: metric.clone(), operator: *operator, threshold: threshold.clone() }
            }
            Condition::Compound { operator, conditions } => ConditionDoc::Compound {
                operator: (*operator).into(),
                conditions: conditions.iter().map(ConditionDoc::from).collect(),
            },
        }
    }
}

impl From<&ConditionDoc> for Condition {
    fn from(c: &ConditionDoc) -> Self {
        match c {
            ConditionDoc::Simple { metric, operator, threshold } => {
                Condition::Simple { metric: metric.clone(), operator: *operator, threshold: threshold.clone() }
            }
            ConditionDoc::Compound { operator, conditions } => Condition::Compound {
                operator: (*operator).into(),
                conditions: conditions.iter().map(Condition::from).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationStepDoc {
    pub after_seconds: u64,
    pub channels: Vec<String>,
}

impl From<&EscalationStep> for EscalationStepDoc {
    fn from(s: &EscalationStep) -> Self {
        Self { after_seconds: s.after_seconds, channels: s.channels.clone() }
    }
}

impl From<&EscalationStepDoc> for EscalationStep {
    fn from(s: &EscalationStepDoc) -> Self {
        Self { after_seconds: s.after_seconds, channels: s.channels.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicyDoc {
    pub name: String,
    pub steps: Vec<EscalationStepDoc>,
}

impl From<&EscalationPolicy> for EscalationPolicyDoc {
    fn from(p: &EscalationPolicy) -> Self {
        Self { name: p.name.clone(), steps: p.steps.iter().map(EscalationStepDoc::from).collect() }
    }
}

impl From<&EscalationPolicyDoc> for EscalationPolicy {
    fn from(p: &EscalationPolicyDoc) -> Self {
        Self { name: p.name.clone(), steps: p.steps.iter().map(EscalationStep::from).collect() }
    }
}

/// The wire shape of one `alert_rules[]` entry (spec §6.1/§6.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleDoc {
    pub id: String,
    pub version: RuleVersionDoc,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub condition: ConditionDoc,
    pub severity: SeverityDoc,
    pub channels: Vec<String>,
    pub suppression_duration_s: u64,
    #[serde(default)]
    pub escalation_policy_id: Option<String>,
    pub message_template: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl From<&AlertRule> for AlertRuleDoc {
    fn from(r: &AlertRule) -> Self {
        Self {
            id: r.id.clone(),
            version: r.version.into(),
            enabled: r.enabled,
            condition: ConditionDoc::from(&r.condition),
            severity: r.severity.into(),
            channels: r.channels.clone(),
            suppression_duration_s: r.suppression_duration_s,
            escalation_policy_id: r.escalation_policy_id.clone(),
            message_template: r.message_template.clone(),
            tags: r.tags.clone(),
        }
    }
}

impl From<&AlertRuleDoc> for AlertRule {
    fn from(d: &AlertRuleDoc) -> Self {
        Self {
            id: d.id.clone(),
            version: d.version.into(),
            enabled: d.enabled,
            condition: Condition::from(&d.condition),
            severity: d.severity.into(),
            channels: d.channels.clone(),
            suppression_duration_s: d.suppression_duration_s,
            escalation_policy_id: d.escalation_policy_id.clone(),
            message_template: d.message_template.clone(),
            tags: d.tags.clone(),
        }
    }
}

/// Parse one rule from its YAML wire grammar into the internal model.
pub fn parse_rule_yaml(s: &str) -> anyhow::Result<AlertRule> {
    let doc: AlertRuleDoc = serde_yaml::from_str(s)?;
    Ok(AlertRule::from(&doc))
}

/// Serialize a rule back into its YAML wire grammar.
pub fn rule_to_yaml(rule: &AlertRule) -> anyhow::Result<String> {
    Ok(serde_yaml::to_string(&AlertRuleDoc::from(rule))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompareOp, Threshold};

    const V1_YAML: &str = r#"
id: whale-accumulation
version: v1
enabled: true
condition:
  type: simple
  metric: accumulation
  operator: gt
  threshold: 0.8
severity: warning
channels: [log]
suppression_duration_s: 300
message_template: "{{token}} whale accumulation crossed {{accumulation}}"
tags: [accumulation]
"#;

    const V2_YAML: &str = r#"
id: compound-pump
version: v2
enabled: true
condition:
  type: compound
  operator: AND
  conditions:
    - type: simple
      metric: sentiment
      operator: gt
      threshold: 0.7
    - type: compound
      operator: NOT
      conditions:
        - type: simple
          metric: tokenomics_risk
          operator: eq
          threshold: true
severity: high
channels: [log, slack]
suppression_duration_s: 600
escalation_policy_id: pump-escalation
message_template: "{{token}} pump signal"
tags: [pump, compound]
"#;

    #[test]
    fn parses_v1_simple_condition_rule() {
        let rule = parse_rule_yaml(V1_YAML).unwrap();
        assert_eq!(rule.id, "whale-accumulation");
        assert_eq!(rule.version, RuleVersion::V1);
        match rule.condition {
            Condition::Simple { ref metric, operator, ref threshold } => {
                assert_eq!(metric, "accumulation");
                assert_eq!(operator, CompareOp::Gt);
                assert_eq!(*threshold, Threshold::Number(0.8));
            }
            _ => panic!("expected simple condition"),
        }
    }

    #[test]
    fn parses_v2_compound_condition_rule() {
        let rule = parse_rule_yaml(V2_YAML).unwrap();
        assert_eq!(rule.version, RuleVersion::V2);
        match rule.condition {
            Condition::Compound { operator, ref conditions } => {
                assert_eq!(operator, LogicalOp::And);
                assert_eq!(conditions.len(), 2);
            }
            _ => panic!("expected compound condition"),
        }
    }

    #[test]
    fn round_trips_v1_rule() {
        let rule = parse_rule_yaml(V1_YAML).unwrap();
        let serialized = rule_to_yaml(&rule).unwrap();
        let reparsed = parse_rule_yaml(&serialized).unwrap();
        assert_eq!(rule, reparsed);
    }

    #[test]
    fn round_trips_v2_rule() {
        let rule = parse_rule_yaml(V2_YAML).unwrap();
        let serialized = rule_to_yaml(&rule).unwrap();
        let reparsed = parse_rule_yaml(&serialized).unwrap();
        assert_eq!(rule, reparsed);
    }
}
