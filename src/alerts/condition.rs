//! Compound condition-tree evaluation (C6, spec §4.6).
//!
//! Recursive, short-circuiting evaluator in the spirit of the `eval_expr`
//! walk in the wf-core rule executor, but over this crate's
//! `Simple`/`Compound` tree instead of a general expression AST: `Simple`
//! leaves compare a named metric against a threshold, `Compound` nodes
//! combine children with AND/OR/NOT and stop evaluating children as soon
//! as the result is determined.

use crate::model::{CompareOp, Condition, FeatureValue, LogicalOp, Threshold};
use std::collections::HashMap;

/// Missing-metric semantics (spec §9 Open Question, resolved in
/// `DESIGN.md`): a `Simple` condition whose metric is absent from
/// `metrics` evaluates to `false` rather than erroring, and the metric
/// name is appended to `missing` for the caller to surface in
/// `AlertCandidate` diagnostics.
pub fn evaluate(condition: &Condition, metrics: &HashMap<String, FeatureValue>, missing: &mut Vec<String>) -> bool {
    match condition {
        Condition::Simple { metric, operator, threshold } => {
            let Some(value) = metrics.get(metric) else {
                missing.push(metric.clone());
                return false;
            };
            compare(value, *operator, threshold)
        }
        Condition::Compound { operator, conditions } => match operator {
            LogicalOp::And => conditions.iter().all(|c| evaluate(c, metrics, missing)),
            LogicalOp::Or => conditions.iter().any(|c| evaluate(c, metrics, missing)),
            LogicalOp::Not => conditions.first().map(|c| !evaluate(c, metrics, missing)).unwrap_or(false),
        },
    }
}

fn compare(value: &FeatureValue, operator: CompareOp, threshold: &Threshold) -> bool {
    match (value, threshold) {
        (FeatureValue::Boolean(b), Threshold::Bool(t)) => match operator {
            CompareOp::Eq => b == t,
            CompareOp::Neq => b != t,
            _ => false,
        },
        (_, Threshold::Number(t)) => {
            let Some(v) = value.as_f64() else { return false };
            match operator {
                CompareOp::Lt => v < *t,
                CompareOp::Lte => v <= *t,
                CompareOp::Eq => (v - t).abs() < f64::EPSILON,
                CompareOp::Neq => (v - t).abs() >= f64::EPSILON,
                CompareOp::Gte => v >= *t,
                CompareOp::Gt => v > *t,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, f64)]) -> HashMap<String, FeatureValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), FeatureValue::Numeric(*v))).collect()
    }

    #[test]
    fn simple_condition_compares_threshold() {
        let c = Condition::Simple { metric: "score".into(), operator: CompareOp::Gt, threshold: Threshold::Number(50.0) };
        let mut missing = vec![];
        assert!(evaluate(&c, &metrics(&[("score", 75.0)]), &mut missing));
        assert!(!evaluate(&c, &metrics(&[("score", 25.0)]), &mut missing));
        assert!(missing.is_empty());
    }

    #[test]
    fn missing_metric_is_false_and_recorded() {
        let c = Condition::Simple { metric: "score".into(), operator: CompareOp::Gt, threshold: Threshold::Number(50.0) };
        let mut missing = vec![];
        assert!(!evaluate(&c, &metrics(&[]), &mut missing));
        assert_eq!(missing, vec!["score".to_string()]);
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let c = Condition::Compound {
            operator: LogicalOp::And,
            conditions: vec![
                Condition::Simple { metric: "a".into(), operator: CompareOp::Gt, threshold: Threshold::Number(1.0) },
                Condition::Simple { metric: "b".into(), operator: CompareOp::Gt, threshold: Threshold::Number(1.0) },
            ],
        };
        let mut missing = vec![];
        // "a" fails, so "b" (missing) should never be evaluated/recorded.
        assert!(!evaluate(&c, &metrics(&[("a", 0.0)]), &mut missing));
        assert!(missing.is_empty());
    }

    #[test]
    fn or_short_circuits_on_first_true() {
        let c = Condition::Compound {
            operator: LogicalOp::Or,
            conditions: vec![
                Condition::Simple { metric: "a".into(), operator: CompareOp::Gt, threshold: Threshold::Number(1.0) },
                Condition::Simple { metric: "b".into(), operator: CompareOp::Gt, threshold: Threshold::Number(1.0) },
            ],
        };
        let mut missing = vec![];
        assert!(evaluate(&c, &metrics(&[("a", 5.0)]), &mut missing));
        assert!(missing.is_empty());
    }

    #[test]
    fn not_inverts_child() {
        let c = Condition::Compound {
            operator: LogicalOp::Not,
            conditions: vec![Condition::Simple { metric: "a".into(), operator: CompareOp::Gt, threshold: Threshold::Number(1.0) }],
        };
        let mut missing = vec![];
        assert!(evaluate(&c, &metrics(&[("a", 0.0)]), &mut missing));
    }

    #[test]
    fn nested_compound_evaluates_recursively() {
        let c = Condition::Compound {
            operator: LogicalOp::And,
            conditions: vec![
                Condition::Simple { metric: "a".into(), operator: CompareOp::Gt, threshold: Threshold::Number(1.0) },
                Condition::Compound {
                    operator: LogicalOp::Or,
                    conditions: vec![
                        Condition::Simple { metric: "b".into(), operator: CompareOp::Lt, threshold: Threshold::Number(1.0) },
                        Condition::Simple { metric: "c".into(), operator: CompareOp::Gte, threshold: Threshold::Number(1.0) },
                    ],
                },
            ],
        };
        let mut missing = vec![];
        assert!(evaluate(&c, &metrics(&[("a", 5.0), ("b", 5.0), ("c", 1.0)]), &mut missing));
    }
}
