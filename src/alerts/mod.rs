//! C6: Alert rule evaluation — compound conditions, templating,
//! escalation, and dedupe-key assignment.

pub mod condition;
pub mod dedupe;
pub mod engine;
pub mod grammar;
pub mod rule;
pub mod template;

pub use engine::AlertEngine;
pub use grammar::{parse_rule_yaml, rule_to_yaml};
