//! Alert message templating (C6, spec §4.6).
//!
//! `{{placeholder}}` substitution with graceful fallback: a placeholder
//! missing from the value map is left verbatim in the rendered string
//! rather than failing the render, so a typo'd template degrades to a
//! slightly ugly message instead of silently dropping the alert.

use std::collections::HashMap;
use tracing::warn;

pub fn render(template: &str, values: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_start = &rest[start + 2..];
        match after_start.find("}}") {
            Some(end) => {
                let key = after_start[..end].trim();
                match values.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        warn!("template placeholder '{key}' has no value, leaving it literal");
                        out.push_str(&format!("{{{{{key}}}}}"));
                    }
                }
                rest = &after_start[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after_start;
            }
        }
    }
    out.push_str(rest);
    out
}
