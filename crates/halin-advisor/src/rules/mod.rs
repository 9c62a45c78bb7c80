//! The standard rule battery.

pub mod cluster;
pub mod configuration;
pub mod memory;
pub mod plugins;
pub mod schema;
pub mod security;

use serde_json::Value;

use crate::advice::Category;
use crate::engine::RuleGroup;

/// Every rule group, in evaluation order.
pub fn default_groups() -> Vec<RuleGroup> {
    vec![
        RuleGroup {
            category: Category::Cluster,
            rules: cluster::rules(),
        },
        RuleGroup {
            category: Category::Security,
            rules: security::rules(),
        },
        RuleGroup {
            category: Category::Memory,
            rules: memory::rules(),
        },
        RuleGroup {
            category: Category::Configuration,
            rules: configuration::rules(),
        },
        RuleGroup {
            category: Category::Plugins,
            rules: plugins::rules(),
        },
        RuleGroup {
            category: Category::Schema,
            rules: schema::rules(),
        },
    ]
}

/// String form of a configuration value; arrays keep their last entry.
pub(crate) fn setting(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) => setting(items.last()),
        other => Some(other.to_string()),
    }
}

/// Boolean reading of a configuration value.
pub(crate) fn flag(value: Option<&Value>) -> Option<bool> {
    match setting(value)?.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Integer reading of a configuration value.
pub(crate) fn integer(value: Option<&Value>) -> Option<i64> {
    setting(value)?.parse().ok()
}

/// Duration setting such as `5s`, `500ms` or `2m`, in seconds.
///
/// Bare numbers are taken as seconds.
pub(crate) fn seconds(value: Option<&Value>) -> Option<f64> {
    let raw = setting(value)?.to_ascii_lowercase();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;
    let factor = match unit.trim() {
        "" | "s" => 1.0,
        "ms" => 0.001,
        "m" => 60.0,
        "h" => 3600.0,
        _ => return None,
    };
    Some(number * factor)
}
