//! Cross-member configuration diff.
//!
//! Values are compared by their string form, so `"true"` and `true` are the
//! same setting. A key missing from at least one member is reported as
//! unique to every member that has it; partial overlaps are not broken down
//! further.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::snapshot::DiagnosticSnapshot;

/// Placeholder for a key a member never reported.
pub const NOT_SET: &str = "(not set)";

/// One configuration key across every member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffRow {
    /// Configuration key.
    pub key: String,
    /// Every member reported the same string value.
    pub unanimous: bool,
    /// Member label to stringified value, or [`NOT_SET`].
    pub values: BTreeMap<String, String>,
}

/// Result of [`configuration_diff`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationDiff {
    /// One row per key in the union, sorted by key.
    pub table: Vec<DiffRow>,
    /// Keys present on every member.
    pub intersect_all: BTreeSet<String>,
    /// Keys present on any member.
    pub union_all: BTreeSet<String>,
    /// Per member, keys it has outside the intersection.
    pub unique: BTreeMap<String, BTreeSet<String>>,
    /// The input, by member label.
    pub values: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ConfigurationDiff {
    /// Rows whose values differ between members.
    pub fn disagreements(&self) -> impl Iterator<Item = &DiffRow> {
        self.table.iter().filter(|row| !row.unanimous)
    }

    /// Diff of every member's configuration in `snapshot`, labelled by address.
    pub fn from_snapshot(snapshot: &DiagnosticSnapshot) -> Self {
        let labeled = snapshot
            .nodes
            .iter()
            .map(|node| (node.addr().to_string(), node.configuration.clone()))
            .collect();
        configuration_diff(labeled)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Diffs the configuration maps of several members.
pub fn configuration_diff(labeled: BTreeMap<String, BTreeMap<String, Value>>) -> ConfigurationDiff {
    let union_all: BTreeSet<String> = labeled
        .values()
        .flat_map(|config| config.keys().cloned())
        .collect();

    let intersect_all: BTreeSet<String> = union_all
        .iter()
        .filter(|key| labeled.values().all(|config| config.contains_key(*key)))
        .cloned()
        .collect();

    let unique = labeled
        .iter()
        .map(|(label, config)| {
            let outside: BTreeSet<String> = config
                .keys()
                .filter(|key| !intersect_all.contains(*key))
                .cloned()
                .collect();
            (label.clone(), outside)
        })
        .collect();

    let table = union_all
        .iter()
        .map(|key| {
            let values: BTreeMap<String, String> = labeled
                .iter()
                .map(|(label, config)| {
                    let value = config
                        .get(key)
                        .map(stringify)
                        .unwrap_or_else(|| NOT_SET.to_string());
                    (label.clone(), value)
                })
                .collect();
            let mut distinct = values.values();
            let first = distinct.next();
            let unanimous = distinct.all(|v| Some(v) == first);
            DiffRow {
                key: key.clone(),
                unanimous,
                values,
            }
        })
        .collect();

    ConfigurationDiff {
        table,
        intersect_all,
        union_all,
        unique,
        values: labeled,
    }
}
