//! Installed plugin rules.

use serde_json::{json, Value};

use crate::advice::Advice;
use crate::engine::{for_member_value, AdvisorConfig, Rule};
use crate::error::AdviceError;
use crate::snapshot::{DiagnosticSnapshot, NodeDiagnostic};

/// Plugin rules in evaluation order.
pub fn rules() -> Vec<Rule> {
    vec![
        Rule::always("apoc-installed", apoc_installed),
        Rule::always("algo-installed", algo_installed),
    ]
}

/// Reports the APOC version, or its absence.
pub fn apoc_installed(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    let extract = |node: &NodeDiagnostic| node.apoc_version.clone().map(Value::String);
    for_member_value(snapshot, extract, |addr, value, _| match value.and_then(Value::as_str) {
        Some(version) => Ok(Advice::pass(addr, format!("APOC {} is installed", version))?
            .with_evidence(json!({ "apoc.version": version }))),
        None => Ok(Advice::info(addr, "APOC is not installed")?
            .with_advice("Install APOC for richer diagnostics and utility procedures")),
    })
}

/// Reports the graph algorithms plugin version, or its absence.
pub fn algo_installed(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    let extract = |node: &NodeDiagnostic| node.algo_version.clone().map(Value::String);
    for_member_value(snapshot, extract, |addr, value, _| match value.and_then(Value::as_str) {
        Some(version) => Ok(Advice::info(addr, format!("Graph algorithms {} is installed", version))?
            .with_evidence(json!({ "algo.version": version }))),
        None => Advice::info(addr, "Graph algorithms plugin is not installed"),
    })
}
