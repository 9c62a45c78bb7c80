//! General server setting rules.

use serde_json::json;

use crate::advice::Advice;
use crate::engine::{for_config_option, AdvisorConfig, Rule};
use crate::error::AdviceError;
use crate::rules::{flag, setting};
use crate::snapshot::DiagnosticSnapshot;

/// Query log switch.
pub const QUERY_LOG: &str = "dbms.logs.query.enabled";
/// Cypher planner override.
pub const CYPHER_PLANNER: &str = "cypher.planner";

/// Configuration rules in evaluation order.
pub fn rules() -> Vec<Rule> {
    vec![
        Rule::always("query-logging", query_logging),
        Rule::always("cypher-planner", cypher_planner),
    ]
}

/// Reports whether queries are logged.
pub fn query_logging(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, QUERY_LOG, |addr, value, _| {
        let advice = if flag(value).unwrap_or(false) {
            Advice::pass(addr, "Query logging is enabled")?
        } else {
            Advice::info(addr, "Query logging is disabled")?
                .with_advice(format!("Set {}=true to keep a record of slow queries", QUERY_LOG))
        };
        Ok(advice.with_evidence(json!({ "setting": QUERY_LOG, "value": value })))
    })
}

/// The Cypher planner should be left at its default.
pub fn cypher_planner(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, CYPHER_PLANNER, |addr, value, _| {
        let planner = setting(value).unwrap_or_else(|| "DEFAULT".to_string());
        let advice = match planner.to_ascii_uppercase().as_str() {
            "DEFAULT" | "COST" => Advice::pass(addr, format!("Cypher planner is {}", planner))?,
            _ => Advice::warn(
                addr,
                format!("Cypher planner is overridden to {}", planner),
                format!("Remove the {} override unless a specific query needs it", CYPHER_PLANNER),
            )?,
        };
        Ok(advice.with_evidence(json!({ "setting": CYPHER_PLANNER, "value": value })))
    })
}
