//! Index and constraint rules.
//!
//! Schema is replicated, so these look at the writer only.

use serde_json::json;

use crate::advice::Advice;
use crate::engine::{AdvisorConfig, Rule};
use crate::error::AdviceError;
use crate::snapshot::DiagnosticSnapshot;

/// Schema rules in evaluation order.
pub fn rules() -> Vec<Rule> {
    vec![
        Rule::always("indexes-present", indexes_present),
        Rule::always("constraints-present", constraints_present),
    ]
}

/// A populated database without indexes warns.
pub fn indexes_present(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    let Some(writer) = snapshot.writer() else {
        return Ok(Vec::new());
    };
    let nodes = writer.node_count.unwrap_or(0);
    let indexes = writer.indexes.len();
    let advice = if indexes > 0 {
        Advice::pass(writer.addr(), format!("{} indexes defined", indexes))?
    } else if nodes > 0 {
        Advice::warn(
            writer.addr(),
            format!("The database holds {} nodes but has no indexes", nodes),
            "Create indexes on the properties your queries look nodes up by",
        )?
    } else {
        Advice::info(writer.addr(), "The database is empty and has no indexes")?
    };
    Ok(vec![advice
        .with_evidence(json!({ "indexes": indexes, "nodes.count": writer.node_count }))
        .with_database(Some(writer.basics.database.as_str()))])
}

/// Reports whether any constraints exist.
pub fn constraints_present(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    let Some(writer) = snapshot.writer() else {
        return Ok(Vec::new());
    };
    let count = writer.constraints.len();
    let advice = if count > 0 {
        Advice::pass(writer.addr(), format!("{} constraints defined", count))?
    } else {
        Advice::info(writer.addr(), "No constraints are defined")?
            .with_advice("Uniqueness constraints protect data integrity and add a backing index")
    };
    Ok(vec![advice.with_database(Some(writer.basics.database.as_str()))])
}
