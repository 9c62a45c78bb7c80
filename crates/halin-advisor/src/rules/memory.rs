//! Heap and page cache sizing rules.

use serde_json::json;

use crate::advice::Advice;
use crate::engine::{for_config_option, for_member_value, AdvisorConfig, Rule};
use crate::error::AdviceError;
use crate::rules::setting;
use crate::snapshot::{DiagnosticSnapshot, NodeDiagnostic};

/// Initial heap size.
pub const HEAP_INITIAL: &str = "dbms.memory.heap.initial_size";
/// Maximum heap size.
pub const HEAP_MAX: &str = "dbms.memory.heap.max_size";
/// Page cache size.
pub const PAGECACHE: &str = "dbms.memory.pagecache.size";

/// Memory rules in evaluation order.
pub fn rules() -> Vec<Rule> {
    vec![
        Rule::always("heap-sizing", heap_sizing),
        Rule::always("pagecache-size", pagecache_size),
    ]
}

/// Initial and maximum heap should be set and equal.
pub fn heap_sizing(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    let extract = |node: &NodeDiagnostic| {
        Some(json!({
            "initial": setting(node.config(HEAP_INITIAL)),
            "max": setting(node.config(HEAP_MAX)),
        }))
    };
    for_member_value(snapshot, extract, |addr, value, _| {
        let initial = value.and_then(|v| v["initial"].as_str());
        let max = value.and_then(|v| v["max"].as_str());
        let advice = match (initial, max) {
            (Some(initial), Some(max)) if initial.eq_ignore_ascii_case(max) => {
                Advice::pass(addr, format!("Heap initial and max size are both {}", max))?
            }
            (Some(initial), Some(max)) => Advice::warn(
                addr,
                format!("Heap initial size {} differs from max size {}", initial, max),
                format!(
                    "Set {} and {} to the same value to avoid full GC pauses while the heap grows",
                    HEAP_INITIAL, HEAP_MAX
                ),
            )?,
            _ => Advice::warn(
                addr,
                "Heap size is left to JVM defaults",
                format!("Set {} and {} explicitly", HEAP_INITIAL, HEAP_MAX),
            )?,
        };
        Ok(match value {
            Some(v) => advice.with_evidence(v.clone()),
            None => advice,
        })
    })
}

/// Page cache should be sized explicitly.
pub fn pagecache_size(
    snapshot: &DiagnosticSnapshot,
    _: &AdvisorConfig,
) -> Result<Vec<Advice>, AdviceError> {
    for_config_option(snapshot, PAGECACHE, |addr, value, _| {
        let advice = match setting(value) {
            Some(size) => Advice::pass(addr, format!("Page cache size is {}", size))?,
            None => Advice::warn(
                addr,
                "Page cache size is not configured",
                format!("Set {} to cover the store files on disk", PAGECACHE),
            )?,
        };
        Ok(advice.with_evidence(json!({ "setting": PAGECACHE, "value": value })))
    })
}
