//! Password redaction for exported diagnostics.

use serde_json::Value;

use crate::snapshot::Record;

/// Replacement written over every redacted value.
pub const MASK: &str = "********";

const SENSITIVE_KEY: &str = "password";

/// Masks every field named `password`, at any depth.
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => redact_record(map),
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

/// Masks every field named `password` in `record` and below it.
pub fn redact_record(record: &mut Record) {
    for (key, inner) in record.iter_mut() {
        if key == SENSITIVE_KEY {
            *inner = Value::String(MASK.to_string());
        } else {
            redact(inner);
        }
    }
}
