//! Error types for the advisory subsystem.

use thiserror::Error;

use crate::advice::Level;

/// Contract violations raised while building an [`Advice`](crate::Advice).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdviceError {
    /// A required field was absent or empty.
    #[error("advice is missing required field `{0}`")]
    MissingField(&'static str),

    /// Warn and error findings must tell the operator what to do.
    #[error("{level} advice requires remediation text")]
    MissingAdvice {
        /// Level of the finding that lacked remediation text.
        level: Level,
    },
}

/// Errors returned by the rule engine.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// The input handed to the advisor was not a JSON object.
    #[error("diagnostic snapshot must be an object")]
    NotAnObject,

    /// The input lacked the runtime metadata block every snapshot carries.
    #[error("diagnostic snapshot is missing the `halin` key")]
    MissingHalin,

    /// The input was an object but did not match the snapshot shape.
    #[error("malformed diagnostic snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A rule produced an invalid finding.
    #[error("rule `{rule}` produced invalid advice: {source}")]
    Rule {
        /// Name of the offending rule.
        rule: &'static str,
        /// Underlying construction error.
        #[source]
        source: AdviceError,
    },
}
