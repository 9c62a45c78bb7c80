#![warn(missing_docs)]

//! Halin advisory subsystem: diagnostic snapshot model, rule engine, configuration diff.
//!
//! Nothing in this crate performs I/O. Every rule operates on an already
//! collected [`DiagnosticSnapshot`], so the whole battery can be exercised
//! against hand-built snapshots.

pub mod advice;
pub mod config_diff;
pub mod engine;
pub mod error;
pub mod redact;
pub mod rules;
pub mod snapshot;

pub use advice::{Advice, AdviceBuilder, AdviceSummary, Category, Level, OVERALL};
pub use config_diff::{configuration_diff, ConfigurationDiff, DiffRow, NOT_SET};
pub use engine::{
    cluster_only, enterprise_only, for_config_option, for_member_value,
    generate_recommendations, Advisor, AdvisorConfig, Rule, RuleGroup,
};
pub use error::{AdviceError, AdvisorError};
pub use redact::{redact, MASK};
pub use snapshot::{
    Basics, ClusterRole, Dbms, DbmsVersion, DiagnosticSnapshot, FeedSummary, HalinMetadata,
    NodeDiagnostic, Record,
};
