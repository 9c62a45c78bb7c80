//! Findings produced by the rule engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AdviceError;

/// Pseudo-address for findings that hold for every member.
pub const OVERALL: &str = "overall";

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Check passed.
    Pass,
    /// Informational only.
    Info,
    /// Something should be looked at.
    Warn,
    /// Something is wrong.
    Error,
}

impl Level {
    fn requires_advice(self) -> bool {
        matches!(self, Level::Warn | Level::Error)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Pass => "pass",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Rule group a finding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Topology, writers, versions, replication.
    Cluster,
    /// Authentication, transport and browser hardening.
    Security,
    /// Heap and page cache sizing.
    Memory,
    /// General server settings.
    Configuration,
    /// Installed plugins.
    Plugins,
    /// Indexes and constraints.
    Schema,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One categorized, leveled observation about a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    /// Severity.
    pub level: Level,
    /// Member address or [`OVERALL`].
    pub addr: String,
    /// Database the finding concerns.
    #[serde(default)]
    pub database: Option<String>,
    /// What was observed.
    pub finding: String,
    /// Supporting data.
    #[serde(default)]
    pub evidence: Option<Value>,
    /// Remediation text.
    #[serde(default)]
    pub advice: Option<String>,
    /// Group that produced the finding; set by the engine.
    #[serde(default)]
    pub category: Option<Category>,
}

impl Advice {
    /// Starts a builder.
    pub fn builder() -> AdviceBuilder {
        AdviceBuilder::default()
    }

    /// A passing finding.
    pub fn pass(addr: impl Into<String>, finding: impl Into<String>) -> Result<Self, AdviceError> {
        Self::builder()
            .level(Level::Pass)
            .addr(addr)
            .finding(finding)
            .build()
    }

    /// An informational finding.
    pub fn info(addr: impl Into<String>, finding: impl Into<String>) -> Result<Self, AdviceError> {
        Self::builder()
            .level(Level::Info)
            .addr(addr)
            .finding(finding)
            .build()
    }

    /// A warning with remediation text.
    pub fn warn(
        addr: impl Into<String>,
        finding: impl Into<String>,
        advice: impl Into<String>,
    ) -> Result<Self, AdviceError> {
        Self::builder()
            .level(Level::Warn)
            .addr(addr)
            .finding(finding)
            .advice(advice)
            .build()
    }

    /// An error with remediation text.
    pub fn error(
        addr: impl Into<String>,
        finding: impl Into<String>,
        advice: impl Into<String>,
    ) -> Result<Self, AdviceError> {
        Self::builder()
            .level(Level::Error)
            .addr(addr)
            .finding(finding)
            .advice(advice)
            .build()
    }

    /// Attaches supporting data.
    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// Attaches remediation text to a pass or info finding.
    pub fn with_advice(mut self, advice: impl Into<String>) -> Self {
        self.advice = Some(advice.into());
        self
    }

    /// Names the database the finding concerns.
    pub fn with_database(mut self, database: Option<&str>) -> Self {
        self.database = database.filter(|d| !d.is_empty()).map(str::to_string);
        self
    }

    /// Tags the finding with the group that produced it.
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Whether the finding needs operator attention.
    pub fn is_problem(&self) -> bool {
        matches!(self.level, Level::Warn | Level::Error)
    }
}

/// Validating builder for [`Advice`].
#[derive(Debug, Default)]
pub struct AdviceBuilder {
    level: Option<Level>,
    addr: Option<String>,
    database: Option<String>,
    finding: Option<String>,
    evidence: Option<Value>,
    advice: Option<String>,
}

impl AdviceBuilder {
    /// Sets the severity.
    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Sets the member address.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Sets the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the finding text.
    pub fn finding(mut self, finding: impl Into<String>) -> Self {
        self.finding = Some(finding.into());
        self
    }

    /// Sets supporting data.
    pub fn evidence(mut self, evidence: Value) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// Sets remediation text.
    pub fn advice(mut self, advice: impl Into<String>) -> Self {
        self.advice = Some(advice.into());
        self
    }

    /// Validates and builds the finding.
    pub fn build(self) -> Result<Advice, AdviceError> {
        let level = self.level.ok_or(AdviceError::MissingField("level"))?;
        let addr = non_empty(self.addr).ok_or(AdviceError::MissingField("addr"))?;
        let finding = non_empty(self.finding).ok_or(AdviceError::MissingField("finding"))?;
        let advice = non_empty(self.advice);
        if level.requires_advice() && advice.is_none() {
            return Err(AdviceError::MissingAdvice { level });
        }
        Ok(Advice {
            level,
            addr,
            database: non_empty(self.database),
            finding,
            evidence: self.evidence,
            advice,
            category: None,
        })
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

/// Finding counts per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdviceSummary {
    /// Passing findings.
    pub pass: usize,
    /// Informational findings.
    pub info: usize,
    /// Warnings.
    pub warn: usize,
    /// Errors.
    pub error: usize,
}

impl AdviceSummary {
    /// Total findings counted.
    pub fn total(&self) -> usize {
        self.pass + self.info + self.warn + self.error
    }

    /// Whether any error-level finding was counted.
    pub fn has_errors(&self) -> bool {
        self.error > 0
    }
}

impl From<&[Advice]> for AdviceSummary {
    fn from(findings: &[Advice]) -> Self {
        findings.iter().fold(Self::default(), |mut acc, a| {
            match a.level {
                Level::Pass => acc.pass += 1,
                Level::Info => acc.info += 1,
                Level::Warn => acc.warn += 1,
                Level::Error => acc.error += 1,
            }
            acc
        })
    }
}
