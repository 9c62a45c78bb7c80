//! Diagnostic snapshot data model.
//!
//! Field names follow the exported diagnostic package format so that
//! downstream tooling can keep parsing packages produced by any version.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::redact::{redact, redact_record, MASK};

/// One result row, keyed by column name.
pub type Record = serde_json::Map<String, Value>;

/// JMX bean carrying the kernel's transaction counters.
const TRANSACTIONS_BEAN: &str = "name=Transactions";
const LAST_COMMITTED_TX: &str = "LastCommittedTxId";

/// Role a member plays in its deployment.
///
/// Serialized as the raw role string the server reports; a standalone
/// server reports no role at all and maps to [`ClusterRole::Standalone`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClusterRole {
    /// Core member accepting writes.
    Leader,
    /// Core member replicating from the leader.
    Follower,
    /// Non-voting replica.
    ReadReplica,
    /// Single server outside any cluster.
    #[default]
    Standalone,
    /// Any role string this model does not know about.
    Other(String),
}

impl ClusterRole {
    /// Parses a role string as reported by the cluster overview.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LEADER" => ClusterRole::Leader,
            "FOLLOWER" => ClusterRole::Follower,
            "READ_REPLICA" => ClusterRole::ReadReplica,
            "" => ClusterRole::Standalone,
            _ => ClusterRole::Other(raw.trim().to_string()),
        }
    }

    /// Role string as the server reports it.
    pub fn as_str(&self) -> &str {
        match self {
            ClusterRole::Leader => "LEADER",
            ClusterRole::Follower => "FOLLOWER",
            ClusterRole::ReadReplica => "READ_REPLICA",
            ClusterRole::Standalone => "",
            ClusterRole::Other(s) => s,
        }
    }

    /// Whether this member accepts writes.
    pub fn is_writer(&self) -> bool {
        matches!(self, ClusterRole::Leader | ClusterRole::Standalone)
    }

    /// Whether this member takes part in consensus.
    pub fn is_core(&self) -> bool {
        matches!(self, ClusterRole::Leader | ClusterRole::Follower)
    }

    /// Whether this member belongs to a cluster at all.
    pub fn is_clustered(&self) -> bool {
        !matches!(self, ClusterRole::Standalone)
    }
}

impl From<String> for ClusterRole {
    fn from(raw: String) -> Self {
        ClusterRole::parse(&raw)
    }
}

impl From<ClusterRole> for String {
    fn from(role: ClusterRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRole::Standalone => write!(f, "SINGLE"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Parsed `major.minor.patch` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DbmsVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Patch version.
    pub patch: u32,
}

impl DbmsVersion {
    /// Parses a version string such as `3.5.3` or `4.0.0-alpha09`.
    ///
    /// Missing or unparseable components become zero.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.trim().split('.').map(|p| {
            p.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse::<u32>()
                .unwrap_or(0)
        });
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

impl fmt::Display for DbmsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Capability and version bag populated by the member's probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dbms {
    /// `community`, `enterprise`, or `UNKNOWN` when the probe failed.
    pub edition: String,
    /// Every version string the server reported for its kernel component.
    #[serde(default)]
    pub versions: Vec<String>,
    /// First reported version, parsed.
    #[serde(default)]
    pub version: DbmsVersion,
    /// APOC procedures are installed.
    #[serde(default)]
    pub apoc: bool,
    /// Native user and role management is available.
    #[serde(default)]
    pub native_auth: bool,
    /// Authentication is switched on.
    #[serde(default)]
    pub auth_enabled: bool,
    /// CSV metrics are being written.
    #[serde(default)]
    pub csv_metrics_enabled: bool,
    /// Log streaming procedures are available.
    #[serde(default)]
    pub log_streaming: bool,
    /// Database statistics procedures are available.
    #[serde(default, rename = "hasDBStats")]
    pub has_db_stats: bool,
}

impl Default for Dbms {
    fn default() -> Self {
        Self {
            edition: "UNKNOWN".to_string(),
            versions: Vec::new(),
            version: DbmsVersion::default(),
            apoc: false,
            native_auth: false,
            auth_enabled: false,
            csv_metrics_enabled: false,
            log_streaming: false,
            has_db_stats: false,
        }
    }
}

impl Dbms {
    /// Whether the server runs the enterprise edition.
    pub fn is_enterprise(&self) -> bool {
        self.edition.eq_ignore_ascii_case("enterprise")
    }

    /// Whether the server runs the community edition.
    pub fn is_community(&self) -> bool {
        self.edition.eq_ignore_ascii_case("community")
    }

    /// First version string reported, if any.
    pub fn primary_version(&self) -> Option<&str> {
        self.versions.first().map(String::as_str)
    }
}

/// Identity block of one member's diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basics {
    /// Member id as reported by the cluster overview.
    #[serde(default)]
    pub id: String,
    /// Address used to reach this member.
    pub address: String,
    /// Every protocol address the member advertises.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Role within the deployment.
    #[serde(default)]
    pub role: ClusterRole,
    /// Database name the member serves.
    #[serde(default)]
    pub database: String,
    /// Capability bag.
    #[serde(default)]
    pub dbms: Dbms,
}

impl Basics {
    /// Basics for a member reachable at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            address: address.into(),
            addresses: Vec::new(),
            role: ClusterRole::Standalone,
            database: String::new(),
            dbms: Dbms::default(),
        }
    }
}

/// Everything gathered from one cluster member.
///
/// Each gathered field falls back to an empty value when its gather step
/// failed, so a missing plugin never invalidates the rest of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDiagnostic {
    /// Identity and capabilities.
    pub basics: Basics,
    /// Configuration by name; keys seen more than once hold an array.
    #[serde(default)]
    pub configuration: BTreeMap<String, Value>,
    /// Index listing.
    #[serde(default)]
    pub indexes: Vec<Record>,
    /// Constraint listing.
    #[serde(default)]
    pub constraints: Vec<Record>,
    /// Native users.
    #[serde(default)]
    pub users: Vec<Record>,
    /// Native roles.
    #[serde(default)]
    pub roles: Vec<Record>,
    /// Full JMX dump.
    #[serde(rename = "JMX", default)]
    pub jmx: Vec<Record>,
    /// APOC version, when installed.
    #[serde(rename = "apoc.version", default)]
    pub apoc_version: Option<String>,
    /// Total node count.
    #[serde(rename = "nodes.count", default)]
    pub node_count: Option<i64>,
    /// Labels in use.
    #[serde(rename = "schema.labels", default)]
    pub labels: Vec<String>,
    /// Graph algorithms plugin version, when installed.
    #[serde(rename = "algo.version", default)]
    pub algo_version: Option<String>,
}

impl NodeDiagnostic {
    /// Diagnostics with every gathered field at its empty default.
    pub fn empty(basics: Basics) -> Self {
        Self {
            basics,
            configuration: BTreeMap::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
            users: Vec::new(),
            roles: Vec::new(),
            jmx: Vec::new(),
            apoc_version: None,
            node_count: None,
            labels: Vec::new(),
            algo_version: None,
        }
    }

    /// Address of this member.
    pub fn addr(&self) -> &str {
        &self.basics.address
    }

    /// Configuration value for `key`.
    pub fn config(&self, key: &str) -> Option<&Value> {
        self.configuration.get(key)
    }

    /// Last committed transaction id, read from the JMX dump.
    ///
    /// The attribute may be a bare number or a `{value: n}` wrapper.
    pub fn last_tx_id(&self) -> Option<i64> {
        let bean = self.jmx.iter().find(|bean| {
            bean.get("name")
                .and_then(Value::as_str)
                .map(|name| name.contains(TRANSACTIONS_BEAN))
                .unwrap_or(false)
        })?;
        let attr = bean.get("attributes")?.get(LAST_COMMITTED_TX)?;
        let raw = match attr {
            Value::Object(inner) => inner.get("value")?,
            other => other,
        };
        match raw {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn redact(&mut self) {
        for (key, value) in self.configuration.iter_mut() {
            if key == "password" {
                *value = Value::String(MASK.to_string());
            } else {
                redact(value);
            }
        }
        for record in self
            .indexes
            .iter_mut()
            .chain(self.constraints.iter_mut())
            .chain(self.users.iter_mut())
            .chain(self.roles.iter_mut())
            .chain(self.jmx.iter_mut())
        {
            redact_record(record);
        }
    }
}

/// Summary of one live data feed at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSummary {
    /// Descriptor name.
    pub name: String,
    /// Address of the member it polls.
    pub member: String,
    /// Samples currently buffered.
    pub samples: usize,
}

/// Runtime metadata of the process that produced the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HalinMetadata {
    /// Crate version of the collector.
    pub version: String,
    /// Members known to the context.
    #[serde(default)]
    pub members: usize,
    /// Live feeds.
    #[serde(default)]
    pub data_feeds: Vec<FeedSummary>,
    /// Recent administrative events.
    #[serde(default)]
    pub events: Vec<Value>,
}

impl HalinMetadata {
    /// Metadata stamped with this crate's version.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            members: 0,
            data_feeds: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Sentinel recorded when no desktop host environment is available.
pub const NO_HOST: &str = "NOT_PRESENT";

fn no_host() -> Value {
    Value::String(NO_HOST.to_string())
}

/// Point-in-time dump of cluster and per-member state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSnapshot {
    /// Unique id of this snapshot.
    pub id: String,
    /// UTC time the snapshot was assembled.
    pub generated: DateTime<Utc>,
    /// Runtime metadata.
    pub halin: HalinMetadata,
    /// Per-member diagnostics.
    pub nodes: Vec<NodeDiagnostic>,
    /// Host environment metadata, or [`NO_HOST`].
    #[serde(rename = "neo4jDesktop", default = "no_host")]
    pub host: Value,
}

impl DiagnosticSnapshot {
    /// Snapshot over `nodes` with fresh metadata and no host block.
    pub fn new(id: impl Into<String>, nodes: Vec<NodeDiagnostic>) -> Self {
        let mut halin = HalinMetadata::current();
        halin.members = nodes.len();
        Self {
            id: id.into(),
            generated: Utc::now(),
            halin,
            nodes,
            host: no_host(),
        }
    }

    /// Whether the snapshot describes a multi-member cluster.
    pub fn is_cluster(&self) -> bool {
        self.nodes.len() > 1 || self.nodes.iter().any(|n| n.basics.role.is_clustered())
    }

    /// Whether the deployment runs the enterprise edition.
    pub fn is_enterprise(&self) -> bool {
        self.nodes
            .first()
            .map(|n| n.basics.dbms.is_enterprise())
            .unwrap_or(false)
    }

    /// The member accepting writes, or the first member when none claims to.
    pub fn writer(&self) -> Option<&NodeDiagnostic> {
        self.nodes
            .iter()
            .find(|n| n.basics.role.is_writer())
            .or_else(|| self.nodes.first())
    }

    /// Database name for deployment-wide findings.
    pub fn database(&self) -> Option<&str> {
        self.nodes
            .first()
            .map(|n| n.basics.database.as_str())
            .filter(|db| !db.is_empty())
    }

    /// Masks every field named `password` anywhere in the snapshot.
    pub fn redact(&mut self) {
        for node in self.nodes.iter_mut() {
            node.redact();
        }
        for event in self.halin.events.iter_mut() {
            redact(event);
        }
        redact(&mut self.host);
    }
}
