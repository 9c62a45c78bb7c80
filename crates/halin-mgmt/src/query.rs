//! Query descriptors: the declarative shape of a polled query.

use std::time::Duration;

use halin_advisor::Dbms;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::Params;

/// Comment prefixed to every polled query so the server's query log can
/// tell monitoring traffic apart.
pub const ORIGINATOR_TAG: &str = "/* halin */";

/// Polling rate when a descriptor names none.
pub const DEFAULT_RATE_MS: i64 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("descriptor has no name")]
    MissingName,
    #[error("descriptor {0} has an empty query")]
    EmptyQuery(String),
    #[error("descriptor {0} declares no columns")]
    NoColumns(String),
    #[error("column {header} of {name} has no accessor")]
    MissingAccessor { name: String, header: String },
    #[error("descriptor {name} has negative rate {rate_ms}ms")]
    NegativeRate { name: String, rate_ms: i64 },
}

/// A displayed column and the result field it reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub header: String,
    pub accessor: String,
}

/// Capability a query needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dependency {
    #[default]
    None,
    Apoc,
    Enterprise,
    NativeAuth,
    CsvMetrics,
    LogStreaming,
    DbStats,
}

impl Dependency {
    pub fn satisfied_by(self, dbms: &Dbms) -> bool {
        match self {
            Dependency::None => true,
            Dependency::Apoc => dbms.apoc,
            Dependency::Enterprise => dbms.is_enterprise(),
            Dependency::NativeAuth => dbms.native_auth,
            Dependency::CsvMetrics => dbms.csv_metrics_enabled,
            Dependency::LogStreaming => dbms.log_streaming,
            Dependency::DbStats => dbms.has_db_stats,
        }
    }
}

/// A validated, immutable query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    name: String,
    query: String,
    columns: Vec<Column>,
    parameters: Params,
    dependency: Dependency,
    rate: Duration,
}

impl QueryDescriptor {
    pub fn builder(name: impl Into<String>, query: impl Into<String>) -> QueryDefinition {
        QueryDefinition::new(name, query)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tagged, whitespace-normalized query text.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub fn rate(&self) -> Duration {
        self.rate
    }

    /// Whether a result field is one of the declared columns.
    pub fn declares(&self, accessor: &str) -> bool {
        self.columns.iter().any(|c| c.accessor == accessor)
    }
}

/// Column as written in configuration; the accessor may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub header: String,
    #[serde(default)]
    pub accessor: Option<String>,
}

/// Unvalidated descriptor, as built in code or read from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub parameters: Params,
    #[serde(default)]
    pub dependency: Dependency,
    #[serde(default)]
    pub rate_ms: Option<i64>,
}

impl QueryDefinition {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            columns: Vec::new(),
            parameters: Params::new(),
            dependency: Dependency::None,
            rate_ms: None,
        }
    }

    pub fn column(mut self, header: impl Into<String>, accessor: impl Into<String>) -> Self {
        self.columns.push(ColumnDefinition {
            header: header.into(),
            accessor: Some(accessor.into()),
        });
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependency = dependency;
        self
    }

    pub fn rate_ms(mut self, rate_ms: i64) -> Self {
        self.rate_ms = Some(rate_ms);
        self
    }

    /// Validates and freezes the descriptor.
    pub fn build(self) -> Result<QueryDescriptor, QueryError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(QueryError::MissingName);
        }
        let body = normalize(&self.query);
        if body.is_empty() || body == ORIGINATOR_TAG {
            return Err(QueryError::EmptyQuery(name));
        }
        if self.columns.is_empty() {
            return Err(QueryError::NoColumns(name));
        }
        let mut columns = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            match column.accessor.filter(|a| !a.trim().is_empty()) {
                Some(accessor) => columns.push(Column {
                    header: column.header,
                    accessor,
                }),
                None => {
                    return Err(QueryError::MissingAccessor {
                        name,
                        header: column.header,
                    })
                }
            }
        }
        let rate_ms = self.rate_ms.unwrap_or(DEFAULT_RATE_MS);
        if rate_ms < 0 {
            return Err(QueryError::NegativeRate { name, rate_ms });
        }

        Ok(QueryDescriptor {
            name,
            query: body,
            columns,
            parameters: self.parameters,
            dependency: self.dependency,
            rate: Duration::from_millis(rate_ms as u64),
        })
    }
}

/// Collapses whitespace runs and prefixes [`ORIGINATOR_TAG`] once.
pub fn normalize(query: &str) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || collapsed.starts_with(ORIGINATOR_TAG) {
        collapsed
    } else {
        format!("{} {}", ORIGINATOR_TAG, collapsed)
    }
}

/// Descriptors for the standard dashboards.
pub mod standard {
    use super::*;

    pub fn transactions() -> Result<QueryDescriptor, QueryError> {
        QueryDescriptor::builder(
            "Transactions",
            "CALL dbms.queryJmx('org.neo4j:instance=kernel#0,name=Transactions')
             YIELD attributes
             RETURN attributes.NumberOfOpenTransactions.value AS open,
                    attributes.PeakNumberOfConcurrentTransactions.value AS peak,
                    attributes.LastCommittedTxId.value AS lastTxId",
        )
        .column("Open", "open")
        .column("Peak", "peak")
        .column("Last Committed", "lastTxId")
        .rate_ms(DEFAULT_RATE_MS)
        .build()
    }

    pub fn heap() -> Result<QueryDescriptor, QueryError> {
        QueryDescriptor::builder(
            "JVM Heap",
            "CALL dbms.queryJmx('java.lang:type=Memory')
             YIELD attributes
             RETURN attributes.HeapMemoryUsage.value.properties.used AS used,
                    attributes.HeapMemoryUsage.value.properties.committed AS committed,
                    attributes.HeapMemoryUsage.value.properties.max AS max",
        )
        .column("Used", "used")
        .column("Committed", "committed")
        .column("Max", "max")
        .build()
    }

    pub fn page_cache() -> Result<QueryDescriptor, QueryError> {
        QueryDescriptor::builder(
            "Page Cache",
            "CALL dbms.queryJmx('org.neo4j:instance=kernel#0,name=Page cache')
             YIELD attributes
             RETURN attributes.Hits.value AS hits,
                    attributes.Faults.value AS faults,
                    attributes.EvictionExceptions.value AS evictionExceptions",
        )
        .column("Hits", "hits")
        .column("Faults", "faults")
        .column("Eviction Exceptions", "evictionExceptions")
        .build()
    }

    pub fn active_queries() -> Result<QueryDescriptor, QueryError> {
        QueryDescriptor::builder(
            "Active Queries",
            "CALL dbms.listQueries() YIELD queryId RETURN count(queryId) AS active",
        )
        .column("Active", "active")
        .dependency(Dependency::Enterprise)
        .build()
    }

    pub fn store_size() -> Result<QueryDescriptor, QueryError> {
        QueryDescriptor::builder(
            "Store Size",
            "CALL apoc.monitor.store()
             YIELD totalStoreSize, logSize, nodeStoreSize, relStoreSize
             RETURN totalStoreSize AS total, logSize AS logs,
                    nodeStoreSize AS nodes, relStoreSize AS relationships",
        )
        .column("Total", "total")
        .column("Logs", "logs")
        .column("Nodes", "nodes")
        .column("Relationships", "relationships")
        .dependency(Dependency::Apoc)
        .rate_ms(60_000)
        .build()
    }

    /// Every standard descriptor.
    pub fn all() -> Result<Vec<QueryDescriptor>, QueryError> {
        Ok(vec![
            transactions()?,
            heap()?,
            page_cache()?,
            active_queries()?,
            store_size()?,
        ])
    }
}
