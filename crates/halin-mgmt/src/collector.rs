//! Diagnostic collection.
//!
//! Every gather step runs concurrently and settles on its own: a missing
//! plugin or a permission failure empties one field and nothing else.
//! Members are gathered concurrently as well, so one unreachable member
//! leaves an almost-empty record for itself only.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use halin_advisor::{DiagnosticSnapshot, HalinMetadata, NodeDiagnostic};
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::driver::{DriverError, Params, Record};
use crate::member::ClusterMember;
use crate::settle::settle;

pub const LIST_USERS: &str = "CALL dbms.security.listUsers()";
pub const LIST_ROLES: &str = "CALL dbms.security.listRoles()";
pub const INDEXES: &str = "CALL db.indexes()";
pub const CONSTRAINTS: &str = "CALL db.constraints()";
pub const JMX: &str = "CALL dbms.queryJmx('*:*') YIELD name, attributes RETURN name, attributes";
pub const CONFIGURATION: &str = "CALL dbms.listConfig() YIELD name, value RETURN name, value";
pub const APOC_VERSION: &str = "RETURN apoc.version() AS value";
pub const NODE_COUNT: &str = "MATCH (n) RETURN count(n) AS value";
pub const LABELS: &str = "CALL db.labels() YIELD label RETURN label";
pub const ALGO_VERSION: &str = "RETURN algo.version() AS value";

#[derive(Debug, Error)]
pub enum GatherError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("unexpected result shape: {0}")]
    Shape(&'static str),
}

async fn rows(member: &ClusterMember, query: &str) -> Result<Vec<Record>, GatherError> {
    Ok(member.run(query, &Params::new()).await?)
}

async fn single_value(member: &ClusterMember, query: &str) -> Result<Value, GatherError> {
    let rows = rows(member, query).await?;
    rows.into_iter()
        .next()
        .and_then(|mut row| row.remove("value"))
        .ok_or(GatherError::Shape("expected one row with a value column"))
}

async fn version_string(member: &ClusterMember, query: &str) -> Result<Option<String>, GatherError> {
    match single_value(member, query).await? {
        Value::String(v) => Ok(Some(v)),
        _ => Err(GatherError::Shape("version is not a string")),
    }
}

async fn node_count(member: &ClusterMember) -> Result<Option<i64>, GatherError> {
    single_value(member, NODE_COUNT)
        .await?
        .as_i64()
        .map(Some)
        .ok_or(GatherError::Shape("node count is not an integer"))
}

async fn labels(member: &ClusterMember) -> Result<Vec<String>, GatherError> {
    Ok(rows(member, LABELS)
        .await?
        .iter()
        .filter_map(|r| r.get("label").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

async fn configuration(member: &ClusterMember) -> Result<BTreeMap<String, Value>, GatherError> {
    Ok(configuration_from_rows(rows(member, CONFIGURATION).await?))
}

/// Folds `name`/`value` rows into a map.
///
/// A key reported more than once becomes an array of every value, in
/// report order.
pub fn configuration_from_rows(rows: Vec<Record>) -> BTreeMap<String, Value> {
    let mut config: BTreeMap<String, Value> = BTreeMap::new();
    for mut row in rows {
        let Some(name) = row.get("name").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let value = row.remove("value").unwrap_or(Value::Null);
        match config.get_mut(&name) {
            None => {
                config.insert(name, value);
            }
            Some(Value::Array(existing)) => existing.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    config
}

/// Gathers one member's diagnostics. Never fails.
pub async fn node_diagnostics(member: &ClusterMember) -> NodeDiagnostic {
    let (users, roles, indexes, constraints, jmx, configuration, apoc_version, node_count, labels, algo_version) = tokio::join!(
        settle("users", rows(member, LIST_USERS), Vec::new()),
        settle("roles", rows(member, LIST_ROLES), Vec::new()),
        settle("indexes", rows(member, INDEXES), Vec::new()),
        settle("constraints", rows(member, CONSTRAINTS), Vec::new()),
        settle("jmx", rows(member, JMX), Vec::new()),
        settle("configuration", configuration(member), BTreeMap::new()),
        settle("apoc.version", version_string(member, APOC_VERSION), None),
        settle("nodes.count", node_count(member), None),
        settle("schema.labels", labels(member), Vec::new()),
        settle("algo.version", version_string(member, ALGO_VERSION), None),
    );

    let mut node = NodeDiagnostic::empty(member.basics());
    node.users = users;
    node.roles = roles;
    node.indexes = indexes;
    node.constraints = constraints;
    node.jmx = jmx;
    node.configuration = configuration;
    node.apoc_version = apoc_version;
    node.node_count = node_count;
    node.labels = labels;
    node.algo_version = algo_version;
    node
}

/// Assembles a redacted snapshot across `members`.
///
/// `host` replaces the no-host sentinel when a desktop environment is known.
pub async fn collect_snapshot(
    members: &[Arc<ClusterMember>],
    mut halin: HalinMetadata,
    host: Option<Value>,
) -> DiagnosticSnapshot {
    let nodes = join_all(members.iter().map(|m| node_diagnostics(m))).await;
    halin.members = members.len();

    let mut snapshot = DiagnosticSnapshot::new(Uuid::new_v4().to_string(), nodes);
    snapshot.halin = halin;
    if let Some(host) = host {
        snapshot.host = host;
    }
    snapshot.redact();
    info!(
        id = %snapshot.id,
        members = snapshot.nodes.len(),
        "diagnostic snapshot collected"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberIdentity;
    use crate::memory::{record, MemoryDriver};
    use halin_advisor::snapshot::NO_HOST;
    use serde_json::json;

    fn member(driver: &MemoryDriver, addr: &str) -> Arc<ClusterMember> {
        Arc::new(ClusterMember::new(
            MemberIdentity::standalone(addr, "neo4j"),
            Arc::new(driver.clone()),
            10,
        ))
    }

    fn full(driver: &MemoryDriver) {
        driver
            .on("listUsers", vec![record(json!({ "username": "neo4j", "password": "x" }))])
            .on("listRoles", vec![record(json!({ "role": "admin" }))])
            .on("db.indexes", vec![record(json!({ "description": "INDEX ON :A(b)" }))])
            .on("db.constraints", Vec::new())
            .on(
                "queryJmx",
                vec![record(json!({
                    "name": "org.neo4j:instance=kernel#0,name=Transactions",
                    "attributes": { "LastCommittedTxId": { "value": 42 } }
                }))],
            )
            .on(
                "listConfig",
                vec![
                    record(json!({ "name": "dbms.mode", "value": "CORE" })),
                    record(json!({ "name": "dbms.ssl.policy", "value": "a" })),
                    record(json!({ "name": "dbms.ssl.policy", "value": "b" })),
                    record(json!({ "name": "dbms.ssl.policy", "value": "c" })),
                ],
            )
            .on("apoc.version", vec![record(json!({ "value": "3.5.0.1" }))])
            .on("count(n)", vec![record(json!({ "value": 1200 }))])
            .on("db.labels", vec![record(json!({ "label": "Person" }))]);
    }

    #[test]
    fn test_duplicate_keys_become_arrays() {
        let config = configuration_from_rows(vec![
            record(json!({ "name": "a", "value": 1 })),
            record(json!({ "name": "a", "value": 2 })),
            record(json!({ "name": "b", "value": "x" })),
            record(json!({ "value": "nameless" })),
            record(json!({ "name": "a", "value": 3 })),
        ]);
        assert_eq!(config["a"], json!([1, 2, 3]));
        assert_eq!(config["b"], json!("x"));
        assert_eq!(config.len(), 2);
    }

    #[tokio::test]
    async fn test_gathers_every_field() {
        let driver = MemoryDriver::new();
        full(&driver);
        let node = node_diagnostics(&member(&driver, "bolt://a:7687")).await;
        assert_eq!(node.users.len(), 1);
        assert_eq!(node.roles.len(), 1);
        assert_eq!(node.indexes.len(), 1);
        assert_eq!(node.last_tx_id(), Some(42));
        assert_eq!(node.config("dbms.ssl.policy"), Some(&json!(["a", "b", "c"])));
        assert_eq!(node.apoc_version.as_deref(), Some("3.5.0.1"));
        assert_eq!(node.node_count, Some(1200));
        assert_eq!(node.labels, vec!["Person".to_string()]);
        assert_eq!(node.algo_version, None);
    }

    #[tokio::test]
    async fn test_failing_steps_leave_defaults_only_for_themselves() {
        let driver = MemoryDriver::new();
        full(&driver);
        driver
            .fail("listUsers", DriverError::PermissionDenied("no".to_string()))
            .fail("apoc.version", DriverError::from_status("Neo.ClientError.Statement.SyntaxError", "unknown function"));
        let node = node_diagnostics(&member(&driver, "bolt://a:7687")).await;
        assert!(node.users.is_empty());
        assert_eq!(node.apoc_version, None);
        assert_eq!(node.roles.len(), 1);
        assert_eq!(node.node_count, Some(1200));
    }

    #[tokio::test]
    async fn test_snapshot_is_redacted_and_stamped() {
        let healthy = MemoryDriver::new();
        full(&healthy);
        let unreachable = MemoryDriver::new();
        let members = vec![
            member(&healthy, "bolt://a:7687"),
            member(&unreachable, "bolt://b:7687"),
        ];
        let snapshot = collect_snapshot(&members, HalinMetadata::current(), None).await;
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.halin.members, 2);
        assert_eq!(snapshot.host, json!(NO_HOST));
        assert_eq!(snapshot.nodes[0].users[0]["password"], json!(halin_advisor::MASK));
        assert_eq!(snapshot.nodes[1].addr(), "bolt://b:7687");
        assert!(snapshot.nodes[1].configuration.is_empty());
        assert!(!snapshot.id.is_empty());
    }

    #[tokio::test]
    async fn test_host_metadata_replaces_sentinel() {
        let snapshot = collect_snapshot(
            &[],
            HalinMetadata::current(),
            Some(json!({ "desktop": "1.2.0", "password": "p" })),
        )
        .await;
        assert_eq!(snapshot.host["desktop"], json!("1.2.0"));
        assert_eq!(snapshot.host["password"], json!(halin_advisor::MASK));
    }
}
