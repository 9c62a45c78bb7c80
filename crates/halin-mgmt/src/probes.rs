//! Capability probes.
//!
//! Each probe answers one question about a member and never fails: a
//! failed probe yields its documented default. [`check_components`] runs
//! them all concurrently and stores the merged result on the member.

use halin_advisor::{Dbms, DbmsVersion};
use serde_json::Value;
use tracing::info;

use crate::driver::{DriverError, Params, Record};
use crate::member::ClusterMember;
use crate::settle::settle;

pub const COMPONENTS: &str = "CALL dbms.components() YIELD name, versions, edition \
     WHERE name = 'Neo4j Kernel' RETURN versions, edition";
pub const APOC_VERSION: &str = "RETURN apoc.version() AS value";
pub const NATIVE_ROLES: &str = "CALL dbms.security.listRoles() YIELD role RETURN count(role) AS n";
pub const AUTH_ENABLED: &str = "CALL dbms.listConfig('dbms.security.auth_enabled') \
     YIELD name, value RETURN value";
pub const CSV_METRICS: &str = "CALL dbms.listConfig('metrics.csv.enabled') \
     YIELD name, value RETURN value";
const PROCEDURE_PRESENT: &str =
    "CALL dbms.procedures() YIELD name WHERE name = $name RETURN count(name) AS n";

/// Procedure backing log streaming.
pub const LOG_STREAM_PROC: &str = "apoc.log.stream";
/// Procedure backing database statistics.
pub const DB_STATS_PROC: &str = "db.stats.retrieve";

fn first_value<'a>(rows: &'a [Record], column: &str) -> Option<&'a Value> {
    rows.first().and_then(|row| row.get(column))
}

fn truthy(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s.trim().eq_ignore_ascii_case("true")),
        _ => None,
    }
}

/// Edition and kernel versions. Defaults to `UNKNOWN` with no versions.
pub async fn components(member: &ClusterMember) -> (String, Vec<String>) {
    let fetch = async {
        let rows = member.run(COMPONENTS, &Params::new()).await?;
        let edition = first_value(&rows, "edition")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let versions = first_value(&rows, "versions")
            .and_then(Value::as_array)
            .map(|vs| {
                vs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok::<_, DriverError>((edition, versions))
    };
    settle("components", fetch, ("UNKNOWN".to_string(), Vec::new())).await
}

/// APOC answers `apoc.version()`. Defaults to `false`.
pub async fn apoc(member: &ClusterMember) -> bool {
    let fetch = async {
        member.run(APOC_VERSION, &Params::new()).await?;
        Ok::<_, DriverError>(true)
    };
    settle("apoc", fetch, false).await
}

/// Native user and role management is reachable.
///
/// Permission denied still proves the procedures exist, so it counts as
/// present. Any other failure means absent.
pub async fn native_auth(member: &ClusterMember) -> bool {
    let fetch = async {
        match member.run(NATIVE_ROLES, &Params::new()).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_permission_denied() => Ok(true),
            Err(e) => Err(e),
        }
    };
    settle("native-auth", fetch, false).await
}

/// Authentication is switched on. An unset key means the server default,
/// which is on; a permission failure also implies it is on.
pub async fn auth_enabled(member: &ClusterMember) -> bool {
    let fetch = async {
        match member.run(AUTH_ENABLED, &Params::new()).await {
            Ok(rows) => Ok(truthy(first_value(&rows, "value")).unwrap_or(true)),
            Err(e) if e.is_permission_denied() => Ok(true),
            Err(e) => Err(e),
        }
    };
    settle("auth-enabled", fetch, false).await
}

/// CSV metrics are being written. Defaults to `false`.
pub async fn csv_metrics(member: &ClusterMember) -> bool {
    let fetch = async {
        let rows = member.run(CSV_METRICS, &Params::new()).await?;
        Ok::<_, DriverError>(truthy(first_value(&rows, "value")).unwrap_or(false))
    };
    settle("csv-metrics", fetch, false).await
}

/// A named procedure is registered. Defaults to `false`.
pub async fn procedure_present(member: &ClusterMember, name: &str) -> bool {
    let mut params = Params::new();
    params.insert("name".to_string(), Value::String(name.to_string()));
    let fetch = async {
        let rows = member.run(PROCEDURE_PRESENT, &params).await?;
        let n = first_value(&rows, "n").and_then(Value::as_i64).unwrap_or(0);
        Ok::<_, DriverError>(n > 0)
    };
    settle(name, fetch, false).await
}

/// Runs every probe concurrently and stores the capabilities on `member`.
///
/// Community edition always has native auth, whatever the probe said,
/// because the probe relies on an enterprise-only procedure.
pub async fn check_components(member: &ClusterMember) -> Dbms {
    let (
        (edition, versions),
        apoc,
        native_auth,
        auth_enabled,
        csv_metrics_enabled,
        log_streaming,
        has_db_stats,
    ) = tokio::join!(
        components(member),
        apoc(member),
        native_auth(member),
        auth_enabled(member),
        csv_metrics(member),
        procedure_present(member, LOG_STREAM_PROC),
        procedure_present(member, DB_STATS_PROC),
    );

    let version = versions
        .first()
        .map(|v| DbmsVersion::parse(v))
        .unwrap_or_default();
    let mut dbms = Dbms {
        edition,
        versions,
        version,
        apoc,
        native_auth,
        auth_enabled,
        csv_metrics_enabled,
        log_streaming,
        has_db_stats,
    };
    if dbms.is_community() {
        dbms.native_auth = true;
    }

    info!(
        member = %member.address(),
        edition = %dbms.edition,
        version = %dbms.version,
        apoc = dbms.apoc,
        "components checked"
    );
    member.set_dbms(dbms.clone());
    dbms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberIdentity;
    use crate::memory::{record, MemoryDriver};
    use serde_json::json;
    use std::sync::Arc;

    fn member(driver: &MemoryDriver) -> ClusterMember {
        ClusterMember::new(
            MemberIdentity::standalone("bolt://localhost:7687", "neo4j"),
            Arc::new(driver.clone()),
            10,
        )
    }

    fn enterprise(driver: &MemoryDriver) {
        driver.on(
            "dbms.components",
            vec![record(json!({ "versions": ["3.5.3"], "edition": "enterprise" }))],
        );
    }

    #[tokio::test]
    async fn test_every_probe_failing_yields_defaults() {
        let driver = MemoryDriver::new();
        let m = member(&driver);
        let dbms = check_components(&m).await;
        assert_eq!(dbms, Dbms::default());
        assert_eq!(m.dbms(), Dbms::default());
    }

    #[tokio::test]
    async fn test_enterprise_with_plugins() {
        let driver = MemoryDriver::new();
        enterprise(&driver);
        driver
            .on("apoc.version", vec![record(json!({ "value": "3.5.0.1" }))])
            .on("listRoles", vec![record(json!({ "n": 4 }))])
            .on("auth_enabled", vec![record(json!({ "value": "true" }))])
            .on("metrics.csv.enabled", vec![record(json!({ "value": "false" }))])
            .handle("dbms.procedures", |params| {
                let n = if params["name"] == json!(LOG_STREAM_PROC) { 1 } else { 0 };
                Ok(vec![record(json!({ "n": n }))])
            });
        let dbms = check_components(&member(&driver)).await;
        assert!(dbms.is_enterprise());
        assert_eq!(dbms.version, DbmsVersion::parse("3.5.3"));
        assert!(dbms.apoc);
        assert!(dbms.native_auth);
        assert!(dbms.auth_enabled);
        assert!(!dbms.csv_metrics_enabled);
        assert!(dbms.log_streaming);
        assert!(!dbms.has_db_stats);
    }

    #[tokio::test]
    async fn test_permission_denied_counts_as_native_auth() {
        let driver = MemoryDriver::new();
        enterprise(&driver);
        driver.fail(
            "listRoles",
            DriverError::PermissionDenied("not an admin".to_string()),
        );
        assert!(check_components(&member(&driver)).await.native_auth);
    }

    #[tokio::test]
    async fn test_community_forces_native_auth() {
        let driver = MemoryDriver::new();
        driver.on(
            "dbms.components",
            vec![record(json!({ "versions": ["3.5.1"], "edition": "community" }))],
        );
        let dbms = check_components(&member(&driver)).await;
        assert!(dbms.is_community());
        assert!(dbms.native_auth);
    }

    #[tokio::test]
    async fn test_unset_auth_key_defaults_on() {
        let driver = MemoryDriver::new();
        driver.on("auth_enabled", Vec::new());
        assert!(auth_enabled(&member(&driver)).await);
    }

    #[tokio::test]
    async fn test_auth_probes_settle_to_defaults() {
        let driver = MemoryDriver::new();
        driver
            .fail("listRoles", DriverError::Connection("refused".to_string()))
            .fail(
                "auth_enabled",
                DriverError::PermissionDenied("not an admin".to_string()),
            );
        let m = member(&driver);
        assert!(!native_auth(&m).await);
        assert!(auth_enabled(&m).await);

        driver.fail("auth_enabled", DriverError::Connection("refused".to_string()));
        assert!(!auth_enabled(&m).await);
        assert_eq!(m.performance().errors.values().sum::<u64>(), 3);
    }
}
