//! Cluster-wide administrative operations.
//!
//! User and role data is kept per member, so every change is fanned out to
//! every member. The result records each member's outcome; overall success
//! is the AND of them. Nothing is rolled back when only some members apply
//! a change.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::driver::{Params, Record};
use crate::events::{EventKind, EventLog};
use crate::member::ClusterMember;
use crate::settle::settle_all;

pub const CREATE_USER: &str =
    "CALL dbms.security.createUser($username, $password, $requireChange)";
pub const DELETE_USER: &str = "CALL dbms.security.deleteUser($username)";
pub const CREATE_ROLE: &str = "CALL dbms.security.createRole($role)";
pub const DELETE_ROLE: &str = "CALL dbms.security.deleteRole($role)";
pub const ROLES_FOR_USER: &str =
    "CALL dbms.security.listRolesForUser($username) YIELD value RETURN value AS role";
pub const ADD_ROLE_TO_USER: &str = "CALL dbms.security.addRoleToUser($role, $username)";
pub const REMOVE_ROLE_FROM_USER: &str = "CALL dbms.security.removeRoleFromUser($role, $username)";

/// One member's outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberOutcome {
    pub success: bool,
    /// Member id.
    pub node: String,
    pub addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl MemberOutcome {
    fn ok(member: &ClusterMember, results: Value) -> Self {
        Self {
            success: true,
            node: member.id().to_string(),
            addr: member.address().to_string(),
            results: Some(results),
            err: None,
        }
    }

    fn failed(member: &ClusterMember, err: impl ToString, results: Option<Value>) -> Self {
        Self {
            success: false,
            node: member.id().to_string(),
            addr: member.address().to_string(),
            results,
            err: Some(err.to_string()),
        }
    }
}

/// Outcome of one cluster-wide operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterOperationResult {
    pub success: bool,
    pub results: Vec<MemberOutcome>,
}

impl ClusterOperationResult {
    fn from_outcomes(results: Vec<MemberOutcome>) -> Self {
        Self {
            success: results.iter().all(|r| r.success),
            results,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &MemberOutcome> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Role changes needed to reach a target set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDelta {
    pub to_add: BTreeSet<String>,
    pub to_delete: BTreeSet<String>,
    pub to_preserve: BTreeSet<String>,
}

impl RoleDelta {
    pub fn between(current: &BTreeSet<String>, target: &BTreeSet<String>) -> Self {
        Self {
            to_add: target.difference(current).cloned().collect(),
            to_delete: current.difference(target).cloned().collect(),
            to_preserve: current.intersection(target).cloned().collect(),
        }
    }
}

fn params(pairs: &[(&str, Value)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn rows_value(rows: Vec<Record>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

/// Fans administrative queries out across every member.
#[derive(Clone)]
pub struct ClusterManager {
    members: Vec<Arc<ClusterMember>>,
    events: Arc<EventLog>,
}

impl ClusterManager {
    pub fn new(members: Vec<Arc<ClusterMember>>, events: Arc<EventLog>) -> Self {
        Self { members, events }
    }

    /// Runs `query` on every member concurrently. Never fails as a whole.
    pub async fn map_query_across_cluster(
        &self,
        query: &str,
        params: &Params,
    ) -> ClusterOperationResult {
        let outcomes = settle_all(self.members.iter().map(|m| m.run(query, params))).await;
        let results = self
            .members
            .iter()
            .zip(outcomes)
            .map(|(member, outcome)| match outcome {
                Ok(rows) => MemberOutcome::ok(member, rows_value(rows)),
                Err(e) => {
                    warn!(member = %member.address(), error = %e, "cluster operation failed on member");
                    MemberOutcome::failed(member, e, None)
                }
            })
            .collect();
        ClusterOperationResult::from_outcomes(results)
    }

    fn log_if_succeeded(
        &self,
        result: &ClusterOperationResult,
        kind: EventKind,
        message: String,
        payload: Value,
    ) {
        if result.success {
            info!(%message, "cluster operation succeeded");
            self.events.record(kind, message, payload);
        } else {
            warn!(%message, failures = result.failures().count(), "cluster operation incomplete");
        }
    }

    pub async fn add_user(
        &self,
        username: &str,
        password: &str,
        require_change: bool,
    ) -> ClusterOperationResult {
        let p = params(&[
            ("username", json!(username)),
            ("password", json!(password)),
            ("requireChange", json!(require_change)),
        ]);
        let result = self.map_query_across_cluster(CREATE_USER, &p).await;
        self.log_if_succeeded(
            &result,
            EventKind::UserCreated,
            format!("Created user {}", username),
            json!({ "username": username }),
        );
        result
    }

    pub async fn delete_user(&self, username: &str) -> ClusterOperationResult {
        let p = params(&[("username", json!(username))]);
        let result = self.map_query_across_cluster(DELETE_USER, &p).await;
        self.log_if_succeeded(
            &result,
            EventKind::UserDeleted,
            format!("Deleted user {}", username),
            json!({ "username": username }),
        );
        result
    }

    pub async fn add_role(&self, role: &str) -> ClusterOperationResult {
        let p = params(&[("role", json!(role))]);
        let result = self.map_query_across_cluster(CREATE_ROLE, &p).await;
        self.log_if_succeeded(
            &result,
            EventKind::RoleCreated,
            format!("Created role {}", role),
            json!({ "role": role }),
        );
        result
    }

    pub async fn delete_role(&self, role: &str) -> ClusterOperationResult {
        let p = params(&[("role", json!(role))]);
        let result = self.map_query_across_cluster(DELETE_ROLE, &p).await;
        self.log_if_succeeded(
            &result,
            EventKind::RoleDeleted,
            format!("Deleted role {}", role),
            json!({ "role": role }),
        );
        result
    }

    /// Makes `username` hold exactly `roles` on every member.
    ///
    /// Each member reads its own current roles, then applies only the
    /// difference. A member whose changes partly fail reports failure and
    /// keeps whatever did apply.
    pub async fn associate_user_to_roles(
        &self,
        username: &str,
        roles: &[String],
    ) -> ClusterOperationResult {
        let target: BTreeSet<String> = roles.iter().cloned().collect();
        let results = join_all(
            self.members
                .iter()
                .map(|m| associate_on_member(m, username, &target)),
        )
        .await;
        let result = ClusterOperationResult::from_outcomes(results);
        self.log_if_succeeded(
            &result,
            EventKind::RolesAssociated,
            format!("Set roles of {} to [{}]", username, roles.join(", ")),
            json!({ "username": username, "roles": roles }),
        );
        result
    }
}

async fn associate_on_member(
    member: &ClusterMember,
    username: &str,
    target: &BTreeSet<String>,
) -> MemberOutcome {
    let lookup = params(&[("username", json!(username))]);
    let current: BTreeSet<String> = match member.run(ROLES_FOR_USER, &lookup).await {
        Ok(rows) => rows
            .iter()
            .filter_map(|r| r.get("role").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        Err(e) => {
            warn!(member = %member.address(), user = username, error = %e, "could not read roles");
            return MemberOutcome::failed(member, e, None);
        }
    };

    let delta = RoleDelta::between(&current, target);
    let changes = delta
        .to_add
        .iter()
        .map(|role| (ADD_ROLE_TO_USER, role))
        .chain(delta.to_delete.iter().map(|role| (REMOVE_ROLE_FROM_USER, role)))
        .map(|(query, role)| {
            let p = params(&[("role", json!(role)), ("username", json!(username))]);
            async move { member.run(query, &p).await.map_err(|e| (role.clone(), e)) }
        });
    let applied = settle_all(changes).await;

    let failed: Vec<Value> = applied
        .into_iter()
        .filter_map(Result::err)
        .map(|(role, e)| json!({ "role": role, "error": e.to_string() }))
        .collect();
    let summary = json!({
        "toAdd": delta.to_add,
        "toDelete": delta.to_delete,
        "toPreserve": delta.to_preserve,
        "failed": failed,
    });
    if failed.is_empty() {
        MemberOutcome::ok(member, summary)
    } else {
        MemberOutcome::failed(
            member,
            format!("{} role change(s) failed", failed.len()),
            Some(summary),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;
    use crate::member::MemberIdentity;
    use crate::memory::{record, MemoryDriver};
    use halin_advisor::ClusterRole;

    fn cluster(n: usize) -> (Vec<MemoryDriver>, ClusterManager, Arc<EventLog>) {
        let drivers: Vec<MemoryDriver> = (0..n).map(|_| MemoryDriver::new()).collect();
        let members = drivers
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let role = if i == 0 {
                    ClusterRole::Leader
                } else {
                    ClusterRole::Follower
                };
                Arc::new(ClusterMember::new(
                    MemberIdentity::standalone(format!("bolt://core{}:7687", i), "neo4j")
                        .with_role(role)
                        .with_id(format!("id-{}", i)),
                    Arc::new(d.clone()),
                    10,
                ))
            })
            .collect();
        let events = Arc::new(EventLog::default());
        let manager = ClusterManager::new(members, Arc::clone(&events));
        (drivers, manager, events)
    }

    #[test]
    fn test_role_delta() {
        let current: BTreeSet<String> = ["reader", "publisher"].iter().map(|s| s.to_string()).collect();
        let target: BTreeSet<String> = ["publisher", "admin"].iter().map(|s| s.to_string()).collect();
        let delta = RoleDelta::between(&current, &target);
        assert_eq!(delta.to_add.iter().collect::<Vec<_>>(), vec!["admin"]);
        assert_eq!(delta.to_delete.iter().collect::<Vec<_>>(), vec!["reader"]);
        assert_eq!(delta.to_preserve.iter().collect::<Vec<_>>(), vec!["publisher"]);
    }

    #[tokio::test]
    async fn test_add_user_everywhere_logs_event() {
        let (drivers, manager, events) = cluster(3);
        for d in &drivers {
            d.on("createUser", Vec::new());
        }
        let result = manager.add_user("bob", "secret", false).await;
        assert!(result.success);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.results[1].node, "id-1");
        let logged = events.events();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].kind, EventKind::UserCreated);
        assert!(logged[0].payload.get("password").is_none());
    }

    #[tokio::test]
    async fn test_one_failing_member_fails_the_operation() {
        let (drivers, manager, events) = cluster(3);
        drivers[0].on("createRole", Vec::new());
        drivers[1].fail(
            "createRole",
            DriverError::from_status("Neo.ClientError.General.InvalidArguments", "exists"),
        );
        drivers[2].on("createRole", Vec::new());
        let result = manager.add_role("ops").await;
        assert!(!result.success);
        assert_eq!(result.failures().count(), 1);
        assert!(result.results[0].success);
        assert!(result.results[1].err.as_ref().unwrap().contains("exists"));
        assert!(result.results[2].success);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_associate_applies_only_the_difference() {
        let (drivers, manager, events) = cluster(2);
        for d in &drivers {
            d.on(
                "listRolesForUser",
                vec![record(json!({ "role": "reader" })), record(json!({ "role": "publisher" }))],
            )
            .on("addRoleToUser", Vec::new())
            .on("removeRoleFromUser", Vec::new());
        }
        let roles = vec!["publisher".to_string(), "admin".to_string()];
        let result = manager.associate_user_to_roles("bob", &roles).await;
        assert!(result.success);
        for d in &drivers {
            assert_eq!(d.call_count("addRoleToUser"), 1);
            assert_eq!(d.call_count("removeRoleFromUser"), 1);
            let adds: Vec<_> = d
                .calls()
                .into_iter()
                .filter(|(q, _)| q.contains("addRoleToUser"))
                .collect();
            assert_eq!(adds[0].1["role"], json!("admin"));
        }
        let summary = result.results[0].results.as_ref().unwrap();
        assert_eq!(summary["toPreserve"], json!(["publisher"]));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_associate_reports_partial_member_failure() {
        let (drivers, manager, _) = cluster(2);
        for d in &drivers {
            d.on("listRolesForUser", Vec::new())
                .on("addRoleToUser", Vec::new());
        }
        drivers[1].fail(
            "addRoleToUser",
            DriverError::from_status("Neo.ClientError.General.InvalidArguments", "no such role"),
        );
        let roles = vec!["admin".to_string()];
        let result = manager.associate_user_to_roles("bob", &roles).await;
        assert!(!result.success);
        assert!(result.results[0].success);
        let failed = &result.results[1];
        assert!(!failed.success);
        assert_eq!(failed.results.as_ref().unwrap()["failed"][0]["role"], json!("admin"));
    }

    #[tokio::test]
    async fn test_unreadable_roles_fail_that_member_only() {
        let (drivers, manager, _) = cluster(2);
        drivers[0].on("listRolesForUser", Vec::new());
        let result = manager.associate_user_to_roles("bob", &[]).await;
        assert!(!result.success);
        assert!(result.results[0].success);
        assert!(!result.results[1].success);
        assert_eq!(result.results[1].addr, "bolt://core1:7687");
    }
}
