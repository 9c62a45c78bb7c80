//! Process-wide handle on one deployment.
//!
//! Owns the members, the feed registry and the event log. Built once per
//! connection and passed by reference wherever they are needed.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use halin_advisor::{Advice, Advisor, AdvisorError, ClusterRole, DiagnosticSnapshot, HalinMetadata};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cluster_manager::ClusterManager;
use crate::collector::collect_snapshot;
use crate::config::{ConfigError, HalinConfig};
use crate::driver::{Connector, DriverError, Params, Record};
use crate::events::{EventKind, EventLog};
use crate::feed::DataFeed;
use crate::member::{ClusterMember, MemberIdentity};
use crate::probes::check_components;
use crate::query::{QueryDescriptor, QueryError};

pub const CLUSTER_OVERVIEW: &str =
    "CALL dbms.cluster.overview() YIELD id, addresses, role, database \
     RETURN id, addresses, role, database";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("cannot reach {address}: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: DriverError,
    },
    #[error("cluster discovery failed: {0}")]
    Discovery(#[source] DriverError),
    #[error("no cluster member could be reached")]
    NoMembers,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Member identities from `dbms.cluster.overview()` rows.
///
/// The bolt address is preferred; rows without any address are skipped.
pub fn parse_overview(rows: &[Record], default_database: &str) -> Vec<MemberIdentity> {
    rows.iter()
        .filter_map(|row| {
            let addresses: Vec<String> = row
                .get("addresses")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            let address = addresses
                .iter()
                .find(|a| a.starts_with("bolt"))
                .or_else(|| addresses.first())?
                .clone();
            let id = row
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(&address)
                .to_string();
            let role = ClusterRole::parse(row.get("role").and_then(Value::as_str).unwrap_or(""));
            let database = row
                .get("database")
                .and_then(Value::as_str)
                .filter(|d| !d.is_empty())
                .unwrap_or(default_database)
                .to_string();
            Some(MemberIdentity {
                id,
                address,
                addresses,
                role,
                database,
            })
        })
        .collect()
}

pub struct HalinContext {
    config: HalinConfig,
    members: Vec<Arc<ClusterMember>>,
    events: Arc<EventLog>,
    feeds: DashMap<String, DataFeed>,
    advisor: Advisor,
    host: Option<Value>,
}

impl HalinContext {
    /// Discovers the deployment from the seed address and probes every member.
    ///
    /// A seed that cannot run the cluster overview is treated as a single
    /// standalone server. A member that cannot be connected to is left out.
    pub async fn connect(config: HalinConfig, connector: &dyn Connector) -> Result<Self, ContextError> {
        config.validate()?;
        let seed_address = config.seed_address.clone();
        let seed_driver = connector
            .connect(&seed_address)
            .await
            .map_err(|source| ContextError::Unreachable {
                address: seed_address.clone(),
                source,
            })?;
        let seed = ClusterMember::new(
            MemberIdentity::standalone(seed_address.clone(), config.database.clone()),
            Arc::clone(&seed_driver),
            config.observation_capacity,
        );

        let discovered = match seed.run(CLUSTER_OVERVIEW, &Params::new()).await {
            Ok(rows) => parse_overview(&rows, &config.database),
            Err(e) if e.is_connection() => {
                seed_driver.close().await;
                return Err(ContextError::Discovery(e));
            }
            Err(e) => {
                info!(seed = %seed_address, error = %e, "cluster overview unavailable, assuming standalone");
                Vec::new()
            }
        };

        let members = if discovered.is_empty() {
            vec![Arc::new(seed)]
        } else {
            if !discovered.iter().any(|identity| identity.address == seed_address) {
                debug!(seed = %seed_address, "seed not advertised by the cluster, closing its pool");
                seed_driver.close().await;
            }
            let capacity = config.observation_capacity;
            let connected = join_all(discovered.into_iter().map(|identity| {
                let seed_driver = Arc::clone(&seed_driver);
                let seed_address = seed_address.as_str();
                async move {
                    let driver = if identity.address == seed_address {
                        Ok(seed_driver)
                    } else {
                        connector.connect(&identity.address).await
                    };
                    (identity, driver)
                }
            }))
            .await;
            let mut members = Vec::new();
            for (identity, driver) in connected {
                match driver {
                    Ok(driver) => members.push(Arc::new(ClusterMember::new(identity, driver, capacity))),
                    Err(e) => warn!(member = %identity.address, error = %e, "skipping unreachable member"),
                }
            }
            if members.is_empty() {
                return Err(ContextError::NoMembers);
            }
            members
        };

        let ctx = Self::from_members(config, members);
        ctx.refresh_components().await;
        ctx.events.record(
            EventKind::Connected,
            format!("Connected to {} member(s)", ctx.members.len()),
            json!({ "seed": seed_address, "members": ctx.members.len() }),
        );
        Ok(ctx)
    }

    /// A context over already-built members, with no discovery or probing.
    pub fn from_members(config: HalinConfig, members: Vec<Arc<ClusterMember>>) -> Self {
        Self {
            events: Arc::new(EventLog::new(config.event_log_capacity)),
            advisor: Advisor::new(config.advisor.clone()),
            config,
            members,
            feeds: DashMap::new(),
            host: None,
        }
    }

    /// Host environment metadata recorded in every snapshot.
    pub fn with_host(mut self, host: Value) -> Self {
        self.host = Some(host);
        self
    }

    pub fn config(&self) -> &HalinConfig {
        &self.config
    }

    pub fn members(&self) -> &[Arc<ClusterMember>] {
        &self.members
    }

    pub fn member(&self, address: &str) -> Option<&Arc<ClusterMember>> {
        self.members.iter().find(|m| m.address() == address)
    }

    /// The member accepting writes, or the first member when none claims to.
    pub fn writer(&self) -> Option<&Arc<ClusterMember>> {
        self.members
            .iter()
            .find(|m| m.is_writer())
            .or_else(|| self.members.first())
    }

    pub fn is_cluster(&self) -> bool {
        self.members.len() > 1 || self.members.iter().any(|m| m.role().is_clustered())
    }

    pub fn is_enterprise(&self) -> bool {
        self.members
            .first()
            .map(|m| m.dbms().is_enterprise())
            .unwrap_or(false)
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn cluster_manager(&self) -> ClusterManager {
        ClusterManager::new(self.members.clone(), Arc::clone(&self.events))
    }

    /// Re-runs every member's capability probes concurrently.
    pub async fn refresh_components(&self) {
        join_all(self.members.iter().map(|m| check_components(m))).await;
    }

    fn new_feed(&self, descriptor: QueryDescriptor, member: &Arc<ClusterMember>) -> DataFeed {
        let feed = DataFeed::new(descriptor, Arc::clone(member), self.config.feed_options());
        feed.start();
        feed
    }

    /// The running feed for `descriptor` on `member`, started on first use.
    ///
    /// A stopped feed under the same key is replaced. Must be called from
    /// within a Tokio runtime.
    pub fn get_data_feed(&self, descriptor: QueryDescriptor, member: &Arc<ClusterMember>) -> DataFeed {
        let key = DataFeed::key(&descriptor, member);
        let mut entry = self
            .feeds
            .entry(key)
            .or_insert_with(|| self.new_feed(descriptor.clone(), member));
        if !entry.is_live() {
            *entry = self.new_feed(descriptor, member);
        }
        entry.clone()
    }

    /// Starts every configured feed on every member.
    pub fn start_configured_feeds(&self) -> Result<Vec<DataFeed>, ContextError> {
        let descriptors = self.config.custom_feeds()?;
        let mut started = Vec::new();
        for descriptor in descriptors {
            for member in &self.members {
                started.push(self.get_data_feed(descriptor.clone(), member));
            }
        }
        Ok(started)
    }

    /// Registered feeds, sorted by key.
    pub fn feeds(&self) -> Vec<DataFeed> {
        let mut feeds: Vec<(String, DataFeed)> = self
            .feeds
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        feeds.sort_by(|a, b| a.0.cmp(&b.0));
        feeds.into_iter().map(|(_, f)| f).collect()
    }

    /// Stops and forgets the feed registered under `key`.
    pub fn stop_feed(&self, key: &str) -> bool {
        match self.feeds.remove(key) {
            Some((_, feed)) => {
                feed.stop();
                true
            }
            None => false,
        }
    }

    pub fn metadata(&self) -> HalinMetadata {
        let mut halin = HalinMetadata::current();
        halin.members = self.members.len();
        halin.data_feeds = self.feeds().iter().map(DataFeed::summary).collect();
        halin.events = self.events.to_values();
        halin
    }

    /// Collects a redacted diagnostic snapshot of every member.
    pub async fn run_diagnostics(&self) -> DiagnosticSnapshot {
        let snapshot = collect_snapshot(&self.members, self.metadata(), self.host.clone()).await;
        self.events.record(
            EventKind::DiagnosticsCollected,
            "Collected diagnostics",
            json!({ "id": snapshot.id, "members": snapshot.nodes.len() }),
        );
        snapshot
    }

    pub fn advise(&self, snapshot: &DiagnosticSnapshot) -> Result<Vec<Advice>, AdvisorError> {
        self.advisor.generate_recommendations(snapshot)
    }

    /// Stops every feed and closes every member's pool.
    pub async fn shutdown(&self) {
        let feeds: Vec<DataFeed> = self.feeds.iter().map(|e| e.value().clone()).collect();
        self.feeds.clear();
        join_all(feeds.iter().map(|f| f.shutdown())).await;
        join_all(self.members.iter().map(|m| m.shutdown())).await;
        info!(members = self.members.len(), "context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{record, MemoryConnector, MemoryDriver};
    use crate::query::standard;

    fn overview_row(id: &str, host: &str, role: &str) -> Record {
        record(json!({
            "id": id,
            "addresses": [format!("http://{}:7474", host), format!("bolt://{}:7687", host)],
            "role": role,
            "database": "default"
        }))
    }

    #[test]
    fn test_overview_prefers_bolt() {
        let rows = vec![
            overview_row("a", "core1", "LEADER"),
            record(json!({ "id": "x", "addresses": [], "role": "FOLLOWER" })),
        ];
        let identities = parse_overview(&rows, "neo4j");
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].address, "bolt://core1:7687");
        assert_eq!(identities[0].role, ClusterRole::Leader);
        assert_eq!(identities[0].database, "default");
    }

    #[tokio::test]
    async fn test_standalone_when_overview_is_missing() {
        let connector = MemoryConnector::new();
        connector.register("bolt://localhost:7687", MemoryDriver::new());
        let ctx = HalinContext::connect(HalinConfig::default(), &connector)
            .await
            .unwrap();
        assert_eq!(ctx.members().len(), 1);
        assert!(!ctx.is_cluster());
        assert_eq!(ctx.writer().unwrap().address(), "bolt://localhost:7687");
        assert_eq!(ctx.events().events()[0].kind, EventKind::Connected);
    }

    #[tokio::test]
    async fn test_unreachable_seed_is_an_error() {
        let connector = MemoryConnector::new();
        let err = HalinContext::connect(HalinConfig::default(), &connector)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ContextError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_discovers_members_and_skips_unreachable() {
        let connector = MemoryConnector::new();
        let seed = MemoryDriver::new();
        seed.on(
            "dbms.cluster.overview",
            vec![
                overview_row("a", "core1", "LEADER"),
                overview_row("b", "core2", "FOLLOWER"),
                overview_row("c", "core3", "FOLLOWER"),
            ],
        );
        connector
            .register("bolt://core1:7687", seed)
            .register("bolt://core2:7687", MemoryDriver::new());
        let config = HalinConfig {
            seed_address: "bolt://core1:7687".to_string(),
            ..HalinConfig::default()
        };
        let ctx = HalinContext::connect(config, &connector).await.unwrap();
        assert_eq!(ctx.members().len(), 2);
        assert!(ctx.is_cluster());
        assert_eq!(ctx.writer().unwrap().id(), "a");
        assert!(ctx.member("bolt://core2:7687").is_some());
    }

    #[tokio::test]
    async fn test_unadvertised_seed_pool_is_closed() {
        let connector = MemoryConnector::new();
        let seed = MemoryDriver::new();
        seed.on(
            "dbms.cluster.overview",
            vec![
                overview_row("a", "core1", "LEADER"),
                overview_row("b", "core2", "FOLLOWER"),
            ],
        );
        let core1 = MemoryDriver::new();
        connector
            .register("bolt://localhost:7687", seed.clone())
            .register("bolt://core1:7687", core1.clone())
            .register("bolt://core2:7687", MemoryDriver::new());
        let ctx = HalinContext::connect(HalinConfig::default(), &connector)
            .await
            .unwrap();
        assert_eq!(ctx.members().len(), 2);
        assert!(ctx.member("bolt://localhost:7687").is_none());
        assert!(seed.is_closed());
        assert!(!core1.is_closed());
    }

    #[tokio::test]
    async fn test_feed_registry_reuses_live_feeds() {
        let driver = MemoryDriver::new();
        let member = Arc::new(ClusterMember::new(
            MemberIdentity::standalone("bolt://localhost:7687", "neo4j"),
            Arc::new(driver),
            10,
        ));
        let ctx = HalinContext::from_members(HalinConfig::default(), vec![Arc::clone(&member)]);
        let first = ctx.get_data_feed(standard::heap().unwrap(), &member);
        let again = ctx.get_data_feed(standard::heap().unwrap(), &member);
        assert_eq!(ctx.feeds().len(), 1);
        first.stop();
        assert!(!again.is_live());
        let fresh = ctx.get_data_feed(standard::heap().unwrap(), &member);
        assert!(fresh.is_live());
        assert_eq!(ctx.metadata().data_feeds.len(), 1);

        let key = DataFeed::key(fresh.descriptor(), &member);
        assert!(ctx.stop_feed(&key));
        assert!(!fresh.is_live());
        assert!(ctx.feeds().is_empty());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_feeds_and_closes_pools() {
        let driver = MemoryDriver::new();
        let member = Arc::new(ClusterMember::new(
            MemberIdentity::standalone("bolt://localhost:7687", "neo4j"),
            Arc::new(driver.clone()),
            10,
        ));
        let ctx = HalinContext::from_members(HalinConfig::default(), vec![Arc::clone(&member)]);
        let feed = ctx.get_data_feed(standard::transactions().unwrap(), &member);
        ctx.shutdown().await;
        assert!(!feed.is_live());
        assert!(driver.is_closed());
        assert!(ctx.feeds().is_empty());
    }
}
