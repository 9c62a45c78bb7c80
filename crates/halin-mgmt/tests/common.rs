//! Scripted clusters for integration tests.

#![allow(dead_code)]

use halin_mgmt::driver::DriverError;
use halin_mgmt::memory::record;
use halin_mgmt::{HalinConfig, HalinContext, MemoryConnector, MemoryDriver};
use serde_json::{json, Value};

pub const VERSION: &str = "3.5.3";

pub fn address(i: usize) -> String {
    format!("bolt://core{}:7687", i)
}

fn overview(tx_ids: &[i64]) -> Vec<halin_mgmt::driver::Record> {
    (0..tx_ids.len())
        .map(|i| {
            record(json!({
                "id": format!("core-{}", i),
                "addresses": [address(i), format!("http://core{}:7474", i)],
                "role": if i == 0 { "LEADER" } else { "FOLLOWER" },
                "database": "default",
            }))
        })
        .collect()
}

fn transactions_bean(tx_id: i64) -> Value {
    json!({
        "name": "org.neo4j:instance=kernel#0,name=Transactions",
        "attributes": {
            "LastCommittedTxId": { "value": tx_id },
            "NumberOfOpenTransactions": { "value": 1 },
            "PeakNumberOfConcurrentTransactions": { "value": 4 },
        }
    })
}

/// Answers every query a healthy enterprise core would.
pub fn script_core(driver: &MemoryDriver, tx_id: i64, overview_rows: Vec<halin_mgmt::driver::Record>) {
    driver
        .on("cluster.overview", overview_rows)
        .on(
            "dbms.components",
            vec![record(json!({ "versions": [VERSION], "edition": "enterprise" }))],
        )
        .on("apoc.version", vec![record(json!({ "value": "3.5.0.4" }))])
        .on("listRoles", vec![record(json!({ "role": "admin", "users": ["neo4j"] }))])
        .on(
            "listUsers",
            vec![record(json!({ "username": "neo4j", "roles": ["admin"], "password": "secret" }))],
        )
        .on(
            "listConfig()",
            vec![
                record(json!({ "name": "dbms.security.auth_enabled", "value": "true" })),
                record(json!({ "name": "bolt.tls_level", "value": "REQUIRED" })),
                record(json!({ "name": "dbms.memory.heap.max_size", "value": "8g" })),
                record(json!({ "name": "dbms.mode", "value": "CORE" })),
            ],
        )
        .on("dbms.security.auth_enabled'", vec![record(json!({ "value": "true" }))])
        .on("metrics.csv.enabled", vec![record(json!({ "value": "false" }))])
        .on("dbms.procedures", vec![record(json!({ "n": 1 }))])
        .on("db.indexes", Vec::new())
        .on("db.constraints", Vec::new())
        .on("db.labels", vec![record(json!({ "label": "Person" }))])
        .on("count(n)", vec![record(json!({ "value": 100 }))])
        .on("queryJmx", vec![record(transactions_bean(tx_id))])
        .on(
            "NumberOfOpenTransactions",
            vec![record(json!({ "open": 1, "peak": 4, "lastTxId": tx_id }))],
        );
}

/// A causal cluster whose first member leads.
pub struct TestCluster {
    pub connector: MemoryConnector,
    pub drivers: Vec<MemoryDriver>,
}

impl TestCluster {
    /// One core per entry, each reporting the given last committed transaction.
    pub fn new(tx_ids: &[i64]) -> Self {
        let connector = MemoryConnector::new();
        let drivers: Vec<MemoryDriver> = tx_ids
            .iter()
            .enumerate()
            .map(|(i, tx_id)| {
                let driver = MemoryDriver::new();
                script_core(&driver, *tx_id, overview(tx_ids));
                connector.register(&address(i), driver.clone());
                driver
            })
            .collect();
        Self { connector, drivers }
    }

    pub fn driver(&self, i: usize) -> &MemoryDriver {
        &self.drivers[i]
    }

    /// Makes every query on member `i` fail as if the server went away.
    pub fn break_member(&self, i: usize) {
        self.drivers[i].fail("", DriverError::Connection("connection refused".to_string()));
    }

    pub fn config(&self) -> HalinConfig {
        HalinConfig {
            seed_address: address(0),
            ..HalinConfig::default()
        }
    }

    pub async fn connect(&self) -> HalinContext {
        HalinContext::connect(self.config(), &self.connector)
            .await
            .expect("cluster should connect")
    }
}
