//! A single database server and its performance history.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use halin_advisor::{Basics, ClusterRole, Dbms};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::driver::{Driver, DriverError, Params, Record};
use crate::ring::RingBuffer;

/// Default number of timings kept per member.
pub const DEFAULT_OBSERVATIONS: usize = 500;

/// One timed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Summary statistics over the observation ring, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub median: f64,
    /// Most frequent timing; the smallest one on ties.
    pub mode: u64,
    /// Population standard deviation.
    pub stdev: f64,
    pub min: u64,
    pub max: u64,
}

impl LatencyStats {
    /// Statistics over `samples`, or `None` when there are none.
    pub fn compute(samples: &[u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();
        let mean = sorted.iter().sum::<u64>() as f64 / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2] as f64
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
        };
        let variance = sorted
            .iter()
            .map(|v| {
                let d = *v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n as f64;

        let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
        for v in &sorted {
            *counts.entry(*v).or_default() += 1;
        }
        let mut mode = sorted[0];
        let mut best = 0;
        for (value, count) in counts {
            if count > best {
                best = count;
                mode = value;
            }
        }

        Some(Self {
            mean,
            median,
            mode,
            stdev: variance.sqrt(),
            min: sorted[0],
            max: sorted[n - 1],
        })
    }
}

/// Result of [`ClusterMember::performance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    /// `None` until at least one query has been timed.
    pub stats: Option<LatencyStats>,
    pub observations: Vec<Observation>,
    /// Failure counts keyed by error message.
    pub errors: BTreeMap<String, u64>,
}

/// Where a member sits in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberIdentity {
    pub id: String,
    /// Bolt address the driver connects to.
    pub address: String,
    pub addresses: Vec<String>,
    pub role: ClusterRole,
    pub database: String,
}

impl MemberIdentity {
    /// A standalone server at `address` serving `database`.
    pub fn standalone(address: impl Into<String>, database: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            id: address.clone(),
            addresses: vec![address.clone()],
            address,
            role: ClusterRole::Standalone,
            database: database.into(),
        }
    }

    pub fn with_role(mut self, role: ClusterRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// One server of the deployment.
///
/// Owns its connection pool. Every query goes through [`ClusterMember::run`]
/// so its latency lands in the observation ring and its failures in the
/// error counter.
#[derive(Debug)]
pub struct ClusterMember {
    identity: MemberIdentity,
    driver: Arc<dyn Driver>,
    observations: Mutex<RingBuffer<Observation>>,
    errors: Mutex<BTreeMap<String, u64>>,
    dbms: RwLock<Dbms>,
}

impl ClusterMember {
    pub fn new(identity: MemberIdentity, driver: Arc<dyn Driver>, capacity: usize) -> Self {
        Self {
            identity,
            driver,
            observations: Mutex::new(RingBuffer::new(capacity)),
            errors: Mutex::new(BTreeMap::new()),
            dbms: RwLock::new(Dbms::default()),
        }
    }

    pub fn identity(&self) -> &MemberIdentity {
        &self.identity
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn address(&self) -> &str {
        &self.identity.address
    }

    pub fn role(&self) -> &ClusterRole {
        &self.identity.role
    }

    pub fn database(&self) -> &str {
        &self.identity.database
    }

    pub fn is_writer(&self) -> bool {
        self.identity.role.is_writer()
    }

    /// Capabilities as last probed.
    pub fn dbms(&self) -> Dbms {
        self.dbms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_dbms(&self, dbms: Dbms) {
        *self.dbms.write().unwrap_or_else(PoisonError::into_inner) = dbms;
    }

    /// Identity block for diagnostics.
    pub fn basics(&self) -> Basics {
        let mut basics = Basics::new(self.identity.address.clone());
        basics.id = self.identity.id.clone();
        basics.addresses = self.identity.addresses.clone();
        basics.role = self.identity.role.clone();
        basics.database = self.identity.database.clone();
        basics.dbms = self.dbms();
        basics
    }

    /// Runs `query` in a fresh session.
    ///
    /// The session is released whatever the outcome. Success records an
    /// observation; failure bumps the error counter and is returned as is.
    pub async fn run(&self, query: &str, params: &Params) -> Result<Vec<Record>, DriverError> {
        let started = Instant::now();
        let mut session = match self.driver.session(&self.identity.database).await {
            Ok(session) => session,
            Err(e) => {
                self.record_error(&e);
                return Err(e);
            }
        };
        let result = session.run(query, params).await;
        session.close().await;

        match result {
            Ok(rows) => {
                self.observe(started.elapsed().as_millis() as u64);
                Ok(rows)
            }
            Err(e) => {
                self.record_error(&e);
                Err(e)
            }
        }
    }

    fn observe(&self, elapsed_ms: u64) {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Observation {
                timestamp: Utc::now(),
                elapsed_ms,
            });
    }

    fn record_error(&self, error: &DriverError) {
        debug!(member = %self.identity.address, error = %error, "query failed");
        *self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(error.to_string())
            .or_default() += 1;
    }

    /// Latency statistics and error counts.
    pub fn performance(&self) -> Performance {
        let observations: Vec<Observation> = self
            .observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        let timings: Vec<u64> = observations.iter().map(|o| o.elapsed_ms).collect();
        Performance {
            stats: LatencyStats::compute(&timings),
            observations,
            errors: self
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Closes the member's connection pool.
    pub async fn shutdown(&self) {
        self.driver.close().await;
    }
}
