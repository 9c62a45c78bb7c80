//! Scripted in-process driver.
//!
//! Answers queries from registered fragments instead of a server. Used by
//! the test suites and for offline demos of the live subsystem.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::driver::{Connector, Driver, DriverError, Params, Record, Session};

type Handler = Arc<dyn Fn(&Params) -> Result<Vec<Record>, DriverError> + Send + Sync>;

#[derive(Default)]
struct Inner {
    handlers: Mutex<Vec<(String, Handler)>>,
    calls: Mutex<Vec<(String, Params)>>,
    latency: Mutex<Option<Duration>>,
    open_sessions: AtomicUsize,
    closed: AtomicBool,
}

/// Driver whose answers are registered up front.
///
/// A query is answered by the most recently registered fragment it
/// contains. Unmatched queries fail as an unknown procedure.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    inner: Arc<Inner>,
}

impl fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("open_sessions", &self.open_sessions())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers queries containing `fragment` with a computed result.
    pub fn handle<F>(&self, fragment: &str, handler: F) -> &Self
    where
        F: Fn(&Params) -> Result<Vec<Record>, DriverError> + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((fragment.to_string(), Arc::new(handler)));
        self
    }

    /// Answers queries containing `fragment` with fixed rows.
    pub fn on(&self, fragment: &str, rows: Vec<Record>) -> &Self {
        self.handle(fragment, move |_| Ok(rows.clone()))
    }

    /// Fails queries containing `fragment`.
    pub fn fail(&self, fragment: &str, error: DriverError) -> &Self {
        self.handle(fragment, move |_| Err(error.clone()))
    }

    /// Delays every query by `latency`.
    pub fn with_latency(&self, latency: Duration) -> &Self {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(latency);
        self
    }

    /// Every query run so far, in order.
    pub fn calls(&self) -> Vec<(String, Params)> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of queries run containing `fragment`.
    pub fn call_count(&self, fragment: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(query, _)| query.contains(fragment))
            .count()
    }

    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn answer(&self, query: &str, params: &Params) -> Result<Vec<Record>, DriverError> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((query.to_string(), params.clone()));
        let handler = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(fragment, _)| query.contains(fragment.as_str()))
            .map(|(_, handler)| Arc::clone(handler));
        match handler {
            Some(handler) => handler(params),
            None => Err(DriverError::from_status(
                "Neo.ClientError.Procedure.ProcedureNotFound",
                format!("no scripted answer for: {}", query),
            )),
        }
    }
}

struct MemorySession {
    driver: MemoryDriver,
    open: bool,
}

#[async_trait]
impl Session for MemorySession {
    async fn run(&mut self, query: &str, params: &Params) -> Result<Vec<Record>, DriverError> {
        let latency = *self
            .driver
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.driver.answer(query, params)
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.driver.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn session(&self, _database: &str) -> Result<Box<dyn Session>, DriverError> {
        if self.is_closed() {
            return Err(DriverError::Connection("driver closed".to_string()));
        }
        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            driver: self.clone(),
            open: true,
        }))
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out pre-registered [`MemoryDriver`]s by address.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    drivers: Arc<DashMap<String, MemoryDriver>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the driver returned for `address`.
    pub fn register(&self, address: &str, driver: MemoryDriver) -> &Self {
        self.drivers.insert(address.to_string(), driver);
        self
    }

    pub fn driver(&self, address: &str) -> Option<MemoryDriver> {
        self.drivers.get(address).map(|d| d.value().clone())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Driver>, DriverError> {
        match self.driver(address) {
            Some(driver) => Ok(Arc::new(driver)),
            None => Err(DriverError::Connection(format!("unreachable: {}", address))),
        }
    }
}

/// Builds a record from a JSON object literal.
///
/// Non-object values produce an empty record.
pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_latest_registration_wins() {
        let driver = MemoryDriver::new();
        driver
            .on("RETURN 1", vec![record(json!({ "v": 1 }))])
            .on("RETURN 1", vec![record(json!({ "v": 2 }))]);
        let mut session = driver.session("neo4j").await.unwrap();
        let rows = session.run("RETURN 1 AS v", &Params::new()).await.unwrap();
        assert_eq!(rows[0]["v"], json!(2));
        session.close().await;
        assert_eq!(driver.open_sessions(), 0);
        assert_eq!(driver.call_count("RETURN 1"), 1);
    }

    #[tokio::test]
    async fn test_unmatched_query_is_unknown_procedure() {
        let driver = MemoryDriver::new();
        let mut session = driver.session("neo4j").await.unwrap();
        let err = session.run("CALL nope()", &Params::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::Query { .. }));
    }

    #[tokio::test]
    async fn test_closed_driver_refuses_sessions() {
        let driver = MemoryDriver::new();
        driver.close().await;
        assert!(driver.session("neo4j").await.is_err());
    }

    #[tokio::test]
    async fn test_connector_rejects_unknown_address() {
        let connector = MemoryConnector::new();
        connector.register("bolt://a:7687", MemoryDriver::new());
        assert!(connector.connect("bolt://a:7687").await.is_ok());
        let err = connector.connect("bolt://b:7687").await.unwrap_err();
        assert!(err.is_connection());
    }
}
