//! Data feeds: periodic polling of one descriptor against one member.
//!
//! A feed keeps a sliding window of samples bounded both by age and by
//! count. Subscribers are called synchronously after every recorded sample.
//! Once [`DataFeed::stop`] returns, the feed records nothing and notifies
//! nobody, even if a poll was in flight.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use chrono::{DateTime, Utc};
use halin_advisor::FeedSummary;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::{DriverError, Record};
use crate::member::ClusterMember;
use crate::query::QueryDescriptor;

/// Sliding window bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    /// Samples older than this are dropped.
    pub window: Duration,
    /// At most this many samples are kept.
    pub capacity: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            capacity: 1000,
        }
    }
}

/// One poll's shaped result.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub records: Vec<Record>,
    #[serde(skip)]
    taken: Instant,
}

/// What a subscriber sees after each recorded sample.
#[derive(Debug)]
pub struct FeedUpdate<'a> {
    pub feed: &'a str,
    pub member: &'a str,
    pub latest: &'a Sample,
    /// Every buffered sample, oldest first, including `latest`.
    pub window: &'a [Sample],
}

/// Derives extra fields from a shaped record.
pub type Augmentation = Arc<dyn Fn(&Record) -> Record + Send + Sync>;

type Subscriber = Arc<dyn Fn(&FeedUpdate<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Polling counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStats {
    pub polls: u64,
    pub failures: u64,
    /// Polls skipped because the member lacks the descriptor's dependency.
    pub skipped: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct FeedState {
    samples: VecDeque<Sample>,
    aliases: BTreeMap<String, String>,
    augmentations: Vec<Augmentation>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    stats: FeedStats,
}

impl FeedState {
    fn field_name<'a>(&'a self, accessor: &'a str) -> &'a str {
        self.aliases
            .get(accessor)
            .map(String::as_str)
            .unwrap_or(accessor)
    }

    fn shape(&self, row: &Record, descriptor: &QueryDescriptor) -> Record {
        let mut out = Record::new();
        for column in descriptor.columns() {
            if let Some(value) = row.get(&column.accessor) {
                out.insert(self.field_name(&column.accessor).to_string(), value.clone());
            }
        }
        for augment in &self.augmentations {
            for (key, value) in augment(&out) {
                out.insert(key, value);
            }
        }
        out
    }

    fn evict(&mut self, now: Instant, options: &FeedOptions) {
        while self.samples.len() > options.capacity {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.taken) > options.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

struct FeedInner {
    descriptor: QueryDescriptor,
    member: Arc<ClusterMember>,
    options: FeedOptions,
    state: Mutex<FeedState>,
    // Held while checking liveness and publishing; stop takes it too.
    gate: Mutex<()>,
    // Thread running subscribers under the gate, so stop can tell a
    // subscriber calling it from any other caller.
    dispatching: Mutex<Option<ThreadId>>,
    live: AtomicBool,
    started: AtomicBool,
    in_flight: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Minimum pause between two polls of the loop.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl FeedInner {
    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll(&self) -> Result<bool, DriverError> {
        if !self.live.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        let _in_flight = InFlight(&self.in_flight);

        if !self
            .descriptor
            .dependency()
            .satisfied_by(&self.member.dbms())
        {
            self.state().stats.skipped += 1;
            debug!(
                feed = self.descriptor.name(),
                dependency = ?self.descriptor.dependency(),
                "dependency not met, skipping poll"
            );
            return Ok(false);
        }

        let result = self
            .member
            .run(self.descriptor.query(), self.descriptor.parameters())
            .await;

        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.live.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                let mut state = self.state();
                state.stats.polls += 1;
                state.stats.failures += 1;
                state.stats.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let (window, subscribers) = {
            let mut state = self.state();
            let records = rows
                .iter()
                .map(|row| state.shape(row, &self.descriptor))
                .collect();
            let now = Instant::now();
            state.samples.push_back(Sample {
                timestamp: Utc::now(),
                records,
                taken: now,
            });
            state.evict(now, &self.options);
            state.stats.polls += 1;
            state.stats.last_error = None;
            let window: Vec<Sample> = state.samples.iter().cloned().collect();
            let subscribers: Vec<Subscriber> =
                state.subscribers.iter().map(|(_, s)| Arc::clone(s)).collect();
            (window, subscribers)
        };

        if let Some(latest) = window.last() {
            let update = FeedUpdate {
                feed: self.descriptor.name(),
                member: self.member.address(),
                latest,
                window: &window,
            };
            let _dispatch = Dispatch::enter(&self.dispatching);
            for subscriber in &subscribers {
                if !self.live.load(Ordering::SeqCst) {
                    break;
                }
                subscriber(&update);
            }
        }
        Ok(true)
    }

    fn dispatching_here(&self) -> bool {
        *self
            .dispatching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }
}

struct Dispatch<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> Dispatch<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
        Self(slot)
    }
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

async fn poll_loop(inner: Arc<FeedInner>) {
    let rate = inner.descriptor.rate().max(MIN_POLL_INTERVAL);
    while inner.live.load(Ordering::SeqCst) {
        if let Err(e) = inner.poll().await {
            warn!(
                feed = inner.descriptor.name(),
                member = %inner.member.address(),
                error = %e,
                "poll failed"
            );
        }
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(rate) => {}
        }
    }
    debug!(feed = inner.descriptor.name(), "poll loop exited");
}

/// A polled descriptor bound to one member.
///
/// Cloning yields another handle to the same feed.
#[derive(Clone)]
pub struct DataFeed {
    inner: Arc<FeedInner>,
}

impl fmt::Debug for DataFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFeed")
            .field("name", &self.name())
            .field("member", &self.inner.member.address())
            .field("live", &self.is_live())
            .finish()
    }
}

impl DataFeed {
    pub fn new(descriptor: QueryDescriptor, member: Arc<ClusterMember>, options: FeedOptions) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                descriptor,
                member,
                options,
                state: Mutex::new(FeedState::default()),
                gate: Mutex::new(()),
                dispatching: Mutex::new(None),
                live: AtomicBool::new(true),
                started: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Registry key: one feed per descriptor name and member id.
    pub fn key(descriptor: &QueryDescriptor, member: &ClusterMember) -> String {
        format!("{}@{}", descriptor.name(), member.id())
    }

    pub fn name(&self) -> &str {
        self.inner.descriptor.name()
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.inner.descriptor
    }

    pub fn member(&self) -> &Arc<ClusterMember> {
        &self.inner.member
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Renames a result field in every later sample.
    pub fn add_alias(&self, accessor: impl Into<String>, alias: impl Into<String>) {
        self.inner
            .state()
            .aliases
            .insert(accessor.into(), alias.into());
    }

    /// Appends an augmentation; augmentations run in insertion order.
    pub fn add_augmentation<F>(&self, augment: F)
    where
        F: Fn(&Record) -> Record + Send + Sync + 'static,
    {
        self.inner.state().augmentations.push(Arc::new(augment));
    }

    /// Registers a callback run after every recorded sample.
    ///
    /// Callbacks run on the polling task and may stop the feed; subscribers
    /// after the stopping one are not called.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&FeedUpdate<'_>) + Send + Sync + 'static,
    {
        let mut state = self.inner.state();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.state();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sid, _)| *sid != id);
        state.subscribers.len() != before
    }

    /// Spawns the polling task. Later calls, or calls after stop, do nothing.
    pub fn start(&self) {
        if !self.is_live() || self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(feed = self.name(), member = %self.inner.member.address(), "starting feed");
        let handle = tokio::spawn(poll_loop(Arc::clone(&self.inner)));
        *self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Polls once outside the loop.
    ///
    /// Returns whether a sample was recorded. Overlapping polls record
    /// nothing.
    pub async fn poll_once(&self) -> Result<bool, DriverError> {
        self.inner.poll().await
    }

    /// Stops polling for good. Idempotent.
    pub fn stop(&self) {
        // A subscriber stopping its own feed already runs under the gate.
        let _gate = if self.inner.dispatching_here() {
            None
        } else {
            Some(self.inner.gate.lock().unwrap_or_else(PoisonError::into_inner))
        };
        if self.inner.live.swap(false, Ordering::SeqCst) {
            debug!(feed = self.name(), member = %self.inner.member.address(), "feed stopped");
        }
        self.inner.cancel.cancel();
    }

    /// Stops and waits for the polling task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(feed = self.name(), error = %e, "poll task ended abnormally");
            }
        }
    }

    /// Buffered samples, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        self.inner.state().samples.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<Sample> {
        self.inner.state().samples.back().cloned()
    }

    pub fn stats(&self) -> FeedStats {
        self.inner.state().stats.clone()
    }

    fn fold_columns(&self, pick: fn(f64, f64) -> f64) -> Option<f64> {
        let state = self.inner.state();
        let fields: Vec<&str> = self
            .inner
            .descriptor
            .columns()
            .iter()
            .map(|c| state.field_name(&c.accessor))
            .collect();
        state
            .samples
            .iter()
            .flat_map(|s| s.records.iter())
            .flat_map(|record| fields.iter().filter_map(move |f| record.get(*f)))
            .filter_map(numeric)
            .reduce(pick)
    }

    /// Smallest numeric value of any declared column across the window.
    pub fn min(&self) -> Option<f64> {
        self.fold_columns(f64::min)
    }

    /// Largest numeric value of any declared column across the window.
    pub fn max(&self) -> Option<f64> {
        self.fold_columns(f64::max)
    }

    pub fn summary(&self) -> FeedSummary {
        FeedSummary {
            name: self.name().to_string(),
            member: self.inner.member.address().to_string(),
            samples: self.len(),
        }
    }
}
