//! Named counters and per-destination delivery statistics.
//!
//! Counters live in a [`StatsRegistry`] that is created by the embedding
//! application and handed to each destination explicitly. A destination
//! registers its counters once through [`DeliveryStats::new`] and passes the
//! resulting handle to every worker it starts.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use sinkline_core::ActionResult;

/// Signed counter that can be shared across threads.
#[derive(Debug, Default)]
pub struct StatsCounter {
    value: AtomicI64,
}

impl StatsCounter {
    /// Adds one.
    pub fn increase(&self) {
        self.add(1);
    }

    /// Subtracts one.
    pub fn decrease(&self) {
        self.sub(1);
    }

    /// Adds `amount`.
    pub fn add(&self, amount: i64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Subtracts `amount`.
    pub fn sub(&self, amount: i64) {
        self.value.fetch_sub(amount, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of named counters.
///
/// Registering a name that already exists returns the existing counter, so
/// several owners can share one counter by name.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    counters: DashMap<String, Arc<StatsCounter>>,
}

impl StatsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter registered under `name`, creating it if needed.
    pub fn register(&self, name: &str) -> Arc<StatsCounter> {
        Arc::clone(&self.counters.entry(name.to_string()).or_default())
    }

    /// Removes `name` from the registry. Outstanding handles stay usable.
    pub fn unregister(&self, name: &str) -> bool {
        self.counters.remove(name).is_some()
    }

    /// Looks up a registered counter.
    pub fn get(&self, name: &str) -> Option<Arc<StatsCounter>> {
        self.counters.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether no counters are registered.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Current values of every counter, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.counters.iter().map(|entry| (entry.key().clone(), entry.value().get())).collect()
    }
}

/// Counter handles for one destination.
#[derive(Debug, Clone)]
pub struct DeliveryStats {
    /// Attempts that produced an outcome.
    pub processed: Arc<StatsCounter>,
    /// `Success` outcomes.
    pub delivered: Arc<StatsCounter>,
    /// `Queued` outcomes.
    pub queued: Arc<StatsCounter>,
    /// `Drop` outcomes.
    pub dropped: Arc<StatsCounter>,
    /// `Retry` outcomes.
    pub retried: Arc<StatsCounter>,
    /// `Disconnect` outcomes.
    pub disconnected: Arc<StatsCounter>,
    /// `NotConnected` outcomes.
    pub not_connected: Arc<StatsCounter>,
    /// `Error` outcomes.
    pub errors: Arc<StatsCounter>,
    /// Failed connect attempts.
    pub connect_failures: Arc<StatsCounter>,
    /// Attempts currently running.
    pub in_flight: Arc<StatsCounter>,
    /// Workers currently running their loop.
    pub active_workers: Arc<StatsCounter>,
}

impl DeliveryStats {
    /// Registers the destination's counters as `<destination>.<counter>`.
    pub fn new(registry: &StatsRegistry, destination: &str) -> Self {
        let counter = |name: &str| registry.register(&format!("{destination}.{name}"));
        Self {
            processed: counter("processed"),
            delivered: counter("delivered"),
            queued: counter("queued"),
            dropped: counter("dropped"),
            retried: counter("retried"),
            disconnected: counter("disconnected"),
            not_connected: counter("not_connected"),
            errors: counter("errors"),
            connect_failures: counter("connect_failures"),
            in_flight: counter("in_flight"),
            active_workers: counter("active_workers"),
        }
    }

    /// Counts one attempt outcome.
    pub fn record(&self, result: ActionResult) {
        self.processed.increase();
        let counter = match result {
            ActionResult::Success => &self.delivered,
            ActionResult::Queued => &self.queued,
            ActionResult::Drop => &self.dropped,
            ActionResult::Retry => &self.retried,
            ActionResult::Disconnect => &self.disconnected,
            ActionResult::NotConnected => &self.not_connected,
            ActionResult::Error => &self.errors,
        };
        counter.increase();
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> EngineStats {
        let read = |counter: &StatsCounter| u64::try_from(counter.get()).unwrap_or(0);
        EngineStats {
            active_workers: read(&self.active_workers),
            in_flight: read(&self.in_flight),
            processed: read(&self.processed),
            delivered: read(&self.delivered),
            queued: read(&self.queued),
            dropped: read(&self.dropped),
            retried: read(&self.retried),
            disconnected: read(&self.disconnected),
            not_connected: read(&self.not_connected),
            errors: read(&self.errors),
            connect_failures: read(&self.connect_failures),
        }
    }
}

/// Statistics snapshot for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of running workers.
    pub active_workers: u64,
    /// Attempts currently running.
    pub in_flight: u64,
    /// Total attempts since startup.
    pub processed: u64,
    /// Successful deliveries.
    pub delivered: u64,
    /// Asynchronously accepted deliveries.
    pub queued: u64,
    /// Messages discarded by policy.
    pub dropped: u64,
    /// Transient failures requeued on the same connection.
    pub retried: u64,
    /// Policy-requested reconnects.
    pub disconnected: u64,
    /// Attempts that found the transport unusable.
    pub not_connected: u64,
    /// Unexpected attempt failures.
    pub errors: u64,
    /// Failed connect attempts.
    pub connect_failures: u64,
}

impl EngineStats {
    /// Attempts that ended with the message acknowledged.
    pub fn acknowledged(&self) -> u64 {
        self.delivered + self.queued
    }

    /// Attempts that sent the message back to the queue.
    pub fn requeued(&self) -> u64 {
        self.retried + self.disconnected + self.not_connected + self.errors
    }
}
