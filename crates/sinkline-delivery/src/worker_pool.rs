//! Worker pool lifecycle: start, submission, idle detection and shutdown.
//!
//! The pool owns one OS thread per worker. All workers of a pool read from
//! one shared queue and share the destination's dispatch table read-only.

use std::{
    any::Any,
    fmt::Debug,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use sinkline_core::{DispatchTable, Message};
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    queue::{MessageQueue, QueueError},
    stats::{DeliveryStats, EngineStats},
    transport::Transport,
    worker::{DestinationWorker, WorkerConfig},
    DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_WORKER_COUNT,
};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Pool sizing and shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Behaviour shared by every worker.
    pub worker: WorkerConfig,
    /// Time allowed for workers to finish when stopping.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            worker: WorkerConfig::default(),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }
}

/// Fixed set of destination workers fed by one shared queue.
///
/// Stop the pool with [`stop`](WorkerPool::stop). A pool dropped while still
/// running closes its queue so the workers exit, but nobody joins them.
pub struct WorkerPool {
    queue: Arc<dyn MessageQueue>,
    stats: Arc<DeliveryStats>,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    shutdown_timeout: Duration,
    stopped: bool,
}

impl WorkerPool {
    /// Builds one transport per worker and starts the worker threads.
    ///
    /// Every transport is constructed before any thread starts, so a failing
    /// factory leaves nothing running.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for a zero worker count, the factory's
    /// error (wrapped as `TransportInit` unless it is already a configuration
    /// error), or `WorkerSpawn` if a thread cannot be started. In the last
    /// case the queue is closed and workers already started are joined.
    pub fn start<T, C, F>(
        config: PoolConfig,
        queue: Arc<dyn MessageQueue>,
        table: Arc<DispatchTable<C>>,
        stats: Arc<DeliveryStats>,
        mut factory: F,
    ) -> Result<Self>
    where
        T: Transport + 'static,
        C: Debug + Send + Sync + 'static,
        F: FnMut(usize) -> Result<T>,
    {
        if config.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }

        let transports = (0..config.worker_count)
            .map(|worker_id| {
                factory(worker_id).map_err(|e| match e {
                    DeliveryError::ConfigurationError { .. }
                    | DeliveryError::TransportInit { .. } => e,
                    other => DeliveryError::transport_init(worker_id, other.to_string()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            worker_count = config.worker_count,
            destination = %config.worker.destination,
            "spawning destination workers"
        );

        let mut pool = Self {
            queue: Arc::clone(&queue),
            stats: Arc::clone(&stats),
            worker_handles: Vec::with_capacity(config.worker_count),
            shutdown_timeout: config.shutdown_timeout,
            stopped: false,
        };

        for (worker_id, transport) in transports.into_iter().enumerate() {
            let worker = DestinationWorker::new(
                worker_id,
                config.worker.clone(),
                transport,
                Arc::clone(&queue),
                Arc::clone(&table),
                Arc::clone(&stats),
            );

            let spawned = thread::Builder::new()
                .name(format!("sinkline-worker-{worker_id}"))
                .spawn(move || {
                    let result = worker.run();
                    if let Err(ref error) = result {
                        error!(worker_id, error = %error, "destination worker terminated with error");
                    }
                    result
                });

            match spawned {
                Ok(handle) => pool.worker_handles.push(handle),
                Err(e) => {
                    error!(worker_id, error = %e, "failed to spawn destination worker");
                    pool.abort();
                    return Err(DeliveryError::WorkerSpawn { worker_id, message: e.to_string() });
                },
            }
        }

        info!(spawned_workers = pool.worker_handles.len(), "all destination workers spawned");
        Ok(pool)
    }

    /// Submits a message, blocking while the queue is at capacity.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Closed` with the message once stopping has begun.
    pub fn submit(&self, message: Message) -> std::result::Result<(), QueueError> {
        self.queue.push_back(message)
    }

    /// Submits a message without blocking.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Full` at capacity so the caller can apply
    /// upstream flow control, or `QueueError::Closed` once stopping has begun.
    pub fn try_submit(&self, message: Message) -> std::result::Result<(), QueueError> {
        self.queue.try_push_back(message)
    }

    /// Closes the queue and joins every worker within `timeout`.
    ///
    /// Attempts already in flight finish; messages not yet taken stay in the
    /// queue, reachable through [`queue`](Self::queue).
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if a worker is still running at the
    /// deadline, otherwise `WorkerPanic` for the first worker that panicked.
    pub fn stop(mut self, timeout: Duration) -> Result<()> {
        self.stopped = true;
        info!(
            worker_count = self.worker_handles.len(),
            timeout_ms = timeout.as_millis(),
            "initiating worker shutdown"
        );
        self.queue.close();

        let deadline = Instant::now() + timeout;
        while self.has_active_workers() {
            if Instant::now() >= deadline {
                error!(
                    timeout_ms = timeout.as_millis(),
                    "worker shutdown timed out, some workers may still be running"
                );
                return Err(DeliveryError::ShutdownTimeout { timeout });
            }
            thread::sleep(POLL_INTERVAL);
        }

        let first_panic = self.join_all();
        match first_panic {
            Some(error) => Err(error),
            None => {
                info!("worker pool shutdown completed");
                Ok(())
            },
        }
    }

    /// Waits until the queue is empty and no attempt is in flight.
    ///
    /// Returns `false` if that did not happen within `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut idle_polls = 0;
        loop {
            if self.is_idle() {
                idle_polls += 1;
                // Two consecutive observations cover the gap between a pop
                // and the in-flight increment.
                if idle_polls >= 2 {
                    return true;
                }
            } else {
                idle_polls = 0;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Whether the queue is empty and no attempt is in flight right now.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.stats.in_flight.get() == 0
    }

    /// Number of workers started.
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Check if any workers are still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }

    /// Shared queue feeding the workers.
    pub fn queue(&self) -> &Arc<dyn MessageQueue> {
        &self.queue
    }

    /// Current statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// Configured shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    fn abort(&mut self) {
        self.stopped = true;
        self.queue.close();
        self.join_all();
    }

    fn join_all(&mut self) -> Option<DeliveryError> {
        let mut first_panic = None;
        for (worker_id, handle) in std::mem::take(&mut self.worker_handles).into_iter().enumerate()
        {
            match handle.join() {
                Ok(Ok(())) => {},
                Ok(Err(error)) => {
                    warn!(worker_id, error = %error, "worker completed with error during shutdown");
                },
                Err(payload) => {
                    let error = panic_message(payload.as_ref());
                    error!(worker_id, error = %error, "worker thread panicked");
                    first_panic.get_or_insert(DeliveryError::WorkerPanic { worker_id, error });
                },
            }
        }
        first_panic
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.stopped || self.worker_handles.is_empty() {
            return;
        }
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        self.queue.close();
        warn!(
            active_workers = active_count,
            "WorkerPool dropped without stop(); queue closed, workers detached"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queue::MemoryQueue, stats::StatsRegistry, transport::FileTransport};

    fn stats() -> Arc<DeliveryStats> {
        Arc::new(DeliveryStats::new(&StatsRegistry::new(), "test"))
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let config = PoolConfig { worker_count: 0, ..Default::default() };
        let result = WorkerPool::start(
            config,
            Arc::new(MemoryQueue::new(8)),
            Arc::new(DispatchTable::<()>::new()),
            stats(),
            |_| Ok(FileTransport::new("/dev/null")),
        );

        assert!(matches!(result, Err(DeliveryError::ConfigurationError { .. })));
    }

    #[test]
    fn factory_failure_starts_nothing() {
        let queue = Arc::new(MemoryQueue::new(8));
        let stats = stats();
        let result = WorkerPool::start(
            PoolConfig { worker_count: 3, ..Default::default() },
            queue.clone(),
            Arc::new(DispatchTable::<()>::new()),
            Arc::clone(&stats),
            |worker_id| {
                if worker_id == 2 {
                    Err(DeliveryError::io("no such device"))
                } else {
                    Ok(FileTransport::new("/dev/null"))
                }
            },
        );

        match result {
            Err(DeliveryError::TransportInit { worker_id, .. }) => assert_eq!(worker_id, 2),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("pool should not start"),
        }
        assert_eq!(stats.active_workers.get(), 0);
        assert!(!queue.is_closed());
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
