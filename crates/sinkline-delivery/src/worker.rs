//! Destination worker thread loop.
//!
//! A worker connects its transport, takes one message at a time from the
//! shared queue, delivers it, resolves the outcome and applies the reaction.
//! It never terminates because of a delivery failure; only closing the queue
//! (or a failing thread-init hook) ends the loop.

use std::{
    fmt::Debug,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use sinkline_core::{ActionResult, DispatchTable, Message};
use tracing::{debug, error, info, info_span, trace, warn};

use crate::{
    connection::Connection,
    error::{DeliveryError, ErrorCategory, Result},
    queue::{MessageQueue, Popped},
    resolve::{resolve_outcome, Resolution},
    retry::{default_exponential_policy, default_reconnect_policy, ReconnectBackoff, RetryPolicy},
    stats::DeliveryStats,
    transport::{Transport, WorkerInfo},
};

/// Per-worker behaviour shared by every worker of a destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Destination name used in logs and thread info.
    pub destination: String,
    /// Backoff applied after a `Retry` outcome, keyed on the message's
    /// attempt counter.
    pub retry_policy: RetryPolicy,
    /// Backoff applied between reconnects.
    pub reconnect_policy: RetryPolicy,
    /// Seed for the worker-local random generator. Each worker mixes in its
    /// index; `None` seeds from the operating system.
    pub rng_seed: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            destination: "default".to_string(),
            retry_policy: default_exponential_policy(),
            reconnect_policy: default_reconnect_policy(),
            rng_seed: None,
        }
    }
}

/// One worker thread's state: its connection, the shared queue and the
/// destination's dispatch rules.
pub struct DestinationWorker<T, C = ()> {
    id: usize,
    config: WorkerConfig,
    connection: Connection<T>,
    queue: Arc<dyn MessageQueue>,
    table: Arc<DispatchTable<C>>,
    stats: Arc<DeliveryStats>,
    /// Consecutive attempts that ended in `Disconnect`.
    disconnect_streak: u32,
}

impl<T, C> DestinationWorker<T, C>
where
    T: Transport,
    C: Debug,
{
    /// Creates a worker. Nothing runs until [`run`](Self::run).
    pub fn new(
        id: usize,
        config: WorkerConfig,
        transport: T,
        queue: Arc<dyn MessageQueue>,
        table: Arc<DispatchTable<C>>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            id,
            config,
            connection: Connection::new(transport),
            queue,
            table,
            stats,
            disconnect_streak: 0,
        }
    }

    /// Worker index within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Runs the worker loop on the calling thread until the queue is closed.
    ///
    /// # Errors
    ///
    /// Returns `TransportInit` if the transport's thread-init hook fails; no
    /// message is taken in that case.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the transport's `deliver` after putting the
    /// message back at the front of the queue and releasing this worker's
    /// in-flight and active counts.
    pub fn run(mut self) -> Result<()> {
        let span = info_span!(
            "destination_worker",
            worker_id = self.id,
            destination = %self.config.destination
        );
        let _entered = span.enter();

        let info = WorkerInfo { worker_id: self.id, destination: self.config.destination.clone() };
        self.connection
            .transport_mut()
            .thread_init(&info)
            .map_err(|e| DeliveryError::transport_init(self.id, e.to_string()))?;

        let mut rng = worker_rng(self.config.rng_seed, self.id);
        let mut reconnect = ReconnectBackoff::new(self.config.reconnect_policy.clone());
        self.stats.active_workers.increase();
        info!("destination worker starting");

        while self.ensure_connected(&mut reconnect, &mut rng) {
            let message = match self.queue.pop_blocking() {
                Popped::Message(message) => message,
                Popped::Shutdown => {
                    info!("destination worker received shutdown signal");
                    break;
                },
            };

            self.stats.in_flight.increase();
            let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                let outcome = self.connection.transport_mut().deliver(&message);
                resolve_outcome(&outcome, &self.table, self.connection.transport())
            }));
            self.stats.in_flight.decrease();
            let resolution = match attempt {
                Ok(resolution) => resolution,
                Err(payload) => {
                    error!(
                        message_id = %message.id,
                        "transport panicked during delivery, message requeued"
                    );
                    self.queue.push_front(message);
                    self.stats.active_workers.decrease();
                    panic::resume_unwind(payload);
                },
            };
            self.stats.record(resolution.result);

            if !self.react(message, resolution, &mut reconnect, &mut rng) {
                break;
            }
        }

        self.connection.shutdown();
        self.connection.transport_mut().thread_deinit();
        self.stats.active_workers.decrease();
        info!("destination worker stopped");
        Ok(())
    }

    /// Connects, backing off between failures. Returns `false` once the
    /// queue is closed.
    fn ensure_connected(&mut self, reconnect: &mut ReconnectBackoff, rng: &mut StdRng) -> bool {
        while !self.connection.is_connected() {
            if self.queue.is_closed() {
                return false;
            }

            match self.connection.connect() {
                Ok(()) => {
                    if reconnect.consecutive_failures() > 0 {
                        info!(
                            failures = reconnect.consecutive_failures(),
                            "connection re-established"
                        );
                    } else {
                        debug!("connected");
                    }
                    reconnect.reset();
                },
                Err(error) => {
                    self.stats.connect_failures.increase();
                    let delay = reconnect.next_delay(rng);
                    warn!(
                        error = %error,
                        category = %ErrorCategory::from(&error),
                        failures = reconnect.consecutive_failures(),
                        delay_ms = delay.as_millis(),
                        "connect failed, backing off"
                    );
                    if self.queue.wait_closed(delay) {
                        return false;
                    }
                },
            }
        }
        true
    }

    /// Applies the reaction for one resolved attempt. Returns `false` if the
    /// queue was closed during a backoff sleep.
    ///
    /// Requeued messages go back before any sleep so that shutdown never
    /// strands them.
    fn react(
        &mut self,
        mut message: Message,
        resolution: Resolution,
        reconnect: &mut ReconnectBackoff,
        rng: &mut StdRng,
    ) -> bool {
        let Resolution { result, status_code, rule_matched } = resolution;
        if result.counts_attempt() {
            message.record_attempt();
        }
        let message_id = message.id;
        let attempts = message.attempts;
        if result == ActionResult::Disconnect {
            self.disconnect_streak = self.disconnect_streak.saturating_add(1);
        } else {
            self.disconnect_streak = 0;
        }

        match result {
            ActionResult::Success | ActionResult::Queued => {
                trace!(%message_id, %result, ?status_code, "message acknowledged");
                true
            },
            ActionResult::Drop => {
                warn!(%message_id, ?status_code, rule_matched, "message dropped");
                true
            },
            ActionResult::Retry => {
                let delay = self.config.retry_policy.delay_for(attempts, rng);
                debug!(
                    %message_id,
                    attempts,
                    ?status_code,
                    delay_ms = delay.as_millis(),
                    "delivery will be retried"
                );
                self.queue.push_front(message);
                !self.queue.wait_closed(delay)
            },
            ActionResult::Disconnect => {
                self.queue.push_front(message);
                self.connection.disconnect();
                if self.disconnect_streak <= 1 {
                    debug!(%message_id, attempts, ?status_code, "reconnect requested");
                    return true;
                }
                // Repeated disconnects back off like a failed connection.
                let delay =
                    self.config.reconnect_policy.delay_for(self.disconnect_streak - 1, rng);
                debug!(
                    %message_id,
                    attempts,
                    ?status_code,
                    streak = self.disconnect_streak,
                    delay_ms = delay.as_millis(),
                    "reconnect requested again, backing off"
                );
                !self.queue.wait_closed(delay)
            },
            ActionResult::NotConnected | ActionResult::Error => {
                self.queue.push_front(message);
                self.connection.disconnect();
                let delay = reconnect.next_delay(rng);
                warn!(
                    %message_id,
                    attempts,
                    %result,
                    ?status_code,
                    delay_ms = delay.as_millis(),
                    "delivery failed, reconnecting"
                );
                !self.queue.wait_closed(delay)
            },
        }
    }
}

/// Worker-local generator; deterministic per worker when seeded.
fn worker_rng(seed: Option<u64>, worker_id: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ worker_id as u64),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn seeded_rng_is_stable_per_worker() {
        let mut first: StdRng = worker_rng(Some(42), 1);
        let mut again: StdRng = worker_rng(Some(42), 1);
        let mut other: StdRng = worker_rng(Some(42), 2);

        let a: Vec<u64> = (0..4).map(|_| first.random()).collect();
        let b: Vec<u64> = (0..4).map(|_| again.random()).collect();
        let c: Vec<u64> = (0..4).map(|_| other.random()).collect();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn default_config_uses_preset_policies() {
        let config = WorkerConfig::default();
        assert_eq!(config.retry_policy, default_exponential_policy());
        assert_eq!(config.reconnect_policy, default_reconnect_policy());
        assert!(config.rng_seed.is_none());
    }
}
