//! Fixture builders with test-friendly timings.

use std::{sync::Arc, time::Duration};

use sinkline_core::Message;
use sinkline_delivery::{retry::fixed_policy, DeliveryStats, PoolConfig, StatsRegistry, WorkerConfig};

/// Messages with the given payloads, in order.
pub fn messages(payloads: &[&str]) -> Vec<Message> {
    payloads.iter().map(|payload| Message::new(payload.to_string())).collect()
}

/// Fresh statistics for a destination named `test`, with the registry that
/// holds them.
pub fn test_stats() -> (StatsRegistry, Arc<DeliveryStats>) {
    let registry = StatsRegistry::new();
    let stats = Arc::new(DeliveryStats::new(&registry, "test"));
    (registry, stats)
}

/// Worker settings with short, jitter-free delays and a fixed seed.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        destination: "test".to_string(),
        retry_policy: fixed_policy(Duration::from_millis(10)),
        reconnect_policy: fixed_policy(Duration::from_millis(5)),
        rng_seed: Some(7),
    }
}

/// Pool settings built on [`fast_worker_config`].
pub fn fast_pool_config(worker_count: usize) -> PoolConfig {
    PoolConfig {
        worker_count,
        worker: fast_worker_config(),
        shutdown_timeout: Duration::from_secs(5),
    }
}
