//! Sinkline log delivery daemon.
//!
//! Reads newline-delimited messages from stdin and delivers them to the
//! configured destination through a pool of worker threads. On end of input
//! the queue is drained before stopping; on Ctrl+C or SIGTERM the pool stops
//! right away and undelivered messages are reported.

use std::{io, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use sinkline_delivery::{
    DeliveryStats, FileTransport, HttpTransport, MemoryQueue, MessageQueue, StatsRegistry,
    WorkerPool,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

mod config;
mod input;

use config::{Config, DestinationConfig};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "starting sinkline");

    let config = Config::load()?;
    info!(
        destination = config.destination.kind(),
        worker_count = config.worker_count,
        queue_capacity = config.queue_capacity,
        dispatch_rules = config.dispatch_rules.len(),
        "configuration loaded"
    );

    let table = Arc::new(config.dispatch_table()?);
    let registry = StatsRegistry::new();
    let stats = Arc::new(DeliveryStats::new(&registry, config.destination.kind()));
    let queue: Arc<dyn MessageQueue> = Arc::new(
        MemoryQueue::new(config.queue_capacity).with_max_attempts(config.max_attempts),
    );

    let pool = match &config.destination {
        DestinationConfig::File { path } => {
            let path = path.clone();
            WorkerPool::start(
                config.to_pool_config(),
                Arc::clone(&queue),
                table,
                stats,
                move |_| Ok(FileTransport::new(path.clone())),
            )
        },
        DestinationConfig::Http { .. } => {
            let http = config
                .destination
                .to_http_config()
                .context("http destination without http settings")?;
            WorkerPool::start(config.to_pool_config(), Arc::clone(&queue), table, stats, |_| {
                HttpTransport::new(http.clone())
            })
        },
    }
    .context("failed to start worker pool")?;

    let input_done = spawn_input_reader(Arc::clone(&queue))?;

    let shutdown_timeout = config.shutdown_timeout();
    tokio::select! {
        result = input_done => {
            match result {
                Ok(Ok(submitted)) => info!(submitted, "input exhausted, draining queue"),
                Ok(Err(e)) => error!(error = %e, "failed to read input, draining queue"),
                Err(_) => error!("input reader exited unexpectedly, draining queue"),
            }
            tokio::select! {
                drained = wait_idle(&pool, shutdown_timeout) => {
                    if !drained {
                        warn!(timeout_ms = shutdown_timeout.as_millis(), "queue not drained before timeout");
                    }
                }
                () = shutdown_signal() => info!("shutdown signal received while draining"),
            }
        }
        () = shutdown_signal() => info!("shutdown signal received"),
    }

    let stats = pool.stats();
    let stopped = tokio::task::spawn_blocking(move || pool.stop(shutdown_timeout))
        .await
        .context("worker pool shutdown task failed")?;
    if let Err(e) = &stopped {
        error!(error = %e, "worker pool did not stop cleanly");
    }

    let undelivered = queue.drain().len();
    info!(
        processed = stats.processed,
        delivered = stats.delivered,
        queued = stats.queued,
        dropped = stats.dropped,
        retried = stats.retried,
        disconnected = stats.disconnected,
        not_connected = stats.not_connected,
        errors = stats.errors,
        connect_failures = stats.connect_failures,
        "delivery statistics"
    );
    for (name, value) in registry.snapshot() {
        debug!(counter = %name, value, "counter");
    }
    if undelivered > 0 {
        warn!(undelivered, "messages left undelivered");
    }

    stopped?;
    info!("sinkline shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sinkline=debug"));

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Reads stdin on a dedicated thread, which is left behind if shutdown
/// starts while it is blocked on input.
fn spawn_input_reader(queue: Arc<dyn MessageQueue>) -> Result<oneshot::Receiver<io::Result<usize>>> {
    let (done_tx, done_rx) = oneshot::channel();
    thread::Builder::new()
        .name("sinkline-input".to_string())
        .spawn(move || {
            let result = input::submit_lines(io::stdin().lock(), queue.as_ref());
            let _ = done_tx.send(result);
        })
        .context("failed to spawn input thread")?;
    Ok(done_rx)
}

/// Waits until the pool has been idle for two consecutive polls.
async fn wait_idle(pool: &WorkerPool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut interval = tokio::time::interval(IDLE_POLL_INTERVAL);
    let mut idle_polls = 0;
    loop {
        interval.tick().await;
        if pool.is_idle() {
            idle_polls += 1;
            if idle_polls >= 2 {
                return true;
            }
        } else {
            idle_polls = 0;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
