//! Threaded destination delivery with outcome-driven retry handling.
//!
//! This crate drains a shared message queue with a pool of worker threads,
//! delivers each message through a destination [`Transport`], and turns the
//! outcome of every attempt into one of the [`ActionResult`] reactions:
//! acknowledge, discard, requeue, or requeue and reconnect.
//!
//! # Architecture
//!
//! Each worker is an operating-system thread that exclusively owns one
//! transport and its [`Connection`] state. Workers cooperate only through the
//! [`MessageQueue`]:
//!
//! 1. **Connect** - Establish the transport connection, backing off on failure
//! 2. **Dequeue** - Block on the shared queue until a message or shutdown
//! 3. **Deliver** - Hand the message to the transport
//! 4. **Resolve** - Map a raw `(status code, body)` response through the
//!    destination's [`DispatchTable`](sinkline_core::DispatchTable)
//! 5. **React** - Acknowledge, drop, or requeue at the front and reconnect
//!
//! Closing the queue is the shutdown signal. It is observed while waiting for
//! a message and during backoff sleeps; an attempt in flight always finishes
//! and its message is requeued if it was not acknowledged.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use sinkline_core::{DispatchTable, Message};
//! use sinkline_delivery::{
//!     DeliveryError, DeliveryStats, FileTransport, MemoryQueue, PoolConfig, StatsRegistry,
//!     WorkerPool,
//! };
//!
//! # fn example() -> Result<(), DeliveryError> {
//! let registry = StatsRegistry::new();
//! let stats = Arc::new(DeliveryStats::new(&registry, "file"));
//! let queue = Arc::new(MemoryQueue::default());
//! let table = Arc::new(DispatchTable::<()>::new());
//!
//! let pool = WorkerPool::start(PoolConfig::default(), queue, table, stats, |_| {
//!     Ok(FileTransport::new("/var/log/sinkline.log"))
//! })?;
//! pool.submit(Message::new("hello")).ok();
//! pool.stop(Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod error;
pub mod queue;
pub mod resolve;
pub mod retry;
pub mod stats;
pub mod transport;
pub mod worker;
pub mod worker_pool;

pub use connection::{Connection, ConnectionState};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use queue::{MemoryQueue, MessageQueue, Popped, QueueError};
pub use resolve::{resolve_outcome, Resolution};
pub use retry::{BackoffStrategy, ReconnectBackoff, RetryPolicy};
pub use sinkline_core::ActionResult;
pub use stats::{DeliveryStats, EngineStats, StatsCounter, StatsRegistry};
pub use transport::{FileTransport, HttpConfig, HttpTransport, Outcome, Transport, WorkerInfo};
pub use worker::{DestinationWorker, WorkerConfig};
pub use worker_pool::{PoolConfig, WorkerPool};

/// Default number of worker threads per destination.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default bound on newly submitted messages waiting in a queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default time allowed for workers to finish when stopping a pool.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
