//! Transport contract implemented by each destination kind.
//!
//! A transport owns whatever handle talks to the remote sink (a file, an HTTP
//! client, a socket). Each worker owns exactly one transport; transports are
//! never shared between workers, so implementations need `Send` but not
//! `Sync`.

use bytes::Bytes;
use sinkline_core::{ActionResult, Message};

use crate::error::Result;

pub mod file;
pub mod http;

pub use file::FileTransport;
pub use http::{HttpConfig, HttpTransport};

/// Identity of the worker a transport is running on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Zero-based worker index within its pool.
    pub worker_id: usize,
    /// Destination name, used for logs and counters.
    pub destination: String,
}

/// Raw result of a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The transport decided the outcome itself.
    Action(ActionResult),
    /// The sink answered with a status code and body that still need to be
    /// resolved through the destination's dispatch rules.
    Response {
        /// Status code reported by the sink
        status_code: i64,
        /// Response body, possibly truncated
        body: Bytes,
    },
}

/// Destination-specific connect, disconnect and deliver primitives.
pub trait Transport: Send {
    /// Runs once on the worker thread before the first connect.
    ///
    /// # Errors
    ///
    /// A failure stops the worker before it takes any message.
    fn thread_init(&mut self, worker: &WorkerInfo) -> Result<()> {
        let _ = worker;
        Ok(())
    }

    /// Runs once on the worker thread after the final disconnect.
    fn thread_deinit(&mut self) {}

    /// Establishes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink is unreachable; the worker backs off and
    /// tries again.
    fn connect(&mut self) -> Result<()>;

    /// Releases the connection. Must tolerate being called when already
    /// disconnected.
    fn disconnect(&mut self);

    /// Attempts to deliver one message.
    fn deliver(&mut self, message: &Message) -> Outcome;

    /// Result used for a response no dispatch rule matched.
    fn default_action(&self, status_code: i64, body: &[u8]) -> ActionResult {
        let _ = body;
        if (200..300).contains(&status_code) {
            ActionResult::Success
        } else {
            ActionResult::Error
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn thread_init(&mut self, worker: &WorkerInfo) -> Result<()> {
        (**self).thread_init(worker)
    }

    fn thread_deinit(&mut self) {
        (**self).thread_deinit();
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect();
    }

    fn deliver(&mut self, message: &Message) -> Outcome {
        (**self).deliver(message)
    }

    fn default_action(&self, status_code: i64, body: &[u8]) -> ActionResult {
        (**self).default_action(status_code, body)
    }
}
