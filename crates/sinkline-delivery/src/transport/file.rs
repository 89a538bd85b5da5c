//! Append-only file destination.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use sinkline_core::{ActionResult, Message};
use tracing::{debug, error};

use super::{Outcome, Transport, WorkerInfo};
use crate::error::{DeliveryError, Result};

/// Writes each message payload as one line to a file.
///
/// The file is opened in append mode on connect and closed on disconnect.
/// Every message is written and flushed before the attempt reports success;
/// a failed write or flush reports `NotConnected` so the worker reopens the
/// file before trying again.
#[derive(Debug)]
pub struct FileTransport {
    path: PathBuf,
    file: Option<File>,
    worker_id: Option<usize>,
}

impl FileTransport {
    /// Creates a transport for `path`. Nothing is opened until connect.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: None, worker_id: None }
    }

    /// Target path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a file handle is currently open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Transport for FileTransport {
    fn thread_init(&mut self, worker: &WorkerInfo) -> Result<()> {
        self.worker_id = Some(worker.worker_id);
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path).map_err(|e| {
            DeliveryError::connect(format!("could not open {}: {e}", self.path.display()))
        })?;
        debug!(worker_id = ?self.worker_id, path = %self.path.display(), "file opened");
        self.file = Some(file);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.file.take().is_some() {
            debug!(worker_id = ?self.worker_id, path = %self.path.display(), "file closed");
        }
    }

    fn deliver(&mut self, message: &Message) -> Outcome {
        let Some(file) = self.file.as_mut() else {
            return Outcome::Action(ActionResult::NotConnected);
        };

        let mut line = Vec::with_capacity(message.payload.len() + 1);
        line.extend_from_slice(&message.payload);
        line.push(b'\n');

        if let Err(e) = file.write_all(&line) {
            error!(path = %self.path.display(), error = %e, "error while writing file");
            return Outcome::Action(ActionResult::NotConnected);
        }
        if let Err(e) = file.flush() {
            error!(path = %self.path.display(), error = %e, "error while flushing file");
            return Outcome::Action(ActionResult::NotConnected);
        }

        Outcome::Action(ActionResult::Success)
    }
}
