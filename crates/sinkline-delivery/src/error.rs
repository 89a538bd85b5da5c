//! Error types for destination delivery.
//!
//! Delivery outcomes themselves are not errors: a failed attempt is reported
//! as an [`ActionResult`](sinkline_core::ActionResult) and handled by the
//! worker. The errors here cover configuration, transport construction,
//! connection establishment and pool lifecycle, and are categorized so that
//! configuration-fatal failures can be told apart from recoverable ones.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised by delivery components.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Invalid destination or pool configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Transport for a worker could not be constructed.
    #[error("failed to construct transport for worker {worker_id}: {message}")]
    TransportInit {
        /// Index of the worker whose transport failed
        worker_id: usize,
        /// Construction error message
        message: String,
    },

    /// Transport could not establish its connection.
    #[error("connect failed: {message}")]
    ConnectFailed {
        /// Connection error message
        message: String,
    },

    /// I/O failure outside of a delivery attempt.
    #[error("i/o error: {message}")]
    Io {
        /// I/O error message
        message: String,
    },

    /// Worker thread could not be spawned.
    #[error("failed to spawn worker {worker_id}: {message}")]
    WorkerSpawn {
        /// Index of the worker
        worker_id: usize,
        /// Spawn error message
        message: String,
    },

    /// Worker thread panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker
        worker_id: usize,
        /// Panic payload rendered as text
        error: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {}ms", timeout.as_millis())]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a transport construction error.
    pub fn transport_init(worker_id: usize, message: impl Into<String>) -> Self {
        Self::TransportInit { worker_id, message: message.into() }
    }

    /// Creates a connect failure.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::ConnectFailed { message: message.into() }
    }

    /// Creates an I/O error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into() }
    }

    /// Whether this error must abort startup rather than be retried.
    pub fn is_configuration_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError { .. } | Self::TransportInit { .. } | Self::WorkerSpawn { .. }
        )
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

/// Category of delivery error for logging and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration or construction problems.
    Configuration,
    /// Connection establishment.
    Connection,
    /// Worker lifecycle.
    Lifecycle,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::ConfigurationError { .. }
            | DeliveryError::TransportInit { .. }
            | DeliveryError::WorkerSpawn { .. } => Self::Configuration,
            DeliveryError::ConnectFailed { .. } | DeliveryError::Io { .. } => Self::Connection,
            DeliveryError::WorkerPanic { .. } | DeliveryError::ShutdownTimeout { .. } => {
                Self::Lifecycle
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Connection => write!(f, "connection"),
            Self::Lifecycle => write!(f, "lifecycle"),
        }
    }
}
