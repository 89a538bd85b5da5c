//! Outcomes of a delivery attempt and the actions dispatch rules can select.
//!
//! `ActionResult` is the closed set of outcomes the worker state machine
//! understands. `Action` is the narrower set an operator can attach to a
//! dispatch rule; every action converts into exactly one result.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Outcome of a single delivery attempt.
///
/// Every attempt produces exactly one value. The worker reacts as follows:
///
/// | Result | Message | Connection |
/// |---|---|---|
/// | `Success` | acknowledged | kept |
/// | `Queued` | acknowledged | kept |
/// | `Retry` | requeued at front, backoff | kept |
/// | `Drop` | discarded | kept |
/// | `NotConnected` | requeued at front | reconnect after backoff |
/// | `Disconnect` | requeued at front | reconnect immediately |
/// | `Error` | requeued at front | reconnect after backoff |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    /// Message delivered.
    Success,
    /// Message accepted asynchronously by the transport.
    Queued,
    /// Transient failure, connection still usable.
    Retry,
    /// Message cannot be processed and is discarded.
    Drop,
    /// Transport unusable.
    NotConnected,
    /// Policy asks for a fresh connection.
    Disconnect,
    /// Attempt failed unexpectedly.
    Error,
}

impl ActionResult {
    /// Whether the message leaves the queue for good as delivered.
    pub fn acknowledges(self) -> bool {
        matches!(self, Self::Success | Self::Queued)
    }

    /// Whether the message goes back to the front of the queue.
    pub fn requeues(self) -> bool {
        matches!(self, Self::Retry | Self::NotConnected | Self::Disconnect | Self::Error)
    }

    /// Whether the worker must drop its connection before the next attempt.
    pub fn requires_reconnect(self) -> bool {
        matches!(self, Self::NotConnected | Self::Disconnect | Self::Error)
    }

    /// Whether the message attempt counter is incremented.
    pub fn counts_attempt(self) -> bool {
        self.requeues()
    }

    /// Stable lowercase name for logs and counters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Queued => "queued",
            Self::Retry => "retry",
            Self::Drop => "drop",
            Self::NotConnected => "not_connected",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action attached to a dispatch rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Treat the response as a successful delivery.
    Success,
    /// Requeue and retry over the same connection.
    Retry,
    /// Discard the message.
    Drop,
    /// Requeue and reconnect before the next attempt.
    Disconnect,
}

impl Action {
    /// Stable lowercase name, as accepted by `FromStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retry => "retry",
            Self::Drop => "drop",
            Self::Disconnect => "disconnect",
        }
    }
}

impl From<Action> for ActionResult {
    fn from(action: Action) -> Self {
        match action {
            Action::Success => Self::Success,
            Action::Retry => Self::Retry,
            Action::Drop => Self::Drop,
            Action::Disconnect => Self::Disconnect,
        }
    }
}

impl FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "retry" => Ok(Self::Retry),
            "drop" => Ok(Self::Drop),
            "disconnect" => Ok(Self::Disconnect),
            _ => Err(CoreError::unknown_action(s)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
