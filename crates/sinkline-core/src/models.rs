//! Message model handed from the shared queue to destination workers.

use std::{borrow::Cow, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Generates a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque unit of work delivered to a destination.
///
/// The queue owns a message until a worker dequeues it; the worker then owns
/// it for the duration of one attempt and either acknowledges it, discards
/// it, or hands it back to the queue. `attempts` counts every attempt whose
/// outcome sent the message back, so queue policies can bound retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Payload bytes as produced upstream.
    pub payload: Bytes,
    /// Number of attempts that ended with the message being requeued.
    pub attempts: u32,
    /// When the message entered the system.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Creates a fresh message with no recorded attempts.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { id: MessageId::new(), payload: payload.into(), attempts: 0, received_at: Utc::now() }
    }

    /// Increments the attempt counter, saturating at `u32::MAX`.
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Payload as text, replacing invalid UTF-8 sequences.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_has_no_attempts() {
        let message = Message::new("hello");
        assert_eq!(message.attempts, 0);
        assert_eq!(message.payload_str(), "hello");
    }

    #[test]
    fn attempt_counter_saturates() {
        let mut message = Message::new("x");
        message.record_attempt();
        assert_eq!(message.attempts, 1);

        message.attempts = u32::MAX;
        message.record_attempt();
        assert_eq!(message.attempts, u32::MAX);
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(Message::new("a").id, Message::new("a").id);
    }

    #[test]
    fn invalid_utf8_payload_is_rendered_lossily() {
        let message = Message::new(vec![b'o', b'k', 0xff]);
        assert_eq!(message.payload_str(), "ok\u{fffd}");
    }
}
