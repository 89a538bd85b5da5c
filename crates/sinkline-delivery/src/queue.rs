//! Shared message queue feeding destination workers.
//!
//! Workers interact with the queue only through [`MessageQueue`]: they block
//! in [`pop_blocking`](MessageQueue::pop_blocking) for work, hand failed
//! messages back with [`push_front`](MessageQueue::push_front) so retries keep
//! their place ahead of newer messages, and sleep through backoff intervals in
//! [`wait_closed`](MessageQueue::wait_closed) so that closing the queue wakes
//! them immediately. Closing the queue is the pool's shutdown signal.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use sinkline_core::Message;
use thiserror::Error;
use tracing::warn;

/// Result of waiting for the next message.
#[derive(Debug)]
pub enum Popped {
    /// Next message to attempt.
    Message(Message),
    /// Queue was closed; the worker must stop.
    Shutdown,
}

/// Submission failure, handing the message back to the producer.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue is at capacity and the caller asked not to block.
    #[error("queue full at capacity {capacity}")]
    Full {
        /// Configured capacity
        capacity: usize,
        /// Rejected message
        message: Message,
    },

    /// Queue no longer accepts new messages.
    #[error("queue closed")]
    Closed {
        /// Rejected message
        message: Message,
    },
}

impl QueueError {
    /// Returns the rejected message.
    pub fn into_message(self) -> Message {
        match self {
            Self::Full { message, .. } | Self::Closed { message } => message,
        }
    }
}

/// Hand-off contract between producers, workers and the pool.
pub trait MessageQueue: Send + Sync {
    /// Returns a message to the head of the queue.
    ///
    /// Never blocks and is accepted even after close, so a message taken by a
    /// worker is never lost during shutdown.
    fn push_front(&self, message: Message);

    /// Appends a new message, blocking while the queue is at capacity.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] once the queue has been closed.
    fn push_back(&self, message: Message) -> Result<(), QueueError>;

    /// Appends a new message without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] at capacity, [`QueueError::Closed`] after
    /// close.
    fn try_push_back(&self, message: Message) -> Result<(), QueueError>;

    /// Blocks until a message is available or the queue is closed.
    fn pop_blocking(&self) -> Popped;

    /// Closes the queue and wakes every waiter.
    fn close(&self);

    /// Whether [`close`](MessageQueue::close) has been called.
    fn is_closed(&self) -> bool;

    /// Sleeps up to `timeout`, returning early with `true` if the queue is
    /// closed.
    fn wait_closed(&self, timeout: Duration) -> bool;

    /// Number of messages waiting.
    fn len(&self) -> usize;

    /// Whether no messages are waiting.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every waiting message in order.
    fn drain(&self) -> Vec<Message>;
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<Message>,
    closed: bool,
}

/// In-memory bounded queue.
///
/// Capacity applies to [`push_back`](MessageQueue::push_back) only; requeued
/// messages may temporarily exceed it. When `max_attempts` is set, a requeued
/// message whose attempt counter has reached the bound is discarded instead.
#[derive(Debug)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    closed: Condvar,
    capacity: usize,
    max_attempts: Option<u32>,
    expired: AtomicU64,
}

impl MemoryQueue {
    /// Creates a queue holding at most `capacity` newly submitted messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            closed: Condvar::new(),
            capacity: capacity.max(1),
            max_attempts: None,
            expired: AtomicU64::new(0),
        }
    }

    /// Discards requeued messages once they have been attempted this often.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages discarded by the `max_attempts` policy.
    pub fn expired_count(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    fn push_back_locked(&self, state: &mut QueueState, message: Message) {
        state.messages.push_back(message);
        self.not_empty.notify_one();
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(crate::DEFAULT_QUEUE_CAPACITY)
    }
}

impl MessageQueue for MemoryQueue {
    fn push_front(&self, message: Message) {
        if let Some(max_attempts) = self.max_attempts {
            if message.attempts >= max_attempts {
                self.expired.fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id = %message.id,
                    attempts = message.attempts,
                    max_attempts,
                    "message exceeded maximum attempts, dropping"
                );
                return;
            }
        }

        let mut state = self.state.lock();
        state.messages.push_front(message);
        self.not_empty.notify_one();
    }

    fn push_back(&self, message: Message) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(QueueError::Closed { message });
            }
            if state.messages.len() < self.capacity {
                self.push_back_locked(&mut state, message);
                return Ok(());
            }
            self.not_full.wait(&mut state);
        }
    }

    fn try_push_back(&self, message: Message) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueError::Closed { message });
        }
        if state.messages.len() >= self.capacity {
            return Err(QueueError::Full { capacity: self.capacity, message });
        }
        self.push_back_locked(&mut state, message);
        Ok(())
    }

    fn pop_blocking(&self) -> Popped {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Popped::Shutdown;
            }
            if let Some(message) = state.messages.pop_front() {
                self.not_full.notify_one();
                return Popped::Message(message);
            }
            self.not_empty.wait(&mut state);
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.closed.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.closed {
            if self.closed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.closed
    }

    fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    fn drain(&self) -> Vec<Message> {
        let mut state = self.state.lock();
        let drained = state.messages.drain(..).collect();
        self.not_full.notify_all();
        drained
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn payloads(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.payload_str().into_owned()).collect()
    }

    #[test]
    fn pops_in_submission_order() {
        let queue = MemoryQueue::new(10);
        for payload in ["a", "b", "c"] {
            queue.push_back(Message::new(payload)).unwrap();
        }

        let mut popped = Vec::new();
        for _ in 0..3 {
            match queue.pop_blocking() {
                Popped::Message(message) => popped.push(message),
                Popped::Shutdown => panic!("queue should not be closed"),
            }
        }
        assert_eq!(payloads(&popped), ["a", "b", "c"]);
    }

    #[test]
    fn requeued_message_goes_ahead_of_newer_ones() {
        let queue = MemoryQueue::new(10);
        queue.push_back(Message::new("first")).unwrap();
        queue.push_back(Message::new("second")).unwrap();

        let Popped::Message(first) = queue.pop_blocking() else { panic!("expected message") };
        queue.push_back(Message::new("third")).unwrap();
        queue.push_front(first);

        assert_eq!(payloads(&queue.drain()), ["first", "second", "third"]);
    }

    #[test]
    fn try_push_reports_full_and_returns_message() {
        let queue = MemoryQueue::new(1);
        queue.try_push_back(Message::new("a")).unwrap();

        let error = queue.try_push_back(Message::new("b")).unwrap_err();
        assert!(matches!(error, QueueError::Full { capacity: 1, .. }));
        assert_eq!(error.into_message().payload_str(), "b");
    }

    #[test]
    fn requeue_ignores_capacity() {
        let queue = MemoryQueue::new(1);
        queue.push_back(Message::new("a")).unwrap();
        queue.push_front(Message::new("retry"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn blocked_producer_resumes_when_space_frees() {
        let queue = Arc::new(MemoryQueue::new(1));
        queue.push_back(Message::new("a")).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push_back(Message::new("b")))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 1);
        assert!(matches!(queue.pop_blocking(), Popped::Message(_)));

        producer.join().unwrap().unwrap();
        assert_eq!(payloads(&queue.drain()), ["b"]);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(MemoryQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || matches!(queue.pop_blocking(), Popped::Shutdown))
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn closed_queue_keeps_pending_messages_and_accepts_requeues() {
        let queue = MemoryQueue::new(4);
        queue.push_back(Message::new("pending")).unwrap();
        queue.close();

        assert!(matches!(queue.pop_blocking(), Popped::Shutdown));
        assert!(matches!(queue.push_back(Message::new("late")), Err(QueueError::Closed { .. })));

        queue.push_front(Message::new("in-flight"));
        assert_eq!(payloads(&queue.drain()), ["in-flight", "pending"]);
    }

    #[test]
    fn wait_closed_times_out_or_returns_early() {
        let queue = Arc::new(MemoryQueue::new(1));
        let start = Instant::now();
        assert!(!queue.wait_closed(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));

        let closer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.close();
            })
        };
        let start = Instant::now();
        assert!(queue.wait_closed(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        closer.join().unwrap();
    }

    #[test]
    fn max_attempts_discards_exhausted_requeues() {
        let queue = MemoryQueue::new(4).with_max_attempts(Some(2));

        let mut message = Message::new("flaky");
        message.attempts = 1;
        queue.push_front(message.clone());
        assert_eq!(queue.len(), 1);

        message.attempts = 2;
        queue.push_front(message);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.expired_count(), 1);
    }
}
