//! Scripted transport and the journal it writes.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    thread,
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use sinkline_core::{ActionResult, Message};
use sinkline_delivery::{DeliveryError, Outcome, Transport, WorkerInfo};

/// One scripted delivery reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// What `deliver` returns.
    pub outcome: Outcome,
    /// How long `deliver` blocks before returning.
    pub delay: Duration,
}

impl Step {
    /// Immediate reply.
    pub fn new(outcome: Outcome) -> Self {
        Self { outcome, delay: Duration::ZERO }
    }

    /// Immediate direct result.
    pub fn action(result: ActionResult) -> Self {
        Self::new(Outcome::Action(result))
    }

    /// Immediate `(status code, body)` response.
    pub fn response(status_code: i64, body: &str) -> Self {
        Self::new(Outcome::Response { status_code, body: Bytes::copy_from_slice(body.as_bytes()) })
    }

    /// Same reply after `delay`.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Everything a scripted transport observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Thread-init hook ran.
    ThreadInit {
        /// Worker index
        worker: usize,
    },
    /// Connect was attempted.
    Connect {
        /// Worker index
        worker: usize,
        /// Whether it succeeded
        ok: bool,
    },
    /// Disconnect was called.
    Disconnect {
        /// Worker index
        worker: usize,
    },
    /// Delivery started.
    Deliver {
        /// Worker index
        worker: usize,
        /// Payload as text
        payload: String,
        /// Attempt counter carried by the message
        attempts: u32,
    },
    /// Thread-deinit hook ran.
    ThreadDeinit {
        /// Worker index
        worker: usize,
    },
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: HashMap<Bytes, VecDeque<Step>>,
    connect_plan: VecDeque<bool>,
    fail_thread_init: bool,
    journal: Vec<JournalEntry>,
}

/// Shared script driving any number of [`ScriptedTransport`]s.
///
/// Payloads without remaining steps are delivered successfully; connects
/// without a planned result succeed.
#[derive(Debug, Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `step` as the next reply for `payload`.
    pub fn on(&self, payload: &str, step: Step) -> &Self {
        self.state
            .lock()
            .steps
            .entry(Bytes::copy_from_slice(payload.as_bytes()))
            .or_default()
            .push_back(step);
        self
    }

    /// Makes the next `count` connects fail.
    pub fn fail_connects(&self, count: usize) -> &Self {
        self.state.lock().connect_plan.extend(std::iter::repeat(false).take(count));
        self
    }

    /// Appends explicit connect results, consumed in order.
    pub fn plan_connects(&self, results: &[bool]) -> &Self {
        self.state.lock().connect_plan.extend(results.iter().copied());
        self
    }

    /// Makes every thread-init hook fail.
    pub fn fail_thread_init(&self) -> &Self {
        self.state.lock().fail_thread_init = true;
        self
    }

    /// New transport bound to this script.
    pub fn transport(&self) -> ScriptedTransport {
        ScriptedTransport { script: self.clone(), worker: usize::MAX, connected: false }
    }

    /// Copy of the journal so far.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.clone()
    }

    /// Payloads in the order deliveries started, across all workers.
    pub fn deliveries(&self) -> Vec<String> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Deliver { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of connect attempts, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|entry| matches!(entry, JournalEntry::Connect { .. }))
            .count()
    }

    fn record(&self, entry: JournalEntry) {
        self.state.lock().journal.push(entry);
    }
}

/// Transport replaying a [`Script`].
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Script,
    worker: usize,
    connected: bool,
}

impl Transport for ScriptedTransport {
    fn thread_init(&mut self, worker: &WorkerInfo) -> sinkline_delivery::Result<()> {
        self.worker = worker.worker_id;
        self.script.record(JournalEntry::ThreadInit { worker: self.worker });
        if self.script.state.lock().fail_thread_init {
            return Err(DeliveryError::io("scripted thread init failure"));
        }
        Ok(())
    }

    fn thread_deinit(&mut self) {
        self.script.record(JournalEntry::ThreadDeinit { worker: self.worker });
    }

    fn connect(&mut self) -> sinkline_delivery::Result<()> {
        let ok = {
            let mut state = self.script.state.lock();
            let ok = state.connect_plan.pop_front().unwrap_or(true);
            state.journal.push(JournalEntry::Connect { worker: self.worker, ok });
            ok
        };
        if ok {
            self.connected = true;
            Ok(())
        } else {
            Err(DeliveryError::connect("scripted connect failure"))
        }
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.script.record(JournalEntry::Disconnect { worker: self.worker });
    }

    fn deliver(&mut self, message: &Message) -> Outcome {
        let step = {
            let mut state = self.script.state.lock();
            state.journal.push(JournalEntry::Deliver {
                worker: self.worker,
                payload: message.payload_str().into_owned(),
                attempts: message.attempts,
            });
            state.steps.get_mut(&message.payload).and_then(VecDeque::pop_front)
        };

        if !self.connected {
            return Outcome::Action(ActionResult::NotConnected);
        }

        let step = step.unwrap_or_else(|| Step::action(ActionResult::Success));
        if !step.delay.is_zero() {
            thread::sleep(step.delay);
        }
        step.outcome
    }
}
