//! Integration tests for worker pool lifecycle and message ordering.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{sync::Arc, time::Duration};

use sinkline_core::{ActionResult, DispatchTable, Message};
use sinkline_delivery::{
    DeliveryError, MemoryQueue, MessageQueue, Outcome, QueueError, Result, Transport, WorkerPool,
};
use sinkline_testing::{
    fast_pool_config, init_tracing, messages, test_stats, wait_until, JournalEntry, Script, Step,
};

const WAIT: Duration = Duration::from_secs(5);

fn start(script: &Script, worker_count: usize, queue: &Arc<MemoryQueue>) -> WorkerPool {
    let (_registry, stats) = test_stats();
    WorkerPool::start(
        fast_pool_config(worker_count),
        Arc::clone(queue) as Arc<dyn MessageQueue>,
        Arc::new(DispatchTable::<()>::new()),
        stats,
        |_| Ok(script.transport()),
    )
    .unwrap()
}

fn submit_all(pool: &WorkerPool, payloads: &[&str]) {
    for message in messages(payloads) {
        pool.submit(message).unwrap();
    }
}

#[test]
fn retried_message_is_attempted_again_before_later_messages() {
    init_tracing();
    let script = Script::new();
    script.on("m1", Step::action(ActionResult::Retry));
    script.on("m2", Step::action(ActionResult::Success).delayed(Duration::from_millis(150)));
    let queue = Arc::new(MemoryQueue::new(16));

    let pool = start(&script, 2, &queue);
    submit_all(&pool, &["m1", "m2", "m3"]);
    assert!(wait_until(WAIT, || script.deliveries().len() == 4));
    assert!(pool.wait_idle(WAIT));

    let deliveries = script.deliveries();
    let second_m1 = deliveries.iter().enumerate().filter(|(_, p)| *p == "m1").nth(1).unwrap().0;
    let m3 = deliveries.iter().position(|p| p == "m3").unwrap();
    assert!(second_m1 < m3, "m1 must be re-offered before m3: {deliveries:?}");

    let stats = pool.stats();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.delivered, 3);
    pool.stop(WAIT).unwrap();
}

#[test]
fn each_worker_owns_its_connection() {
    init_tracing();
    let script = Script::new();
    let queue = Arc::new(MemoryQueue::new(64));

    let pool = start(&script, 3, &queue);
    assert_eq!(pool.worker_count(), 3);
    submit_all(&pool, &["a", "b", "c", "d", "e", "f"]);
    assert!(pool.wait_idle(WAIT));
    pool.stop(WAIT).unwrap();

    let journal = script.journal();
    for worker in 0..3 {
        let count = |expected: &JournalEntry| journal.iter().filter(|e| *e == expected).count();
        assert_eq!(count(&JournalEntry::ThreadInit { worker }), 1);
        assert_eq!(count(&JournalEntry::Connect { worker, ok: true }), 1);
        assert_eq!(count(&JournalEntry::Disconnect { worker }), 1);
        assert_eq!(count(&JournalEntry::ThreadDeinit { worker }), 1);
    }

    let mut delivered = script.deliveries();
    delivered.sort();
    assert_eq!(delivered, vec!["a", "b", "c", "d", "e", "f"]);
}

#[test]
fn stop_finishes_in_flight_attempt_and_keeps_the_rest_queued() {
    init_tracing();
    let script = Script::new();
    script.on("m1", Step::action(ActionResult::Success).delayed(Duration::from_millis(200)));
    let queue = Arc::new(MemoryQueue::new(16));
    let (_registry, stats) = test_stats();

    let pool = WorkerPool::start(
        fast_pool_config(1),
        Arc::clone(&queue) as Arc<dyn MessageQueue>,
        Arc::new(DispatchTable::<()>::new()),
        Arc::clone(&stats),
        |_| Ok(script.transport()),
    )
    .unwrap();
    submit_all(&pool, &["m1", "m2", "m3"]);
    assert!(wait_until(WAIT, || stats.in_flight.get() == 1));

    pool.stop(WAIT).unwrap();

    assert_eq!(stats.delivered.get(), 1);
    assert_eq!(stats.active_workers.get(), 0);
    let remaining: Vec<String> =
        queue.drain().iter().map(|m| m.payload_str().into_owned()).collect();
    assert_eq!(remaining, vec!["m2", "m3"]);
}

#[test]
fn try_submit_reports_full_queue() {
    init_tracing();
    let script = Script::new();
    script.on("m1", Step::action(ActionResult::Success).delayed(Duration::from_millis(300)));
    let queue = Arc::new(MemoryQueue::new(1));

    let pool = start(&script, 1, &queue);
    pool.submit(Message::new("m1")).unwrap();
    assert!(wait_until(WAIT, || script.deliveries() == vec!["m1"]));

    pool.try_submit(Message::new("m2")).unwrap();
    match pool.try_submit(Message::new("m3")) {
        Err(QueueError::Full { capacity, message }) => {
            assert_eq!(capacity, 1);
            assert_eq!(message.payload_str(), "m3");
        },
        other => panic!("expected full queue, got {other:?}"),
    }

    assert!(pool.wait_idle(WAIT));
    pool.stop(WAIT).unwrap();
    assert!(matches!(queue.push_back(Message::new("late")), Err(QueueError::Closed { .. })));
}

#[test]
fn stop_times_out_on_a_stuck_attempt() {
    init_tracing();
    let script = Script::new();
    script.on("slow", Step::action(ActionResult::Success).delayed(Duration::from_millis(800)));
    let queue = Arc::new(MemoryQueue::new(16));

    let pool = start(&script, 1, &queue);
    submit_all(&pool, &["slow"]);
    assert!(wait_until(WAIT, || !script.deliveries().is_empty()));

    let result = pool.stop(Duration::from_millis(50));
    assert!(matches!(result, Err(DeliveryError::ShutdownTimeout { .. })));
}

struct PanickingTransport;

impl Transport for PanickingTransport {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn deliver(&mut self, _message: &Message) -> Outcome {
        panic!("transport bug");
    }
}

#[test]
fn stop_reports_worker_panic() {
    init_tracing();
    let queue = Arc::new(MemoryQueue::new(16));
    let (_registry, stats) = test_stats();

    let pool = WorkerPool::start(
        fast_pool_config(1),
        Arc::clone(&queue) as Arc<dyn MessageQueue>,
        Arc::new(DispatchTable::<()>::new()),
        stats,
        |_| Ok(PanickingTransport),
    )
    .unwrap();
    pool.submit(Message::new("boom")).unwrap();
    assert!(wait_until(WAIT, || !pool.has_active_workers()));

    match pool.stop(WAIT) {
        Err(DeliveryError::WorkerPanic { worker_id, error }) => {
            assert_eq!(worker_id, 0);
            assert!(error.contains("transport bug"));
        },
        other => panic!("expected worker panic, got {other:?}"),
    }
}

#[test]
fn dropping_a_running_pool_closes_the_queue() {
    init_tracing();
    let script = Script::new();
    let queue = Arc::new(MemoryQueue::new(16));

    let pool = start(&script, 2, &queue);
    drop(pool);

    assert!(queue.is_closed());
    assert!(wait_until(WAIT, || {
        script
            .journal()
            .iter()
            .filter(|e| matches!(e, JournalEntry::ThreadDeinit { .. }))
            .count()
            == 2
    }));
}
