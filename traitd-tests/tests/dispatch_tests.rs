// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use traitd::dispatcher::{Dispatcher, StopReason};
use traitd::message::Message;
use traitd::queue::InboundQueue;
use traitd::shutdown::ShutdownToken;
use traitd::worker_pool::{PoolConfig, WorkerPool};
use traitd_tests::fakes::RecordingHandler;
use traitd_tests::init_logging;

const POLL: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(10);

fn pool(workers: usize, handler: Arc<RecordingHandler>) -> WorkerPool {
    let config = PoolConfig {
        workers,
        submission_capacity: 0,
        submit_timeout: Duration::from_millis(50),
    };
    WorkerPool::new(&config, handler).unwrap()
}

#[test]
fn concurrent_producers_each_message_handled_exactly_once() {
    init_logging();
    let handler = Arc::new(RecordingHandler::new(Duration::ZERO));
    let queue = InboundQueue::unbounded();
    let shutdown = ShutdownToken::new();
    let dispatcher = Dispatcher::new(
        queue.clone(),
        pool(8, handler.clone()),
        POLL,
        shutdown.clone(),
    );

    thread::scope(|s| {
        let running = s.spawn(|| dispatcher.run());
        for producer in 0..4 {
            let queue = queue.clone();
            s.spawn(move || {
                for i in 0..250 {
                    queue
                        .enqueue(Message::new("load", format!("{producer}-{i}")))
                        .unwrap();
                }
            });
        }

        assert!(handler.wait_for_handled(1000, WAIT));
        shutdown.cancel();
        let summary = running.join().unwrap();
        assert_eq!(summary.dispatched, 1000);
    });

    let handled = handler.handled();
    assert_eq!(handled.len(), 1000);
    assert_eq!(handled.iter().collect::<HashSet<_>>().len(), 1000);
    dispatcher.into_pool().shutdown(WAIT);
}

#[test]
fn burst_never_exceeds_pool_capacity() {
    init_logging();
    const CAPACITY: usize = 4;
    let handler = Arc::new(RecordingHandler::new(Duration::from_millis(5)));
    let queue = InboundQueue::unbounded();
    for i in 0..CAPACITY * 10 {
        queue.enqueue(Message::new("burst", format!("{i}"))).unwrap();
    }
    queue.close();

    let dispatcher = Dispatcher::new(
        queue,
        pool(CAPACITY, handler.clone()),
        POLL,
        ShutdownToken::new(),
    );
    let summary = dispatcher.run();
    assert_eq!(summary.stop_reason, StopReason::QueueClosed);

    let report = dispatcher.into_pool().shutdown(WAIT);
    assert_eq!(report.stats.succeeded, (CAPACITY * 10) as u64);
    assert!(handler.peak() <= CAPACITY, "peak was {}", handler.peak());
}

#[test]
fn failing_message_does_not_block_the_others() {
    init_logging();
    let handler = Arc::new(
        RecordingHandler::new(Duration::from_millis(10)).failing_on("b"),
    );
    let queue = InboundQueue::unbounded();
    let shutdown = ShutdownToken::new();
    let dispatcher = Dispatcher::new(
        queue.clone(),
        pool(2, handler.clone()),
        POLL,
        shutdown.clone(),
    );

    let started = Instant::now();
    thread::scope(|s| {
        let running = s.spawn(|| dispatcher.run());
        for payload in ["a", "b", "c"] {
            queue.enqueue(Message::new("t", payload)).unwrap();
        }
        assert!(handler.wait_for_handled(3, Duration::from_secs(2)));
        shutdown.cancel();
        running.join().unwrap();
    });
    assert!(started.elapsed() < Duration::from_secs(2));

    let mut handled = handler.handled();
    handled.sort();
    assert_eq!(handled, vec!["a", "b", "c"]);

    let report = dispatcher.into_pool().shutdown(WAIT);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.succeeded, 2);
}
