// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::message::Message;
use crate::queue::{Dequeued, InboundQueue};
use crate::shutdown::{deadline_after, ShutdownToken};
use crate::worker_pool::{SubmitError, WorkerPool};

/// How long a saturated submission is retried once shutdown was requested.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ShutdownRequested,
    /// The inbound queue was closed and drained.
    QueueClosed,
    /// The pool stopped accepting submissions.
    PoolClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: u64,
    /// Dequeued messages the pool never accepted.
    pub dropped: u64,
    /// Messages that had to wait for a free worker at least once.
    pub saturated: u64,
    pub stop_reason: StopReason,
}

enum Submission {
    Accepted,
    DrainExpired,
    PoolClosed,
}

/// The main loop: moves messages from the inbound queue into the pool.
#[derive(Debug)]
pub struct Dispatcher {
    queue: InboundQueue,
    pool: WorkerPool,
    poll_interval: Duration,
    drain_timeout: Duration,
    shutdown: ShutdownToken,
}

impl Dispatcher {
    pub fn new(
        queue: InboundQueue,
        pool: WorkerPool,
        poll_interval: Duration,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            queue,
            pool,
            poll_interval,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            shutdown,
        }
    }

    /// Bounds how long a message that is already dequeued keeps waiting for
    /// a free worker after shutdown was requested.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn into_pool(self) -> WorkerPool {
        self.pool
    }

    /// Runs until shutdown is requested or the inbound queue is closed and
    /// drained. Never waits for a handler to finish.
    pub fn run(&self) -> DispatchSummary {
        info!(
            "Dispatching with {} workers, polling every {:?}",
            self.pool.workers(),
            self.poll_interval
        );
        let mut dispatched = 0;
        let mut dropped = 0;
        let mut saturated = 0;

        let stop_reason = loop {
            if self.shutdown.is_cancelled() {
                break StopReason::ShutdownRequested;
            }

            let message = match self.queue.dequeue(self.poll_interval) {
                Dequeued::Item(message) => message,
                Dequeued::Timeout => continue,
                Dequeued::Closed => break StopReason::QueueClosed,
            };

            let (submission, waited) = self.submit(message);
            if waited {
                saturated += 1;
            }
            match submission {
                Submission::Accepted => dispatched += 1,
                Submission::DrainExpired => {
                    dropped += 1;
                    break StopReason::ShutdownRequested;
                }
                Submission::PoolClosed => {
                    dropped += 1;
                    break StopReason::PoolClosed;
                }
            }
        };

        info!("Dispatcher stopped ({stop_reason:?}) after {dispatched} messages");
        DispatchSummary {
            dispatched,
            dropped,
            saturated,
            stop_reason,
        }
    }

    /// Retries a saturated pool until the message is accepted. After shutdown
    /// the retries end at the drain deadline. The flag tells whether the pool
    /// was saturated at all.
    fn submit(&self, mut message: Message) -> (Submission, bool) {
        let mut waited = false;
        let mut drain_deadline = None;
        loop {
            match self.pool.submit(message) {
                Ok(()) => return (Submission::Accepted, waited),
                Err(SubmitError::Saturated(returned)) => {
                    if !waited {
                        debug!("Worker pool saturated, {returned} waits for a free worker");
                        waited = true;
                    }
                    if self.shutdown.is_cancelled() {
                        let deadline = *drain_deadline
                            .get_or_insert_with(|| deadline_after(self.drain_timeout));
                        if Instant::now() >= deadline {
                            warn!("Worker pool still saturated at shutdown, dropping {returned}");
                            return (Submission::DrainExpired, waited);
                        }
                    }
                    message = returned;
                }
                Err(SubmitError::Closed(returned)) => {
                    warn!("Worker pool closed, {returned} was not dispatched");
                    return (Submission::PoolClosed, waited);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_pool::{ClosureHandler, PoolConfig};

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    const POLL: Duration = Duration::from_millis(10);

    fn pool(workers: usize, handler: ClosureHandler) -> WorkerPool {
        let config = PoolConfig {
            workers,
            submission_capacity: 0,
            submit_timeout: Duration::from_millis(10),
        };
        WorkerPool::new(&config, Arc::new(handler)).unwrap()
    }

    #[test]
    fn empty_queue_times_out_and_observes_shutdown() {
        let shutdown = ShutdownToken::new();
        let dispatcher = Dispatcher::new(
            InboundQueue::unbounded(),
            pool(1, ClosureHandler::new("noop", |_| Ok(()))),
            POLL,
            shutdown.clone(),
        );

        let started = Instant::now();
        let summary = thread::scope(|s| {
            let running = s.spawn(|| dispatcher.run());
            thread::sleep(Duration::from_millis(50));
            shutdown.cancel();
            running.join().unwrap()
        });
        assert_eq!(summary.stop_reason, StopReason::ShutdownRequested);
        assert_eq!(summary.dispatched, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn every_message_is_handled_even_when_one_fails() {
        let handled = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let handled = handled.clone();
            ClosureHandler::new("abc", move |message: Message| {
                let payload = message.payload_str().unwrap_or_default().to_string();
                handled.lock().unwrap().push(payload.clone());
                if payload == "b" {
                    anyhow::bail!("b always fails");
                }
                Ok(())
            })
        };

        let queue = InboundQueue::unbounded();
        for payload in ["a", "b", "c"] {
            queue.enqueue(Message::new("t", payload)).unwrap();
        }
        queue.close();

        let dispatcher = Dispatcher::new(queue, pool(2, handler), POLL, ShutdownToken::new());
        let summary = dispatcher.run();
        assert_eq!(summary.stop_reason, StopReason::QueueClosed);
        assert_eq!(summary.dispatched, 3);

        let report = dispatcher.into_pool().shutdown(Duration::from_secs(5));
        assert!(report.is_complete());
        assert_eq!(report.stats.succeeded, 2);
        assert_eq!(report.stats.failed, 1);

        let mut handled = handled.lock().unwrap().clone();
        handled.sort();
        assert_eq!(handled, vec!["a", "b", "c"]);
    }

    #[test]
    fn saturated_pool_is_retried_not_dropped() {
        let handler = ClosureHandler::new("slow", |_| {
            thread::sleep(Duration::from_millis(20));
            Ok(())
        });
        let config = PoolConfig {
            workers: 1,
            submission_capacity: 1,
            submit_timeout: Duration::from_millis(1),
        };
        let pool = WorkerPool::new(&config, Arc::new(handler)).unwrap();

        let queue = InboundQueue::unbounded();
        for i in 0..5 {
            queue.enqueue(Message::new("t", format!("{i}"))).unwrap();
        }
        queue.close();

        let dispatcher = Dispatcher::new(queue, pool, POLL, ShutdownToken::new());
        let summary = dispatcher.run();
        assert_eq!(summary.dispatched, 5);
        assert_eq!(summary.dropped, 0);
        assert!(summary.saturated <= summary.dispatched);
        let report = dispatcher.into_pool().shutdown(Duration::from_secs(5));
        assert_eq!(report.stats.succeeded, 5);
    }

    #[test]
    fn closed_pool_stops_the_dispatcher() {
        let queue = InboundQueue::unbounded();
        queue.enqueue(Message::new("t", "x")).unwrap();
        let dispatcher = Dispatcher::new(
            queue,
            pool(1, ClosureHandler::new("noop", |_| Ok(()))),
            POLL,
            ShutdownToken::new(),
        );
        dispatcher.pool().close();

        let summary = dispatcher.run();
        assert_eq!(summary.stop_reason, StopReason::PoolClosed);
        assert_eq!(summary.dispatched, 0);
        assert_eq!(summary.dropped, 1);
    }

    /// One worker blocked on `gate` plus one slot in the submission queue,
    /// so the third message has to wait for a free worker.
    fn gated_pool(gate: &ShutdownToken, started: &Arc<AtomicUsize>) -> WorkerPool {
        let handler = {
            let gate = gate.clone();
            let started = started.clone();
            ClosureHandler::new("gated", move |_| {
                started.fetch_add(1, Ordering::SeqCst);
                gate.wait_timeout(Duration::from_secs(30));
                Ok(())
            })
        };
        let config = PoolConfig {
            workers: 1,
            submission_capacity: 1,
            submit_timeout: Duration::from_millis(1),
        };
        WorkerPool::new(&config, Arc::new(handler)).unwrap()
    }

    fn three_messages() -> InboundQueue {
        let queue = InboundQueue::unbounded();
        for payload in ["a", "b", "c"] {
            queue.enqueue(Message::new("t", payload)).unwrap();
        }
        queue
    }

    /// Waits until the worker is busy and the last message was dequeued,
    /// i.e. the dispatcher is retrying a saturated pool.
    fn wait_until_retrying(queue: &InboundQueue, started: &AtomicUsize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while started.load(Ordering::SeqCst) == 0 || !queue.is_empty() {
            assert!(Instant::now() < deadline, "dispatcher never saturated the pool");
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(20));
    }

    #[test]
    fn shutdown_while_saturated_still_dispatches_the_pending_message() {
        let gate = ShutdownToken::new();
        let started = Arc::new(AtomicUsize::new(0));
        let queue = three_messages();
        let shutdown = ShutdownToken::new();
        let dispatcher = Dispatcher::new(
            queue.clone(),
            gated_pool(&gate, &started),
            POLL,
            shutdown.clone(),
        )
        .with_drain_timeout(Duration::from_secs(5));

        let summary = thread::scope(|s| {
            let running = s.spawn(|| dispatcher.run());
            wait_until_retrying(&queue, &started);
            shutdown.cancel();
            thread::sleep(Duration::from_millis(50));
            gate.cancel();
            running.join().unwrap()
        });
        assert_eq!(summary.stop_reason, StopReason::ShutdownRequested);
        assert_eq!(summary.dispatched, 3);
        assert_eq!(summary.dropped, 0);
        assert!(summary.saturated >= 1);

        let report = dispatcher.into_pool().shutdown(Duration::from_secs(5));
        assert_eq!(report.stats.succeeded, 3);
    }

    #[test]
    fn saturated_message_is_counted_as_dropped_after_the_drain_timeout() {
        let gate = ShutdownToken::new();
        let started = Arc::new(AtomicUsize::new(0));
        let queue = three_messages();
        let shutdown = ShutdownToken::new();
        let dispatcher = Dispatcher::new(
            queue.clone(),
            gated_pool(&gate, &started),
            POLL,
            shutdown.clone(),
        )
        .with_drain_timeout(Duration::from_millis(20));

        let summary = thread::scope(|s| {
            let running = s.spawn(|| dispatcher.run());
            wait_until_retrying(&queue, &started);
            shutdown.cancel();
            running.join().unwrap()
        });
        assert_eq!(summary.stop_reason, StopReason::ShutdownRequested);
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.dropped, 1);

        gate.cancel();
        let report = dispatcher.into_pool().shutdown(Duration::from_secs(5));
        assert_eq!(report.stats.succeeded, 2);
    }
}
