// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::message::Message;
use crate::queue::{Queue, QueueError};
use crate::shutdown::{deadline_after, join_until};
use crate::worker_pool::{MessageHandler, PoolConfig};

/// A rejected submission. The message is handed back.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("worker pool is closed")]
    Closed(Message),
    #[error("worker pool is saturated")]
    Saturated(Message),
}

impl SubmitError {
    pub fn into_message(self) -> Message {
        match self {
            SubmitError::Closed(message) | SubmitError::Saturated(message) => message,
        }
    }
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Handlers executing right now.
    pub active: usize,
}

impl PoolStats {
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.panicked
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    active: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
        }
    }
}

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug)]
pub struct PoolShutdown {
    pub stats: PoolStats,
    /// Workers still busy when the deadline passed.
    pub unfinished: Vec<String>,
}

impl PoolShutdown {
    pub fn is_complete(&self) -> bool {
        self.unfinished.is_empty()
    }
}

/// Fixed set of worker threads executing one handler.
#[derive(Debug)]
pub struct WorkerPool {
    submissions: Queue<Message>,
    workers: Vec<(String, JoinHandle<()>)>,
    counters: Arc<Counters>,
    submit_timeout: Duration,
    handler: Arc<dyn MessageHandler>,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig, handler: Arc<dyn MessageHandler>) -> io::Result<Self> {
        let submissions = Queue::with_capacity(config.submission_capacity);
        let counters = Arc::new(Counters::default());
        let mut workers = Vec::with_capacity(config.workers);

        for index in 0..config.workers {
            let name = format!("worker-{index}");
            let spawned = thread::Builder::new().name(name.clone()).spawn({
                let submissions = submissions.clone();
                let handler = handler.clone();
                let counters = counters.clone();
                move || worker_loop(submissions, handler, counters)
            });
            match spawned {
                Ok(handle) => workers.push((name, handle)),
                Err(e) => {
                    // Let the workers spawned so far exit.
                    submissions.close();
                    return Err(e);
                }
            }
        }
        info!(
            "Started worker pool with {} workers for {}",
            config.workers,
            handler.desc()
        );

        Ok(Self {
            submissions,
            workers,
            counters,
            submit_timeout: config.submit_timeout,
            handler,
        })
    }

    /// Hands a message to the pool without waiting for the handler.
    ///
    /// Blocks up to the configured submit timeout while the submission queue
    /// is full.
    pub fn submit(&self, message: Message) -> Result<(), SubmitError> {
        match self.submissions.enqueue_timeout(message, self.submit_timeout) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(QueueError::Full(message)) => Err(SubmitError::Saturated(message)),
            Err(QueueError::Closed(message)) => Err(SubmitError::Closed(message)),
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Submissions waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.submissions.len()
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting submissions. Queued ones are still executed.
    pub fn close(&self) {
        if self.submissions.close() {
            debug!("Worker pool for {} closed", self.handler.desc());
        }
    }

    /// Closes the pool and waits up to `timeout` for queued and running
    /// handlers to finish.
    pub fn shutdown(self, timeout: Duration) -> PoolShutdown {
        self.close();
        let queued = self.submissions.len();
        if queued > 0 {
            info!("Draining {queued} queued messages before shutdown");
        }
        let unfinished = join_until(self.workers, deadline_after(timeout));
        if !unfinished.is_empty() {
            warn!(
                "{} workers still busy after {timeout:?}, abandoning them",
                unfinished.len()
            );
        }
        PoolShutdown {
            stats: self.counters.snapshot(),
            unfinished,
        }
    }
}

fn worker_loop(
    submissions: Queue<Message>,
    handler: Arc<dyn MessageHandler>,
    counters: Arc<Counters>,
) {
    while let Some(message) = submissions.dequeue_blocking() {
        let desc = message.to_string();
        debug!("Executing {} for {desc}", handler.desc());

        counters.active.fetch_add(1, Ordering::SeqCst);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message)));
        counters.active.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(Ok(())) => {
                counters.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                error!("{} failed for {desc}: {e:#}", handler.desc());
            }
            Err(_) => {
                counters.panicked.fetch_add(1, Ordering::SeqCst);
                error!("{} panicked for {desc}", handler.desc());
            }
        }
    }
    debug!("Worker exits, submission queue closed");
}
