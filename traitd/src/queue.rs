// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Blocking hand-off queues
//!
//! Every hand-off between threads in traitd goes through a [`Queue`]: the
//! inbound queue between listener and dispatcher, the submission queue in
//! front of the worker pool, and the two outbound queues drained by the
//! trait sender and the server send executor.
//!
//! The queue is an `async_channel` driven from plain OS threads. Waiting with
//! a deadline is a `select` between the channel and an `async_io` timer, so a
//! consumer never blocks forever and can re-check its shutdown condition.
//!
//! Each item is handed to exactly one consumer. A closed queue still yields
//! the items that were queued before it was closed.

use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use async_io::Timer;
use futures::executor::block_on;
use futures::future::{self, Either};
use thiserror::Error;

use crate::message::Message;
use crate::shutdown::deadline_after;

/// The single queue between the listener and the dispatcher.
pub type InboundQueue = Queue<Message>;

/// Result of a bounded wait on a queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued<T> {
    Item(T),
    /// Nothing arrived in time. Not an error.
    Timeout,
    /// The queue was closed and every remaining item has been taken.
    Closed,
}

/// A rejected enqueue. The item is handed back to the caller.
#[derive(Error, PartialEq, Eq)]
pub enum QueueError<T> {
    #[error("queue is closed")]
    Closed(T),
    #[error("queue is full")]
    Full(T),
}

impl<T> QueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            QueueError::Closed(item) | QueueError::Full(item) => item,
        }
    }
}

impl<T> fmt::Debug for QueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Closed(_) => f.write_str("Closed(..)"),
            QueueError::Full(_) => f.write_str("Full(..)"),
        }
    }
}

/// Multi-producer, multi-consumer FIFO queue. Cloning yields another handle
/// to the same queue.
pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    // Signalled whenever a bounded queue frees a slot.
    space: Arc<(Mutex<()>, Condvar)>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            space: self.space.clone(),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Queue<T> {
    pub fn unbounded() -> Self {
        Self::from_channel(async_channel::unbounded())
    }

    /// # Panics
    /// If `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        Self::from_channel(async_channel::bounded(capacity))
    }

    /// Bounded queue, or unbounded when `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            Self::unbounded()
        } else {
            Self::bounded(capacity)
        }
    }

    fn from_channel((tx, rx): (Sender<T>, Receiver<T>)) -> Self {
        Self {
            tx,
            rx,
            space: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    /// Adds an item without blocking.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => QueueError::Full(item),
            TrySendError::Closed(item) => QueueError::Closed(item),
        })
    }

    /// Adds an item, waiting up to `timeout` for a free slot if the queue is
    /// bounded and full.
    pub fn enqueue_timeout(&self, item: T, timeout: Duration) -> Result<(), QueueError<T>> {
        let deadline = deadline_after(timeout);
        let (lock, cvar) = &*self.space;
        // Held across try_send and wait so a consumer cannot signal in between.
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut item = item;
        loop {
            match self.enqueue(item) {
                Ok(()) => return Ok(()),
                Err(QueueError::Full(rejected)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(QueueError::Full(rejected));
                    }
                    item = rejected;
                    guard = cvar
                        .wait_timeout(guard, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                Err(closed) => return Err(closed),
            }
        }
    }

    /// Takes the next item, waiting up to `timeout`.
    pub fn dequeue(&self, timeout: Duration) -> Dequeued<T> {
        match self.rx.try_recv() {
            Ok(item) => return self.taken(item),
            Err(TryRecvError::Closed) => return Dequeued::Closed,
            Err(TryRecvError::Empty) => {}
        }
        if timeout.is_zero() {
            return Dequeued::Timeout;
        }

        let recv = pin!(self.rx.recv());
        let timer = pin!(Timer::after(timeout));
        match block_on(future::select(recv, timer)) {
            Either::Left((Ok(item), _)) => self.taken(item),
            Either::Left((Err(_), _)) => Dequeued::Closed,
            Either::Right(_) => Dequeued::Timeout,
        }
    }

    /// Takes the next item, waiting as long as it takes. Returns `None` once
    /// the queue is closed and drained.
    pub fn dequeue_blocking(&self) -> Option<T> {
        let item = self.rx.recv_blocking().ok()?;
        self.notify_space();
        Some(item)
    }

    fn taken(&self, item: T) -> Dequeued<T> {
        self.notify_space();
        Dequeued::Item(item)
    }

    fn notify_space(&self) {
        if self.tx.capacity().is_some() {
            let (lock, cvar) = &*self.space;
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            cvar.notify_all();
        }
    }

    /// Stops accepting items. Items already queued can still be taken.
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        let closed = self.tx.close();
        // Wake producers waiting in enqueue_timeout so they observe the close.
        let (lock, cvar) = &*self.space;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        cvar.notify_all();
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// `None` for unbounded queues.
    pub fn capacity(&self) -> Option<usize> {
        self.tx.capacity()
    }
}
