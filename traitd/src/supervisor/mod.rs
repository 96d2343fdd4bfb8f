// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Supervised persistent threads
//!
//! ## Overview
//! Each persistent task (listener, trait sender, server send executor) runs
//! on its own named OS thread inside a supervision loop.
//!
//! - The task connects in `start()` and then loops in `poll_once()`.
//! - Transient errors and panics move the task to `Recovering`; after a
//!   backoff delay it is started again.
//! - Fatal errors and an exhausted restart budget move it to `Stopped`,
//!   are recorded, and cancel the process-wide shutdown token.
//! - `shutdown()` cancels every loop and joins the threads with a deadline.
//!
//! ```text
//!                +-------------+
//!                |  Starting   |
//!                +------+------+
//!                       | start() ok
//!                       v
//!     backoff   +-------+------+   poll_once() -> Stop / shutdown
//!   +---------->|   Running    +-----------------------------+
//!   |           +-------+------+                             |
//!   |                   | transient error / panic            v
//!   |           +-------v------+   fatal / budget spent +----+----+
//!   +-----------+  Recovering  +----------------------->| Stopped |
//!               +--------------+                        +---------+
//! ```

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::shutdown::{deadline_after, join_until, ShutdownToken};

pub mod restart_policy;
pub mod task;

pub use restart_policy::{Backoff, RestartPolicy};
pub use task::{Continuation, PersistentTask, TaskError, TaskState};

#[cfg(test)]
mod tests;

/// A persistent task that could not be kept alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalFailure {
    pub task: String,
    pub reason: String,
}

impl fmt::Display for FatalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stopped: {}", self.task, self.reason)
    }
}

#[derive(Debug)]
struct StatusCell {
    state: TaskState,
    restarts: u32,
    last_error: Option<String>,
}

/// Observable state of one supervised task.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    inner: Arc<(Mutex<StatusCell>, Condvar)>,
}

impl TaskStatus {
    fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(StatusCell {
                    state: TaskState::Starting,
                    restarts: 0,
                    last_error: None,
                }),
                Condvar::new(),
            )),
        }
    }

    fn update(&self, f: impl FnOnce(&mut StatusCell)) {
        let (lock, cvar) = &*self.inner;
        let mut cell = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut cell);
        cvar.notify_all();
    }

    fn set_state(&self, state: TaskState) {
        self.update(|cell| cell.state = state);
    }

    fn record_failure(&self, reason: &str) {
        self.update(|cell| {
            cell.state = TaskState::Recovering;
            cell.restarts += 1;
            cell.last_error = Some(reason.to_string());
        });
    }

    pub fn state(&self) -> TaskState {
        let (lock, _) = &*self.inner;
        lock.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    /// Number of times the task went through `Recovering`.
    pub fn restarts(&self) -> u32 {
        let (lock, _) = &*self.inner;
        lock.lock().unwrap_or_else(PoisonError::into_inner).restarts
    }

    pub fn last_error(&self) -> Option<String> {
        let (lock, _) = &*self.inner;
        lock.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_error
            .clone()
    }

    /// Blocks until `condition(state, restarts)` holds or `timeout` elapses.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut condition: impl FnMut(TaskState, u32) -> bool,
    ) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (cell, _) = cvar
            .wait_timeout_while(guard, timeout, |cell| !condition(cell.state, cell.restarts))
            .unwrap_or_else(PoisonError::into_inner);
        condition(cell.state, cell.restarts)
    }

    pub fn wait_for_state(&self, state: TaskState, timeout: Duration) -> bool {
        self.wait_for(timeout, |current, _| current == state)
    }
}

/// Outcome of [`Supervisor::shutdown`].
#[derive(Debug, Default)]
pub struct SupervisorReport {
    pub fatal: Option<FatalFailure>,
    /// Threads that did not finish before the deadline.
    pub unfinished: Vec<String>,
}

/// Starts persistent tasks on dedicated threads and keeps them alive.
pub struct Supervisor {
    policy: RestartPolicy,
    stop: ShutdownToken,
    process_shutdown: ShutdownToken,
    fatal: Arc<Mutex<Option<FatalFailure>>>,
    statuses: Vec<(String, TaskStatus)>,
    threads: Vec<(String, JoinHandle<()>)>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("policy", &self.policy)
            .field("tasks", &self.statuses)
            .finish()
    }
}

impl Supervisor {
    /// `process_shutdown` is cancelled when a task fails fatally.
    pub fn new(policy: RestartPolicy, process_shutdown: ShutdownToken) -> Self {
        Self {
            policy,
            stop: ShutdownToken::new(),
            process_shutdown,
            fatal: Arc::new(Mutex::new(None)),
            statuses: Vec::new(),
            threads: Vec::new(),
        }
    }

    pub fn spawn<T: PersistentTask>(&mut self, task: T) -> io::Result<TaskStatus> {
        let name = task.name().to_string();
        let status = TaskStatus::new();
        let supervision = Supervision {
            name: name.clone(),
            status: status.clone(),
            backoff: self.policy.backoff(),
            stop: self.stop.clone(),
            process_shutdown: self.process_shutdown.clone(),
            fatal: self.fatal.clone(),
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || supervision.run(task))?;
        info!("Spawned persistent thread {name}");

        self.statuses.push((name.clone(), status.clone()));
        self.threads.push((name, handle));
        Ok(status)
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.statuses
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, status)| status.clone())
    }

    /// The first fatal failure reported by any task.
    pub fn fatal(&self) -> Option<FatalFailure> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops every task and joins the threads until `timeout` elapses.
    pub fn shutdown(mut self, timeout: Duration) -> SupervisorReport {
        debug!("Stopping {} persistent threads", self.threads.len());
        self.stop.cancel();
        let threads = std::mem::take(&mut self.threads);
        let unfinished = join_until(threads, deadline_after(timeout));
        for name in &unfinished {
            warn!("Persistent thread {name} did not stop within {timeout:?}");
        }
        SupervisorReport {
            fatal: self.fatal(),
            unfinished,
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Supervision {
    name: String,
    status: TaskStatus,
    backoff: Backoff,
    stop: ShutdownToken,
    process_shutdown: ShutdownToken,
    fatal: Arc<Mutex<Option<FatalFailure>>>,
}

impl Supervision {
    fn run<T: PersistentTask>(mut self, mut task: T) {
        let mut started = false;
        while !self.stop.is_cancelled() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if started {
                    task.poll_once()
                } else {
                    task.start().map(|()| Continuation::Continue)
                }
            }));

            match outcome {
                Ok(Ok(Continuation::Continue)) => {
                    if !started {
                        started = true;
                        self.backoff.reset();
                        self.status.set_state(TaskState::Running);
                        info!("{} is running", self.name);
                    }
                }
                Ok(Ok(Continuation::Stop)) => {
                    info!("{} has nothing left to do", self.name);
                    break;
                }
                Ok(Err(TaskError::Transient(reason))) => {
                    started = false;
                    if !self.recover(&reason) {
                        break;
                    }
                }
                Ok(Err(TaskError::Fatal(reason))) => {
                    self.report_fatal(reason);
                    break;
                }
                Err(payload) => {
                    started = false;
                    let reason = format!("panicked: {}", panic_message(payload.as_ref()));
                    if !self.recover(&reason) {
                        break;
                    }
                }
            }
        }
        self.status.set_state(TaskState::Stopped);
        info!("{} stopped", self.name);
    }

    /// Waits out the next backoff delay. Returns `false` if the task must
    /// not be restarted.
    fn recover(&mut self, reason: &str) -> bool {
        self.status.record_failure(reason);
        match self.backoff.next_delay() {
            Some(delay) => {
                warn!("{} failed ({reason}), restarting in {delay:?}", self.name);
                !self.stop.wait_timeout(delay)
            }
            None => {
                self.report_fatal(format!(
                    "restart budget exhausted after {} attempts, last error: {reason}",
                    self.backoff.attempts()
                ));
                false
            }
        }
    }

    fn report_fatal(&self, reason: String) {
        error!("{} failed permanently: {reason}", self.name);
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(FatalFailure {
                task: self.name.clone(),
                reason,
            });
        }
        self.process_shutdown.cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
