// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;

/// What the supervision loop should do after a successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    /// The task has nothing left to do (e.g. its queue was closed).
    Stop,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Recovered by restarting the task after a backoff delay.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Stops the task and is reported to the operator.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl From<TransportError> for TaskError {
    fn from(e: TransportError) -> Self {
        if e.is_transient() {
            TaskError::Transient(e.to_string())
        } else {
            TaskError::Fatal(e.to_string())
        }
    }
}

/// Lifecycle of a persistent thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Starting,
    Running,
    Recovering,
    Stopped,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Recovering => "recovering",
            TaskState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A long-lived loop run on its own thread under supervision.
///
/// `poll_once` must return within a bounded time so the supervisor can
/// observe shutdown between polls.
pub trait PersistentTask: Send + 'static {
    /// Thread name, also used in log lines.
    fn name(&self) -> &str;

    /// (Re)acquires the task's resources, e.g. connects and subscribes.
    /// Called once at start and again after every recovery.
    fn start(&mut self) -> Result<(), TaskError>;

    /// One iteration of the receive-or-drain loop.
    fn poll_once(&mut self) -> Result<Continuation, TaskError>;
}

impl fmt::Debug for dyn PersistentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentTask")
            .field("name", &self.name())
            .finish()
    }
}
