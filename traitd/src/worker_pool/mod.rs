// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Bounded worker pool
//!
//! ## Overview
//! A fixed number of worker threads execute the message handler. The pool
//! bounds how many handlers run at the same time, nothing more.
//!
//! - Submissions go into one shared submission queue (bounded, configurable).
//! - Each worker takes the next submission as soon as it is idle, so
//!   handlers finish in no particular order.
//! - Handler errors and panics are caught per invocation and logged; the
//!   worker then takes the next submission.
//! - `shutdown()` closes the submission queue, lets workers drain it, and
//!   joins them with a deadline.
//!
//! ```text
//!         +--------------+
//!         |  Dispatcher  |
//!         +------+-------+
//!                | submit()
//!                v
//!      +---------+----------+
//!      |  Submission queue  |
//!      +--+------+------+---+
//!         |      |      |
//!    +----v-+ +--v---+ +v-----+
//!    |worker| |worker| |worker|  ... N
//!    +------+ +------+ +------+
//! ```

use std::time::Duration;

pub mod handler;
pub mod pool;

pub use handler::{ClosureHandler, MessageHandler};
pub use pool::{PoolShutdown, PoolStats, SubmitError, WorkerPool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads, i.e. the concurrency bound.
    pub workers: usize,
    /// Submissions that may wait for a free worker; 0 means unbounded.
    pub submission_capacity: usize,
    /// How long `submit` may block on a full submission queue.
    pub submit_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 68,
            submission_capacity: 1024,
            submit_timeout: Duration::from_secs(1),
        }
    }
}
