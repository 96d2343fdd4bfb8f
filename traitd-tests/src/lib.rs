// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use traitd::config::Config;
use traitd::supervisor::RestartPolicy;
use traitd::worker_pool::PoolConfig;

pub mod fakes;
pub mod memory_broker;

/// Configuration with short intervals, so tests finish quickly.
pub fn fast_config(workers: usize) -> Config {
    Config {
        pool: PoolConfig {
            workers,
            submission_capacity: 64,
            submit_timeout: Duration::from_millis(50),
        },
        restart: RestartPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_restarts: Some(20),
        },
        poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

/// Enables log output for a test run; repeated calls are harmless.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
