// SPDX-License-Identifier: MIT
// traitd: MQTT dispatch daemon
//
// - Listens on MQTT topics and hands every message to a bounded worker pool.
// - Publishes trait data and executes server requests from dedicated threads.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod actions;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod message;
pub mod queue;
pub mod remote;
pub mod shutdown;
pub mod supervisor;
pub mod tasks;
pub mod transport;
pub mod worker_pool;
