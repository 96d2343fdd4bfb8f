// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The three persistent threads of the daemon. Each one is a
//! [`PersistentTask`](crate::supervisor::PersistentTask) and owns exactly one
//! queue end:
//!
//! - `listener` feeds the inbound queue from the subscriber.
//! - `trait-sender` drains the trait queue into the publisher.
//! - `server-send-exec` drains the server queue into the remote server.

pub mod listener_task;
pub mod server_send_task;
pub mod trait_sender_task;

pub use listener_task::ListenerTask;
pub use server_send_task::ServerSendTask;
pub use trait_sender_task::TraitSenderTask;
