// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use anyhow::Context;
use log::debug;

use super::action::Action;
use crate::daemon::OutboundQueues;
use crate::message::{Message, ServerRequest, TraitItem};
use crate::worker_pool::MessageHandler;

/// Parses each payload as an [`Action`] and queues the outcome for the
/// trait sender or the server send executor.
#[derive(Debug)]
pub struct RoutingHandler {
    queues: OutboundQueues,
    enqueue_timeout: Duration,
}

impl RoutingHandler {
    /// `enqueue_timeout` bounds how long a handler waits on a full outbound
    /// queue before failing.
    pub fn new(queues: OutboundQueues, enqueue_timeout: Duration) -> Self {
        Self {
            queues,
            enqueue_timeout,
        }
    }

    fn handle_action(&self, action: Action) -> anyhow::Result<()> {
        match action {
            Action::PublishTrait {
                topic,
                payload,
                retain,
            } => {
                let item = TraitItem {
                    topic,
                    payload: payload.into_bytes(),
                    retain,
                };
                let desc = item.to_string();
                self.queues
                    .traits
                    .enqueue_timeout(item, self.enqueue_timeout)
                    .with_context(|| format!("cannot queue {desc}"))?;
                debug!("Queued {desc}");
            }
            Action::ServerRequest { method, path, body } => {
                let request = ServerRequest { method, path, body };
                let desc = request.to_string();
                self.queues
                    .server
                    .enqueue_timeout(request, self.enqueue_timeout)
                    .with_context(|| format!("cannot queue request {desc}"))?;
                debug!("Queued request {desc}");
            }
        }
        Ok(())
    }
}

impl MessageHandler for RoutingHandler {
    fn desc(&self) -> &str {
        "routing handler"
    }

    fn handle(&self, message: Message) -> anyhow::Result<()> {
        let action: Action = serde_json::from_slice(message.payload())
            .with_context(|| format!("{message} is not a routing envelope"))?;
        self.handle_action(action)
    }
}
