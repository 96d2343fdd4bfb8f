// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use log::{debug, info, warn};

use crate::message::TraitItem;
use crate::queue::{Dequeued, Queue};
use crate::supervisor::{Continuation, PersistentTask, TaskError};
use crate::transport::{Publisher, TransportError};

/// Drains the trait queue into the publisher.
///
/// An item whose publish failed transiently is kept and published first
/// after the reconnect.
#[derive(Debug)]
pub struct TraitSenderTask<P: Publisher> {
    publisher: P,
    outbound: Queue<TraitItem>,
    poll_interval: Duration,
    pending: Option<TraitItem>,
}

impl<P: Publisher> TraitSenderTask<P> {
    pub fn new(publisher: P, outbound: Queue<TraitItem>, poll_interval: Duration) -> Self {
        Self {
            publisher,
            outbound,
            poll_interval,
            pending: None,
        }
    }

    /// Item waiting to be retried, if any.
    pub fn pending(&self) -> Option<&TraitItem> {
        self.pending.as_ref()
    }
}

impl<P: Publisher> PersistentTask for TraitSenderTask<P> {
    fn name(&self) -> &str {
        "trait-sender"
    }

    fn start(&mut self) -> Result<(), TaskError> {
        self.publisher.connect()?;
        match &self.pending {
            Some(item) => info!("Trait sender connected, retrying {item}"),
            None => info!("Trait sender connected"),
        }
        Ok(())
    }

    fn poll_once(&mut self) -> Result<Continuation, TaskError> {
        let item = match self.pending.take() {
            Some(item) => item,
            None => match self.outbound.dequeue(self.poll_interval) {
                Dequeued::Item(item) => item,
                Dequeued::Timeout => {
                    self.publisher.idle()?;
                    return Ok(Continuation::Continue);
                }
                Dequeued::Closed => return Ok(Continuation::Stop),
            },
        };

        match self.publisher.publish(&item) {
            Ok(()) => {
                debug!("Published {item}");
                Ok(Continuation::Continue)
            }
            Err(TransportError::Malformed(reason)) => {
                warn!("Dropping {item}: {reason}");
                Ok(Continuation::Continue)
            }
            Err(e) => {
                if e.is_transient() {
                    self.pending = Some(item);
                }
                Err(e.into())
            }
        }
    }
}
