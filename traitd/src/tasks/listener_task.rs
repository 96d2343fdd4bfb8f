// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use log::{debug, info, warn};

use crate::message::Message;
use crate::queue::{InboundQueue, QueueError};
use crate::supervisor::{Continuation, PersistentTask, TaskError};
use crate::transport::{Subscriber, TransportError};

/// Receives publications and pushes them into the inbound queue.
///
/// Stops once the inbound queue is closed.
#[derive(Debug)]
pub struct ListenerTask<S: Subscriber> {
    subscriber: S,
    inbound: InboundQueue,
    poll_interval: Duration,
    max_payload_bytes: usize,
    received: u64,
    dropped: u64,
}

impl<S: Subscriber> ListenerTask<S> {
    pub fn new(
        subscriber: S,
        inbound: InboundQueue,
        poll_interval: Duration,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            subscriber,
            inbound,
            poll_interval,
            max_payload_bytes,
            received: 0,
            dropped: 0,
        }
    }

    /// Messages that made it into the inbound queue.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<S: Subscriber> PersistentTask for ListenerTask<S> {
    fn name(&self) -> &str {
        "listener"
    }

    fn start(&mut self) -> Result<(), TaskError> {
        self.subscriber.connect()?;
        info!("Listener subscribed, {} messages received so far", self.received);
        Ok(())
    }

    fn poll_once(&mut self) -> Result<Continuation, TaskError> {
        if self.inbound.is_closed() {
            return Ok(Continuation::Stop);
        }

        let publication = match self.subscriber.poll(self.poll_interval) {
            Ok(Some(publication)) => publication,
            Ok(None) => return Ok(Continuation::Continue),
            Err(TransportError::Malformed(reason)) => {
                self.dropped += 1;
                warn!("Dropping malformed publication: {reason}");
                return Ok(Continuation::Continue);
            }
            Err(e) => return Err(e.into()),
        };

        let message = match Message::parse(
            publication.topic,
            publication.payload,
            self.max_payload_bytes,
        ) {
            Ok(message) => message,
            Err(e) => {
                self.dropped += 1;
                warn!("Dropping publication: {e}");
                return Ok(Continuation::Continue);
            }
        };

        debug!("Received {message}");
        match self.inbound.enqueue(message) {
            Ok(()) => {
                self.received += 1;
                Ok(Continuation::Continue)
            }
            Err(QueueError::Full(message)) => {
                self.dropped += 1;
                warn!("Inbound queue is full, dropping {message}");
                Ok(Continuation::Continue)
            }
            Err(QueueError::Closed(message)) => {
                debug!("Inbound queue closed, discarding {message}");
                Ok(Continuation::Stop)
            }
        }
    }
}
