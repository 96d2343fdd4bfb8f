// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Publish/subscribe boundary. The dispatch core only sees these traits;
//! [`mqtt`] implements them on top of an MQTT broker.

use std::time::Duration;

use thiserror::Error;

use crate::message::TraitItem;

pub mod mqtt;

/// A raw publication as received from the broker, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    Disconnected(String),
    #[error("transport operation timed out")]
    Timeout,
    /// A single packet could not be used. The connection itself is fine.
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether reconnecting may fix the problem.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Config(_))
    }
}

/// Receiving side of the transport, owned by the listener thread.
pub trait Subscriber: Send + 'static {
    /// Connects and (re)issues all subscriptions.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Waits up to `timeout` for the next publication.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Publication>, TransportError>;
}

/// Sending side of the transport, owned by the trait sender thread.
pub trait Publisher: Send + 'static {
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Publishes one item and returns once the broker has taken it.
    fn publish(&mut self, item: &TraitItem) -> Result<(), TransportError>;

    /// Called when there was nothing to publish for a poll interval, so the
    /// connection can be kept alive.
    fn idle(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
