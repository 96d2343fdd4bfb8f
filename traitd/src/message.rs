// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// A payload received from the transport. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: u64,
    topic: String,
    payload: Vec<u8>,
    received_at: SystemTime,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedMessage {
    #[error("message has an empty topic")]
    EmptyTopic,
    #[error("payload on {topic} has {len} bytes, limit is {limit}")]
    PayloadTooLarge {
        topic: String,
        len: usize,
        limit: usize,
    },
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
            topic: topic.into(),
            payload: payload.into(),
            received_at: SystemTime::now(),
        }
    }

    /// Validates a raw publication before it may enter the inbound queue.
    pub fn parse(
        topic: String,
        payload: Vec<u8>,
        max_payload_bytes: usize,
    ) -> Result<Self, MalformedMessage> {
        if topic.is_empty() {
            return Err(MalformedMessage::EmptyTopic);
        }
        if payload.len() > max_payload_bytes {
            return Err(MalformedMessage::PayloadTooLarge {
                topic,
                len: payload.len(),
                limit: max_payload_bytes,
            });
        }
        Ok(Self::new(topic, payload))
    }

    /// Process-unique sequence number, assigned on receipt.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message #{} on {} ({} bytes)",
            self.id,
            self.topic,
            self.payload.len()
        )
    }
}

/// Outbound trait data, published by the trait sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraitItem {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl TraitItem {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

impl fmt::Display for TraitItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trait for {} ({} bytes)", self.topic, self.payload.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A request for the remote server, executed by the server send thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRequest {
    pub method: Method,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl fmt::Display for ServerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
