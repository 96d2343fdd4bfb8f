// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! An in-process stand-in for the MQTT broker. Messages published while the
//! subscriber is disconnected are lost, like QoS 0 without a session.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use traitd::message::TraitItem;
use traitd::transport::{Publication, Publisher, Subscriber, TransportError};

#[derive(Debug, Default)]
struct BrokerState {
    // Bumped by drop_connections; a client whose generation is stale is
    // disconnected.
    generation: u64,
    subscriber_online: bool,
    inbox: VecDeque<Publication>,
    subscriber_connects: u32,
    publisher_connects: u32,
    published: Vec<TraitItem>,
    failing_connects: u32,
    failing_publishes: u32,
    refusal: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<(Mutex<BrokerState>, Condvar)>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber(&self) -> MemorySubscriber {
        MemorySubscriber {
            broker: self.clone(),
            generation: None,
        }
    }

    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            broker: self.clone(),
            generation: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.0.lock().unwrap()
    }

    fn update<R>(&self, f: impl FnOnce(&mut BrokerState) -> R) -> R {
        let result = f(&mut self.lock());
        self.inner.1.notify_all();
        result
    }

    fn wait_until(&self, timeout: Duration, condition: impl Fn(&BrokerState) -> bool) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap();
        let (state, _) = cvar
            .wait_timeout_while(guard, timeout, |state| !condition(state))
            .unwrap();
        condition(&state)
    }

    /// Delivers a publication to the subscriber. Returns `false` if nobody
    /// was connected to receive it.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        let publication = Publication {
            topic: topic.into(),
            payload: payload.into(),
        };
        self.update(|state| {
            if state.subscriber_online {
                state.inbox.push_back(publication);
                true
            } else {
                false
            }
        })
    }

    /// Disconnects every client and discards undelivered publications.
    pub fn drop_connections(&self) {
        self.update(|state| {
            state.generation += 1;
            state.subscriber_online = false;
            state.inbox.clear();
        });
    }

    /// The next `n` connection attempts fail transiently.
    pub fn fail_connects(&self, n: u32) {
        self.update(|state| state.failing_connects = n);
    }

    /// The next `n` publishes fail and drop the publisher's connection.
    pub fn fail_next_publishes(&self, n: u32) {
        self.update(|state| state.failing_publishes = n);
    }

    /// Every connection attempt is refused for good.
    pub fn refuse_connects(&self, reason: &str) {
        self.update(|state| state.refusal = Some(reason.to_string()));
    }

    pub fn subscriber_connects(&self) -> u32 {
        self.lock().subscriber_connects
    }

    pub fn publisher_connects(&self) -> u32 {
        self.lock().publisher_connects
    }

    pub fn published(&self) -> Vec<TraitItem> {
        self.lock().published.clone()
    }

    pub fn wait_for_subscriber(&self, connects: u32, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.subscriber_online && state.subscriber_connects >= connects
        })
    }

    pub fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.published.len() >= count)
    }

    fn connect(&self) -> Result<u64, TransportError> {
        self.update(|state| {
            if let Some(reason) = &state.refusal {
                return Err(TransportError::Config(reason.clone()));
            }
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(TransportError::Disconnected("connection refused".into()));
            }
            Ok(state.generation)
        })
    }
}

#[derive(Debug)]
pub struct MemorySubscriber {
    broker: MemoryBroker,
    generation: Option<u64>,
}

impl Subscriber for MemorySubscriber {
    fn connect(&mut self) -> Result<(), TransportError> {
        let generation = self.broker.connect()?;
        self.broker.update(|state| {
            state.subscriber_online = true;
            state.subscriber_connects += 1;
        });
        self.generation = Some(generation);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Publication>, TransportError> {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.broker.inner;
        let mut state = lock.lock().unwrap();
        loop {
            if self.generation != Some(state.generation) {
                self.generation = None;
                return Err(TransportError::Disconnected("broker closed the connection".into()));
            }
            if let Some(publication) = state.inbox.pop_front() {
                return Ok(Some(publication));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            state = cvar.wait_timeout(state, remaining).unwrap().0;
        }
    }
}

#[derive(Debug)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
    generation: Option<u64>,
}

impl Publisher for MemoryPublisher {
    fn connect(&mut self) -> Result<(), TransportError> {
        let generation = self.broker.connect()?;
        self.broker.update(|state| state.publisher_connects += 1);
        self.generation = Some(generation);
        Ok(())
    }

    fn publish(&mut self, item: &TraitItem) -> Result<(), TransportError> {
        let generation = self.generation;
        let outcome = self.broker.update(|state| {
            if generation != Some(state.generation) {
                return Err(TransportError::Disconnected("not connected".into()));
            }
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(TransportError::Disconnected("connection reset".into()));
            }
            state.published.push(item.clone());
            Ok(())
        });
        if outcome.is_err() {
            self.generation = None;
        }
        outcome
    }
}
