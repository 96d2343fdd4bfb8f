// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use traitd::message::{Message, ServerRequest};
use traitd::remote::{RemoteServer, ServerError, ServerResponse};
use traitd::worker_pool::MessageHandler;

#[derive(Debug, Default)]
struct ServerState {
    requests: Vec<ServerRequest>,
    statuses: VecDeque<u16>,
}

/// Remote server that records every request. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingServer {
    inner: Arc<(Mutex<ServerState>, Condvar)>,
}

impl RecordingServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers the next request with `status` instead of 200.
    pub fn respond_with(&self, status: u16) {
        self.inner.0.lock().unwrap().statuses.push_back(status);
    }

    pub fn requests(&self) -> Vec<ServerRequest> {
        self.inner.0.lock().unwrap().requests.clone()
    }

    pub fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap();
        let (state, _) = cvar
            .wait_timeout_while(guard, timeout, |state| state.requests.len() < count)
            .unwrap();
        state.requests.len() >= count
    }
}

impl RemoteServer for RecordingServer {
    fn execute(&mut self, request: &ServerRequest) -> Result<ServerResponse, ServerError> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        state.requests.push(request.clone());
        let status = state.statuses.pop_front().unwrap_or(200);
        cvar.notify_all();
        Ok(ServerResponse { status, body: None })
    }
}

/// Handler that records payloads and the highest number of concurrent
/// invocations it has seen.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    delay: Duration,
    failing: HashSet<String>,
    handled: Mutex<Vec<String>>,
    handled_changed: Condvar,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Invocations with this payload are recorded and then fail.
    pub fn failing_on(mut self, payload: &str) -> Self {
        self.failing.insert(payload.to_string());
        self
    }

    pub fn handled(&self) -> Vec<String> {
        self.handled.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn wait_for_handled(&self, count: usize, timeout: Duration) -> bool {
        let guard = self.handled.lock().unwrap();
        let (handled, _) = self
            .handled_changed
            .wait_timeout_while(guard, timeout, |handled| handled.len() < count)
            .unwrap();
        handled.len() >= count
    }
}

impl MessageHandler for RecordingHandler {
    fn desc(&self) -> &str {
        "recording handler"
    }

    fn handle(&self, message: Message) -> anyhow::Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let payload = String::from_utf8_lossy(message.payload()).into_owned();
        let fails = self.failing.contains(&payload);
        self.handled.lock().unwrap().push(payload.clone());
        self.handled_changed.notify_all();

        if fails {
            anyhow::bail!("handler refuses {payload}");
        }
        Ok(())
    }
}
