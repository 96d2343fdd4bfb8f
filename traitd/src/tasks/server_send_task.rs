// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use log::{debug, info, warn};

use crate::message::ServerRequest;
use crate::queue::{Dequeued, Queue};
use crate::remote::{check_status, RemoteServer, ServerError};
use crate::supervisor::{Continuation, PersistentTask, TaskError};

/// Drains the server queue into the remote server.
///
/// A request the server rejects is logged and dropped. A request that could
/// not be delivered at all is retried after the restart delay.
#[derive(Debug)]
pub struct ServerSendTask<R: RemoteServer> {
    server: R,
    outbound: Queue<ServerRequest>,
    poll_interval: Duration,
    pending: Option<ServerRequest>,
    executed: u64,
    rejected: u64,
}

impl<R: RemoteServer> ServerSendTask<R> {
    pub fn new(server: R, outbound: Queue<ServerRequest>, poll_interval: Duration) -> Self {
        Self {
            server,
            outbound,
            poll_interval,
            pending: None,
            executed: 0,
            rejected: 0,
        }
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Requests dropped because of a non-2xx answer.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn pending(&self) -> Option<&ServerRequest> {
        self.pending.as_ref()
    }
}

impl<R: RemoteServer> PersistentTask for ServerSendTask<R> {
    fn name(&self) -> &str {
        "server-send-exec"
    }

    fn start(&mut self) -> Result<(), TaskError> {
        self.server
            .connect()
            .map_err(|e| TaskError::Transient(e.to_string()))?;
        info!("Server send executor ready");
        Ok(())
    }

    fn poll_once(&mut self) -> Result<Continuation, TaskError> {
        let request = match self.pending.take() {
            Some(request) => request,
            None => match self.outbound.dequeue(self.poll_interval) {
                Dequeued::Item(request) => request,
                Dequeued::Timeout => return Ok(Continuation::Continue),
                Dequeued::Closed => return Ok(Continuation::Stop),
            },
        };

        let outcome = self
            .server
            .execute(&request)
            .and_then(|response| check_status(&request, response));
        match outcome {
            Ok(response) => {
                self.executed += 1;
                debug!("{request} answered with {}", response.status);
                Ok(Continuation::Continue)
            }
            Err(e @ ServerError::Status { .. }) => {
                self.rejected += 1;
                warn!("Dropping request: {e}");
                Ok(Continuation::Continue)
            }
            Err(e) => {
                let reason = format!("{request} failed: {e}");
                self.pending = Some(request);
                Err(TaskError::Transient(reason))
            }
        }
    }
}
