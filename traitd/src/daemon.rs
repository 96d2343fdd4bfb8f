// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Wires queues, persistent threads, worker pool and dispatcher together
//! and tears them down in order.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::config::Config;
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::message::{ServerRequest, TraitItem};
use crate::queue::{InboundQueue, Queue};
use crate::remote::RemoteServer;
use crate::shutdown::{deadline_after, ShutdownToken};
use crate::supervisor::{FatalFailure, Supervisor, TaskState, TaskStatus};
use crate::tasks::{ListenerTask, ServerSendTask, TraitSenderTask};
use crate::transport::{Publisher, Subscriber};
use crate::worker_pool::{MessageHandler, WorkerPool};

/// Producer handles of the two outbound queues, given to handlers.
#[derive(Debug, Clone)]
pub struct OutboundQueues {
    pub traits: Queue<TraitItem>,
    pub server: Queue<ServerRequest>,
}

impl OutboundQueues {
    /// `capacity` 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            traits: Queue::with_capacity(capacity),
            server: Queue::with_capacity(capacity),
        }
    }

    pub fn close(&self) {
        self.traits.close();
        self.server.close();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonExit {
    Clean,
    Fatal(FatalFailure),
}

impl DaemonExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonExit::Clean => 0,
            DaemonExit::Fatal(_) => 1,
        }
    }
}

/// Threads whose queues are drained before the supervisor is stopped.
const DRAINING_TASKS: [&str; 2] = ["trait-sender", "server-send-exec"];

#[derive(Debug)]
pub struct Daemon {
    inbound: InboundQueue,
    outbound: OutboundQueues,
    dispatcher: Dispatcher,
    supervisor: Supervisor,
    shutdown: ShutdownToken,
    shutdown_timeout: Duration,
}

impl Daemon {
    /// Starts the three persistent threads and the worker pool. The
    /// dispatcher runs on the caller's thread once [`Daemon::run`] is called.
    ///
    /// `shutdown` is cancelled by the caller to stop the daemon, and by the
    /// daemon itself when a persistent thread fails fatally.
    pub fn start<S, P, R>(
        config: &Config,
        subscriber: S,
        publisher: P,
        server: R,
        handler_factory: impl FnOnce(&OutboundQueues) -> Arc<dyn MessageHandler>,
        shutdown: ShutdownToken,
    ) -> io::Result<Self>
    where
        S: Subscriber,
        P: Publisher,
        R: RemoteServer,
    {
        let inbound = InboundQueue::with_capacity(config.inbound_capacity);
        let outbound = OutboundQueues::new(config.outbound_capacity);

        let pool = WorkerPool::new(&config.pool, handler_factory(&outbound))?;
        let mut supervisor = Supervisor::new(config.restart.clone(), shutdown.clone());

        let spawned = (|| -> io::Result<()> {
            supervisor.spawn(ListenerTask::new(
                subscriber,
                inbound.clone(),
                config.poll_interval,
                config.max_payload_bytes,
            ))?;
            supervisor.spawn(TraitSenderTask::new(
                publisher,
                outbound.traits.clone(),
                config.poll_interval,
            ))?;
            supervisor.spawn(ServerSendTask::new(
                server,
                outbound.server.clone(),
                config.poll_interval,
            ))?;
            Ok(())
        })();
        if let Err(e) = spawned {
            error!("Could not spawn persistent threads: {e}");
            inbound.close();
            outbound.close();
            pool.close();
            return Err(e);
        }

        let dispatcher = Dispatcher::new(
            inbound.clone(),
            pool,
            config.poll_interval,
            shutdown.clone(),
        )
        .with_drain_timeout(config.shutdown_timeout);
        Ok(Self {
            inbound,
            outbound,
            dispatcher,
            supervisor,
            shutdown,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn status(&self, task: &str) -> Option<TaskStatus> {
        self.supervisor.status(task)
    }

    /// Dispatches until shutdown, then stops everything:
    /// inbound queue, worker pool, outbound queues, persistent threads.
    pub fn run(self) -> DaemonExit {
        let DispatchSummary {
            dispatched,
            dropped,
            stop_reason,
            ..
        } = self.dispatcher.run();
        info!("Shutting down after {dispatched} messages ({stop_reason:?})");
        // Covers a dispatcher that stopped on its own.
        self.shutdown.cancel();

        self.inbound.close();
        let dropped = dropped + self.inbound.len() as u64;
        if dropped > 0 {
            warn!("{dropped} inbound messages were not dispatched");
        }

        let pool_report = self.dispatcher.into_pool().shutdown(self.shutdown_timeout);
        if !pool_report.is_complete() {
            warn!("Abandoned busy workers: {}", pool_report.unfinished.join(", "));
        }
        info!("Worker pool stopped: {:?}", pool_report.stats);

        // Handlers are done, so nothing is queued for the senders anymore.
        self.outbound.close();
        let deadline = deadline_after(self.shutdown_timeout);
        for name in DRAINING_TASKS {
            if let Some(status) = self.supervisor.status(name) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !status.wait_for_state(TaskState::Stopped, remaining) {
                    warn!("{name} did not drain its queue in time");
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let report = self.supervisor.shutdown(remaining);
        match report.fatal {
            Some(failure) => {
                error!("{failure}");
                DaemonExit::Fatal(failure)
            }
            None => {
                info!("Shutdown complete");
                DaemonExit::Clean
            }
        }
    }
}
