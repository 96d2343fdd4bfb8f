// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};
use nix::sys::signal::{SigSet, Signal};

/// Cooperative cancellation shared between threads.
///
/// Unlike a bare `AtomicBool`, waiting on the token can be interrupted, so a
/// thread sleeping in a backoff delay reacts to shutdown immediately.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout`. Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled
    }
}

/// `now + timeout`, saturating at a point far enough in the future to never
/// be reached.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Joins the given threads until `deadline`. Threads still running at the
/// deadline are detached and their names returned.
pub fn join_until(handles: Vec<(String, JoinHandle<()>)>, deadline: Instant) -> Vec<String> {
    let mut pending = handles;
    loop {
        let (finished, running): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|(_, h)| h.is_finished());
        for (name, handle) in finished {
            if handle.join().is_err() {
                warn!("thread {name} terminated with a panic");
            }
        }
        if running.is_empty() {
            return Vec::new();
        }
        if Instant::now() >= deadline {
            return running.into_iter().map(|(name, _)| name).collect();
        }
        pending = running;
        thread::sleep(Duration::from_millis(10));
    }
}

/// Blocks SIGINT and SIGTERM for the calling thread and every thread spawned
/// from it afterwards, then waits for them on a dedicated thread.
///
/// The first signal cancels `shutdown`. A second one exits the process
/// immediately with status 130.
///
/// Must be called before any other thread is spawned.
pub fn spawn_signal_listener(shutdown: ShutdownToken) -> anyhow::Result<JoinHandle<()>> {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block()?;

    let handle = thread::Builder::new()
        .name("signal".into())
        .spawn(move || {
            let mut received = 0;
            loop {
                match signals.wait() {
                    Ok(signal) => {
                        received += 1;
                        if received == 1 {
                            info!("Received {signal}, shutting down gracefully");
                            shutdown.cancel();
                        } else {
                            warn!("Received {signal} again, exiting immediately");
                            std::process::exit(130);
                        }
                    }
                    Err(e) => {
                        warn!("Waiting for signals failed: {e}");
                        break;
                    }
                }
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_false_on_timeout() {
        let token = ShutdownToken::new();
        let started = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_interrupts_a_long_wait() {
        let token = ShutdownToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let cancelled = token.wait_timeout(Duration::from_secs(30));
                (cancelled, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (cancelled, elapsed) = waiter.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
        assert!(token.is_cancelled());
    }

    #[test]
    fn deadline_after_saturates_instead_of_overflowing() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now() + Duration::from_secs(3600));

        let soon = deadline_after(Duration::from_millis(10));
        assert!(soon <= Instant::now() + Duration::from_millis(10));
    }

    #[test]
    fn join_until_reports_threads_that_outlive_the_deadline() {
        let stop = ShutdownToken::new();
        let quick = thread::spawn(|| {});
        let slow = {
            let stop = stop.clone();
            thread::spawn(move || {
                stop.wait_timeout(Duration::from_secs(30));
            })
        };

        let unfinished = join_until(
            vec![("quick".into(), quick), ("slow".into(), slow)],
            Instant::now() + Duration::from_millis(50),
        );
        assert_eq!(unfinished, vec!["slow".to_string()]);
        stop.cancel();
    }
}
