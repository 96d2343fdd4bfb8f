use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

const WAIT: Duration = Duration::from_secs(5);

fn fast_policy(max_restarts: Option<u32>) -> RestartPolicy {
    RestartPolicy {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        max_restarts,
    }
}

type StartFn = Box<dyn FnMut() -> Result<(), TaskError> + Send>;
type PollFn = Box<dyn FnMut() -> Result<Continuation, TaskError> + Send>;

struct FnTask {
    name: &'static str,
    start: StartFn,
    poll: PollFn,
}

impl PersistentTask for FnTask {
    fn name(&self) -> &str {
        self.name
    }

    fn start(&mut self) -> Result<(), TaskError> {
        (self.start)()
    }

    fn poll_once(&mut self) -> Result<Continuation, TaskError> {
        (self.poll)()
    }
}

fn idle_poll() -> PollFn {
    Box::new(|| {
        thread::sleep(Duration::from_millis(2));
        Ok(Continuation::Continue)
    })
}

#[test]
fn task_runs_until_shutdown() {
    let process = ShutdownToken::new();
    let mut supervisor = Supervisor::new(fast_policy(None), process.clone());
    let status = supervisor
        .spawn(FnTask {
            name: "idle",
            start: Box::new(|| Ok(())),
            poll: idle_poll(),
        })
        .unwrap();

    assert!(status.wait_for_state(TaskState::Running, WAIT));
    assert_eq!(supervisor.status("idle").unwrap().state(), TaskState::Running);

    let report = supervisor.shutdown(WAIT);
    assert!(report.unfinished.is_empty());
    assert_eq!(report.fatal, None);
    assert_eq!(status.state(), TaskState::Stopped);
    assert!(!process.is_cancelled());
}

#[test]
fn transient_start_failures_are_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let mut supervisor = Supervisor::new(fast_policy(None), ShutdownToken::new());
    let status = {
        let attempts = attempts.clone();
        supervisor
            .spawn(FnTask {
                name: "flaky-connect",
                start: Box::new(move || {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TaskError::Transient("broker unreachable".into()))
                    } else {
                        Ok(())
                    }
                }),
                poll: idle_poll(),
            })
            .unwrap()
    };

    assert!(status.wait_for(WAIT, |state, restarts| {
        state == TaskState::Running && restarts == 2
    }));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(status.last_error().as_deref(), Some("broker unreachable"));
    supervisor.shutdown(WAIT);
}

#[test]
fn panicking_task_is_restarted() {
    let starts = Arc::new(AtomicU32::new(0));
    let polls = Arc::new(AtomicU32::new(0));
    let mut supervisor = Supervisor::new(fast_policy(None), ShutdownToken::new());
    let status = {
        let starts = starts.clone();
        let polls = polls.clone();
        supervisor
            .spawn(FnTask {
                name: "panicky",
                start: Box::new(move || {
                    starts.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                poll: Box::new(move || {
                    if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("intentional test panic");
                    }
                    thread::sleep(Duration::from_millis(2));
                    Ok(Continuation::Continue)
                }),
            })
            .unwrap()
    };

    assert!(status.wait_for(WAIT, |state, restarts| {
        state == TaskState::Running && restarts == 1
    }));
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert!(status.last_error().unwrap().contains("intentional test panic"));
    let report = supervisor.shutdown(WAIT);
    assert_eq!(report.fatal, None);
}

#[test]
fn fatal_error_stops_the_task_and_the_process() {
    let process = ShutdownToken::new();
    let mut supervisor = Supervisor::new(fast_policy(None), process.clone());
    let status = supervisor
        .spawn(FnTask {
            name: "misconfigured",
            start: Box::new(|| Err(TaskError::Fatal("bad broker address".into()))),
            poll: idle_poll(),
        })
        .unwrap();

    assert!(status.wait_for_state(TaskState::Stopped, WAIT));
    assert!(process.is_cancelled());
    assert_eq!(
        supervisor.fatal(),
        Some(FatalFailure {
            task: "misconfigured".into(),
            reason: "bad broker address".into(),
        })
    );
    let report = supervisor.shutdown(WAIT);
    assert!(report.fatal.is_some());
}

#[test]
fn exhausted_restart_budget_is_fatal() {
    let process = ShutdownToken::new();
    let mut supervisor = Supervisor::new(fast_policy(Some(2)), process.clone());
    let status = supervisor
        .spawn(FnTask {
            name: "never-connects",
            start: Box::new(|| Err(TaskError::Transient("connection refused".into()))),
            poll: idle_poll(),
        })
        .unwrap();

    assert!(status.wait_for_state(TaskState::Stopped, WAIT));
    let fatal = supervisor.fatal().expect("budget exhaustion must be reported");
    assert_eq!(fatal.task, "never-connects");
    assert!(fatal.reason.contains("restart budget exhausted"));
    assert!(fatal.reason.contains("connection refused"));
    assert!(process.is_cancelled());
    assert_eq!(status.restarts(), 3);
}

#[test]
fn shutdown_interrupts_a_long_backoff() {
    let policy = RestartPolicy {
        initial_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(60),
        ..fast_policy(None)
    };
    let mut supervisor = Supervisor::new(policy, ShutdownToken::new());
    let status = supervisor
        .spawn(FnTask {
            name: "sleepy",
            start: Box::new(|| Err(TaskError::Transient("down".into()))),
            poll: idle_poll(),
        })
        .unwrap();
    assert!(status.wait_for_state(TaskState::Recovering, WAIT));

    let started = Instant::now();
    let report = supervisor.shutdown(WAIT);
    assert!(report.unfinished.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(status.state(), TaskState::Stopped);
}

#[test]
fn stop_continuation_ends_the_thread_without_fatal() {
    let process = ShutdownToken::new();
    let mut supervisor = Supervisor::new(fast_policy(None), process.clone());
    let status = supervisor
        .spawn(FnTask {
            name: "drained",
            start: Box::new(|| Ok(())),
            poll: Box::new(|| Ok(Continuation::Stop)),
        })
        .unwrap();

    assert!(status.wait_for_state(TaskState::Stopped, WAIT));
    assert_eq!(supervisor.fatal(), None);
    assert!(!process.is_cancelled());
}
