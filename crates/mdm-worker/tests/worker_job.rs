//! Integration tests for `WorkerJob` using real child processes.

use std::time::Duration;

use mdm_worker::{JobEvent, JobEvents, JobState, WorkerError, WorkerJob};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Waits for the next event, failing the test if none arrives in time.
async fn next_event(events: &mut JobEvents) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event should arrive")
        .expect("event channel should stay open")
}

fn sh(script: &str) -> WorkerJob {
    WorkerJob::new("/bin/sh").args(["-c", script])
}

#[tokio::test]
async fn test_start_reports_started_then_exit_code() {
    let mut job = sh("exit 3");
    let mut events = job.start().expect("should spawn");

    let started = next_event(&mut events).await;
    assert!(matches!(started, JobEvent::Started { pid } if pid > 0));

    assert_eq!(next_event(&mut events).await, JobEvent::Exited { code: 3 });
    assert_eq!(job.state(), JobState::Exited { code: 3 });
    assert_eq!(job.pid(), None);
}

#[tokio::test]
async fn test_killed_child_reports_died_with_signal() {
    let mut job = WorkerJob::new("sleep").args(["30"]);
    let mut events = job.start().unwrap();
    let JobEvent::Started { pid } = next_event(&mut events).await else {
        panic!("first event should be Started");
    };

    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

    let sigkill = Signal::SIGKILL as i32;
    assert_eq!(next_event(&mut events).await, JobEvent::Died { signal: sigkill });
    assert_eq!(job.state(), JobState::Died { signal: sigkill });
}

#[tokio::test]
async fn test_stop_terminates_without_reporting_exit() {
    let mut job = WorkerJob::new("sleep").args(["30"]);
    let mut events = job.start().unwrap();
    assert!(matches!(next_event(&mut events).await, JobEvent::Started { .. }));
    assert!(job.is_running());

    let ended = job.stop().await;

    assert_eq!(
        ended,
        Some(JobEvent::Died {
            signal: Signal::SIGTERM as i32
        })
    );
    assert_eq!(job.state(), JobState::Stopped);
    // The watch is gone: the channel closes without an Exited/Died event.
    let rest = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("channel should close");
    assert_eq!(rest, None);
}

#[tokio::test]
async fn test_stop_escalates_to_sigkill_when_sigterm_is_ignored() {
    let mut job = sh("trap '' TERM; while :; do sleep 0.1; done")
        .stop_timeout(Duration::from_millis(200));
    let mut events = job.start().unwrap();
    assert!(matches!(next_event(&mut events).await, JobEvent::Started { .. }));
    // Give the shell time to install its trap.
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(5), job.stop())
        .await
        .expect("stop should finish after escalating");
    assert_eq!(job.state(), JobState::Stopped);
}

#[tokio::test]
async fn test_stop_on_stopped_job_is_noop() {
    let mut job = WorkerJob::new("sleep").args(["30"]);
    assert_eq!(job.stop().await, None);
    assert_eq!(job.stop().await, None);
    assert_eq!(job.state(), JobState::Stopped);
}

#[tokio::test]
async fn test_stop_after_exit_returns_to_stopped_with_the_ending() {
    let mut job = sh("exit 4");
    let mut events = job.start().unwrap();
    next_event(&mut events).await;
    assert_eq!(next_event(&mut events).await, JobEvent::Exited { code: 4 });
    assert_eq!(job.state(), JobState::Exited { code: 4 });

    let ended = job.stop().await;

    assert_eq!(ended, Some(JobEvent::Exited { code: 4 }));
    assert_eq!(job.state(), JobState::Stopped);
}

#[tokio::test]
async fn test_child_sees_server_address_variable() {
    let mut job = sh(r#"test "$MDM_SESSION_DBUS_ADDRESS" = "unix:path=/tmp/sock" && exit 0; exit 1"#)
        .server_address("MDM_SESSION_DBUS_ADDRESS", "unix:path=/tmp/sock");
    let mut events = job.start().unwrap();
    next_event(&mut events).await;
    assert_eq!(next_event(&mut events).await, JobEvent::Exited { code: 0 });
}

#[tokio::test]
async fn test_child_inherits_extra_env() {
    let mut job = sh(r#"test "$MDM_TEST_FLAVOUR" = "mint" && exit 0; exit 1"#)
        .env("MDM_TEST_FLAVOUR", "mint");
    let mut events = job.start().unwrap();
    next_event(&mut events).await;
    assert_eq!(next_event(&mut events).await, JobEvent::Exited { code: 0 });
}

#[tokio::test]
async fn test_start_missing_program_is_spawn_error() {
    let mut job = WorkerJob::new("/nonexistent/mdm-session-worker");
    let result = job.start();
    assert!(matches!(result, Err(WorkerError::Spawn { .. })));
    assert_eq!(job.state(), JobState::Stopped);
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let mut job = WorkerJob::new("sleep").args(["30"]);
    let _events = job.start().unwrap();

    let again = job.start();
    assert!(matches!(again, Err(WorkerError::AlreadyRunning(_))));

    job.stop().await;
}

#[tokio::test]
async fn test_restart_after_exit() {
    let mut job = sh("exit 0");
    let mut events = job.start().unwrap();
    next_event(&mut events).await;
    next_event(&mut events).await;

    let mut events = job.start().expect("exited job can start again");
    assert!(matches!(next_event(&mut events).await, JobEvent::Started { .. }));
    assert_eq!(next_event(&mut events).await, JobEvent::Exited { code: 0 });
}
