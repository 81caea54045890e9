//! The worker job: one supervised child process.
//!
//! ```text
//!   Stopped ──start()──► Running ──exit──► Exited(code) ─┐
//!      ▲                    │      ──signal─► Died(sig) ──┤
//!      └──────stop()────────┴─────────────stop()──────────┘
//! ```
//!
//! A watch task owns the `Child` and reports how it ended. `stop()`
//! takes the child away from the watch before terminating it, so a
//! stopped job reports neither `Exited` nor `Died` on its event stream;
//! `stop()` returns the ending instead.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::WorkerError;

/// Default grace period between SIGTERM and SIGKILL in [`WorkerJob::stop`].
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that happened to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// The child was spawned.
    Started { pid: u32 },
    /// The child exited on its own with `code`.
    Exited { code: i32 },
    /// The child was killed by `signal`.
    Died { signal: i32 },
}

/// Lifecycle state of a job.
///
/// `Exited` and `Died` persist until [`WorkerJob::stop`] or the next
/// [`WorkerJob::start`]; only `stop()` returns the job to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Stopped,
    Running { pid: u32 },
    Exited { code: i32 },
    Died { signal: i32 },
}

/// Receives the events of one `start()`.
pub type JobEvents = mpsc::UnboundedReceiver<JobEvent>;

/// Handle to the watch task of a running child.
struct Watch {
    pid: u32,
    /// Sending on (or dropping) this asks the watch task to terminate
    /// the child.
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Spawns and supervises a single worker process.
pub struct WorkerJob {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    server_address: Option<(String, String)>,
    stop_timeout: Duration,
    state: Arc<watch::Sender<JobState>>,
    watch: Option<Watch>,
}

impl WorkerJob {
    /// Creates a stopped job for `program`.
    pub fn new(program: impl AsRef<Path>) -> Self {
        let (state, _) = watch::channel(JobState::Stopped);
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: Vec::new(),
            server_address: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            state: Arc::new(state),
            watch: None,
        }
    }

    /// Appends arguments to the command line.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds or overrides one environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the variable through which the child learns the broker's
    /// endpoint address.
    pub fn server_address(mut self, variable: impl Into<String>, address: impl Into<String>) -> Self {
        self.server_address = Some((variable.into(), address.into()));
        self
    }

    /// Sets how long `stop()` waits after SIGTERM before sending SIGKILL.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Pid of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        match self.state() {
            JobState::Running { pid } => Some(pid),
            _ => None,
        }
    }

    /// Returns `true` while the child is alive and watched.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), JobState::Running { .. })
    }

    /// Spawns the child and installs the death watch.
    ///
    /// The child inherits the current environment, plus the configured
    /// variables and the server address. On Linux it is sent SIGTERM if
    /// this process dies first.
    ///
    /// # Errors
    /// [`WorkerError::AlreadyRunning`] if a previous child is still alive,
    /// [`WorkerError::Spawn`] if the program cannot be executed.
    pub fn start(&mut self) -> Result<JobEvents, WorkerError> {
        if let JobState::Running { pid } = self.state() {
            return Err(WorkerError::AlreadyRunning(pid));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some((variable, address)) = &self.server_address {
            command.env(variable, address);
        }

        set_parent_death_signal(&mut command);

        let child = command.spawn().map_err(|source| WorkerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let pid = child.id().ok_or(WorkerError::Vanished)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        self.state.send_replace(JobState::Running { pid });
        let _ = events_tx.send(JobEvent::Started { pid });
        tracing::info!(pid, program = %self.program.display(), "worker started");

        let task = tokio::spawn(watch_child(
            child,
            pid,
            events_tx,
            stop_rx,
            Arc::clone(&self.state),
            self.stop_timeout,
        ));
        self.watch = Some(Watch {
            pid,
            stop: stop_tx,
            task,
        });

        Ok(events_rx)
    }

    /// Terminates the child, waits until it is reaped and moves the job
    /// to `Stopped`.
    ///
    /// No `Exited`/`Died` event is reported for a stopped child; the
    /// ending is returned instead, whether the child was terminated here
    /// or had already ended on its own. `None` when there was no child.
    pub async fn stop(&mut self) -> Option<JobEvent> {
        if let Some(watch) = self.watch.take() {
            // Err means the child ended on its own in the meantime.
            let _ = watch.stop.send(());
            if let Err(e) = watch.task.await {
                tracing::warn!(pid = watch.pid, error = %e, "worker watch ended abnormally");
            }
            tracing::info!(pid = watch.pid, "worker stopped");
        }

        let ended = match self.state() {
            JobState::Exited { code } => Some(JobEvent::Exited { code }),
            JobState::Died { signal } => Some(JobEvent::Died { signal }),
            JobState::Stopped | JobState::Running { .. } => None,
        };
        self.state.send_replace(JobState::Stopped);
        ended
    }
}

impl Drop for WorkerJob {
    fn drop(&mut self) {
        // Dropping the stop sender makes the watch task terminate the child.
        if let Some(watch) = self.watch.take() {
            tracing::debug!(pid = watch.pid, "worker job dropped while running");
        }
    }
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal(command: &mut Command) {
    // SAFETY: the closure only issues a prctl syscall, which is
    // async-signal-safe between fork and exec.
    unsafe {
        command.pre_exec(|| {
            nix::sys::prctl::set_pdeathsig(Signal::SIGTERM).map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal(_command: &mut Command) {}

/// Owns the child until it exits or is told to stop it.
async fn watch_child(
    mut child: Child,
    pid: u32,
    events: mpsc::UnboundedSender<JobEvent>,
    stop: oneshot::Receiver<()>,
    state: Arc<watch::Sender<JobState>>,
    stop_timeout: Duration,
) {
    tokio::select! {
        status = child.wait() => {
            let (event, next) = match status {
                Ok(status) => classify(status),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to wait for worker");
                    (JobEvent::Exited { code: -1 }, JobState::Exited { code: -1 })
                }
            };
            match event {
                JobEvent::Died { signal } => tracing::info!(pid, signal, "worker died"),
                _ => tracing::info!(pid, ?event, "worker exited"),
            }
            state.send_replace(next);
            let _ = events.send(event);
        }
        _ = stop => {
            let ended = terminate(&mut child, pid, stop_timeout).await;
            state.send_replace(ended);
        }
    }
}

/// SIGTERM, bounded wait, then SIGKILL. Returns how the child ended.
async fn terminate(child: &mut Child, pid: u32, stop_timeout: Duration) -> JobState {
    let raw = match i32::try_from(pid) {
        Ok(raw) => raw,
        Err(_) => {
            let _ = child.kill().await;
            return reaped(child.try_wait());
        }
    };
    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "failed to send SIGTERM to worker"),
    }

    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(pid, %status, "worker reaped");
            classify(status).1
        }
        Ok(Err(e)) => {
            tracing::warn!(pid, error = %e, "failed to reap worker");
            JobState::Exited { code: -1 }
        }
        Err(_) => {
            tracing::warn!(pid, "worker ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(pid, error = %e, "failed to kill worker");
            }
            reaped(child.try_wait())
        }
    }
}

fn reaped(status: std::io::Result<Option<ExitStatus>>) -> JobState {
    match status {
        Ok(Some(status)) => classify(status).1,
        _ => JobState::Exited { code: -1 },
    }
}

fn classify(status: ExitStatus) -> (JobEvent, JobState) {
    if let Some(code) = status.code() {
        (JobEvent::Exited { code }, JobState::Exited { code })
    } else if let Some(signal) = status.signal() {
        (JobEvent::Died { signal }, JobState::Died { signal })
    } else {
        (JobEvent::Exited { code: -1 }, JobState::Exited { code: -1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_stopped() {
        let job = WorkerJob::new("/bin/true");
        assert_eq!(job.state(), JobState::Stopped);
        assert_eq!(job.pid(), None);
        assert!(!job.is_running());
    }

    #[test]
    fn test_classify_exit_code() {
        let status = ExitStatus::from_raw(3 << 8);
        assert_eq!(
            classify(status),
            (JobEvent::Exited { code: 3 }, JobState::Exited { code: 3 })
        );
    }

    #[test]
    fn test_classify_signal() {
        let status = ExitStatus::from_raw(9);
        assert_eq!(
            classify(status),
            (JobEvent::Died { signal: 9 }, JobState::Died { signal: 9 })
        );
    }

    #[test]
    fn test_builder_collects_args_and_env() {
        let job = WorkerJob::new("/usr/libexec/mdm-session-worker")
            .args(["--debug"])
            .env("LANG", "C")
            .server_address("MDM_SESSION_DBUS_ADDRESS", "unix:abstract=/tmp/x");
        assert_eq!(job.args, vec!["--debug".to_string()]);
        assert_eq!(job.env, vec![("LANG".to_string(), "C".to_string())]);
        assert_eq!(
            job.server_address,
            Some((
                "MDM_SESSION_DBUS_ADDRESS".to_string(),
                "unix:abstract=/tmp/x".to_string()
            ))
        );
    }
}
