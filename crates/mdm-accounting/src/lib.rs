//! Login accounting for mdm sessions.
//!
//! ```text
//!   session events ──► record_login / record_logout / record_failed_attempt
//!                                   │
//!                           dyn AccountingSink
//!                          ┌────────┴─────────┐
//!                       LogSink          UtmpxSink (glibc)
//!                     (tracing)      utmp + wtmp / btmp
//! ```
//!
//! The `record_*` helpers never fail: a broken login database must not
//! break a session, so write errors are logged and dropped.

mod error;
mod record;
mod sink;
#[cfg(all(target_os = "linux", target_env = "gnu"))]
mod utmpx;

pub use error::AccountingError;
pub use record::{LoginRecord, RecordKind};
pub use sink::{AccountingSink, LogSink};
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub use utmpx::{BTMP_PATH, UtmpxSink, WTMP_PATH};

/// Records a successful login.
pub fn record_login(sink: &dyn AccountingSink, record: &LoginRecord) {
    write(sink, RecordKind::Login, record);
}

/// Records the end of a session.
pub fn record_logout(sink: &dyn AccountingSink, record: &LoginRecord) {
    write(sink, RecordKind::Logout, record);
}

/// Records a failed authentication attempt.
pub fn record_failed_attempt(sink: &dyn AccountingSink, record: &LoginRecord) {
    write(sink, RecordKind::FailedAttempt, record);
}

fn write(sink: &dyn AccountingSink, kind: RecordKind, record: &LoginRecord) {
    if let Err(e) = sink.write(kind, record) {
        tracing::warn!(%kind, error = %e, "failed to write accounting record");
    }
}
