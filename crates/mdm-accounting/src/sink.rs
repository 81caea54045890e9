//! Where accounting records go.

use crate::{AccountingError, LoginRecord, RecordKind};

/// A write-only destination for login records.
///
/// Implementations must not block for long: they are called from the
/// session's event loop.
pub trait AccountingSink: Send + Sync + 'static {
    /// Writes one record.
    fn write(&self, kind: RecordKind, record: &LoginRecord) -> Result<(), AccountingError>;
}

/// A sink that only logs. Used where the platform has no login database
/// or accounting is disabled in the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AccountingSink for LogSink {
    fn write(&self, kind: RecordKind, record: &LoginRecord) -> Result<(), AccountingError> {
        tracing::info!(
            %kind,
            pid = record.pid,
            user = record.username.as_deref().unwrap_or(""),
            line = %record.line(),
            host = %record.host(),
            "login accounting"
        );
        Ok(())
    }
}
