//! Error types for login accounting.

/// Errors that can occur while writing a login record.
#[derive(Debug, thiserror::Error)]
pub enum AccountingError {
    /// Appending to a record file failed.
    #[error("failed to append to {path}: {source}")]
    Append {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The system login database rejected the entry.
    #[error("failed to update login database: {0}")]
    Database(#[source] std::io::Error),
}
