//! Error types for worker supervision.

/// Errors that can occur while starting a worker job.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The program could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called while the job still owns a running child.
    #[error("worker already running (pid {0})")]
    AlreadyRunning(u32),

    /// The child was reaped before its pid could be read.
    #[error("worker exited before it could be watched")]
    Vanished,
}
