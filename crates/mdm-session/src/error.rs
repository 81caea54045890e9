//! Error types for the session layer.

use mdm_protocol::ProtocolError;
use mdm_transport::TransportError;
use mdm_worker::WorkerError;

use crate::SessionState;

/// Errors returned when a session refuses an operation.
///
/// An `Ok(())` from a [`Session`](crate::Session) operation only means the
/// request was accepted and sent on; how the phase ends is reported later
/// as a [`SessionEvent`](crate::SessionEvent).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session's actor task has stopped.
    #[error("session is no longer running")]
    Unavailable,

    /// `start_conversation` was called while a conversation is live.
    #[error("conversation already started")]
    AlreadyStarted,

    /// No worker (or relay peer) is connected to carry the request.
    #[error("no peer connected")]
    NotConnected,

    /// The worker could not be spawned or never connected back.
    #[error("session worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The operation is not valid from the current conversation state.
    #[error("{operation} is not valid in state {state}")]
    InvalidOperation {
        operation: &'static str,
        state: SessionState,
    },

    /// `answer_query` was called with no query outstanding.
    #[error("no query is pending")]
    NoPendingQuery,

    /// The environment was already handed to the session program.
    #[error("session environment is frozen")]
    EnvironmentFrozen,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Errors seen by the connecting side of a session channel.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The server answered the call with an error reply.
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// The channel closed before a reply arrived.
    #[error("channel closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl PeerError {
    /// Returns `true` if the server replied with the cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Remote { name, .. } if name == mdm_protocol::CANCEL_ERROR)
    }
}
