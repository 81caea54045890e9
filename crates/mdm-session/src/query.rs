//! Interactive prompts raised by the worker.

/// Whether the answer to a query should be echoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Visible input, e.g. a username.
    Info,
    /// Hidden input, e.g. a password.
    Secret,
}

/// The single outstanding query of a conversation.
///
/// `R` is whatever the session needs to answer it later: the serial of
/// the deferred worker call for a direct session, nothing for a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuery<R> {
    pub reply: R,
    pub kind: QueryKind,
    pub prompt: String,
}
