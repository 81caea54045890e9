//! The session contract: what a caller can ask of a session, and what it
//! hears back.
//!
//! Every operation returns as soon as the request has been accepted
//! locally. Completion arrives later on the session's event channel as a
//! success or failure notification for that phase, never both.

use std::future::Future;

use tokio::sync::mpsc;

use crate::{CredentialMode, SessionError};

/// Selector value meaning "forget the explicit choice, use the default".
pub const PREVIOUS: &str = "__previous";

/// A notification from a session to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The worker (or relay peer side) is connected; `setup` may follow.
    ConversationStarted,

    SetupComplete,
    SetupFailed(String),
    /// The worker reset the conversation to before `setup`.
    ResetComplete,
    ResetFailed(String),
    Authenticated,
    AuthenticationFailed(String),
    Authorized,
    AuthorizationFailed(String),
    Accredited,
    AccreditationFailed(String),
    SessionOpened,
    SessionOpenFailed(String),
    SessionStarted { pid: i32 },
    SessionStartFailed(String),
    SessionExited { code: i32 },
    SessionDied { signal: i32 },

    /// Message to show the user.
    Info(String),
    /// Error message to show the user.
    Problem(String),
    /// Prompt expecting one visible answer through `answer_query`.
    InfoQuery(String),
    /// Prompt expecting one hidden answer through `answer_query`.
    SecretInfoQuery(String),

    SelectedUserChanged(Option<String>),
    DefaultLanguageNameChanged(String),
    DefaultLayoutNameChanged(String),
    DefaultSessionNameChanged(String),

    /// The worker ended outside a running session.
    WorkerExited { code: i32 },
    /// The worker was killed outside a running session.
    WorkerDied { signal: i32 },

    /// A relay peer attached.
    Connected,
    /// A relay peer detached.
    Disconnected,
    /// The session was closed and its state cleared.
    Closed,
}

/// Receiving end of a session's notifications.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Which preference a selector sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    User,
    Session,
    Language,
    Layout,
}

/// A contract operation, as carried to a session actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operation {
    StartConversation,
    Setup {
        service: String,
        user: Option<String>,
    },
    Authenticate,
    Authorize,
    Accredit(CredentialMode),
    OpenSession,
    StartSession,
    AnswerQuery(String),
    Select(Selector, String),
    Cancel,
    Close,
}

/// Capabilities every session implementation provides.
///
/// Implemented by [`DirectSession`](crate::DirectSession), which drives a
/// worker process it spawned, and [`RelaySession`](crate::RelaySession),
/// which forwards the conversation to a peer across another endpoint.
pub trait Session: Send + Sync {
    /// Prepares the channel the conversation runs over.
    fn start_conversation(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Starts the setup phase for the named authentication service.
    fn setup(&self, service: &str) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Starts setup with the user already known.
    fn setup_for_user(
        &self,
        service: &str,
        username: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn authenticate(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn authorize(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn accredit(
        &self,
        mode: CredentialMode,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn open_session(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn start_session(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Answers the outstanding query.
    ///
    /// # Errors
    /// [`SessionError::NoPendingQuery`] if nothing is waiting for an answer.
    fn answer_query(&self, text: &str) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Sets one preference. [`PREVIOUS`] reverts it to the default.
    fn select(
        &self,
        selector: Selector,
        value: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn select_user(&self, username: &str) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.select(Selector::User, username)
    }

    fn select_session(&self, name: &str) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.select(Selector::Session, name)
    }

    fn select_language(&self, name: &str) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.select(Selector::Language, name)
    }

    fn select_layout(&self, name: &str) -> impl Future<Output = Result<(), SessionError>> + Send {
        self.select(Selector::Layout, name)
    }

    /// Cancels the outstanding query, if any. A no-op otherwise.
    fn cancel(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Tears the conversation down and clears all of its state.
    /// Calling it again does nothing.
    fn close(&self) -> impl Future<Output = Result<(), SessionError>> + Send;
}
