//! Messages on the relay channel.
//!
//! A relay peer stands in for a session on the far side of a process
//! boundary. It reports every session notification as a [`RelayCall`]
//! (all acknowledged immediately, queries included) and receives the
//! caller's operations as [`RelaySignal`]s.

use serde::{Deserialize, Serialize};

use crate::Frame;

/// A frame on the relay channel.
pub type RelayFrame = Frame<RelayCall, RelaySignal>;

/// Peer → relay method calls, one per session notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum RelayCall {
    ConversationStarted,
    SetupComplete,
    SetupFailed { message: String },
    ResetComplete,
    ResetFailed { message: String },
    Authenticated,
    AuthenticationFailed { message: String },
    Authorized,
    AuthorizationFailed { message: String },
    Accredited,
    AccreditationFailed { message: String },
    SessionOpened,
    SessionOpenFailed { message: String },
    SessionStarted { pid: i32 },
    SessionStartFailed { message: String },
    SessionExited { code: i32 },
    SessionDied { signal: i32 },
    /// Accepted for compatibility and otherwise ignored.
    SessionStopped,
    WorkerExited { code: i32 },
    WorkerDied { signal: i32 },
    InfoQuery { text: String },
    SecretInfoQuery { text: String },
    Info { text: String },
    Problem { text: String },
    SelectedUserChanged { username: Option<String> },
    DefaultLanguageNameChanged { name: String },
    DefaultLayoutNameChanged { name: String },
    DefaultSessionNameChanged { name: String },
}

impl RelayCall {
    /// The method name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConversationStarted => "ConversationStarted",
            Self::SetupComplete => "SetupComplete",
            Self::SetupFailed { .. } => "SetupFailed",
            Self::ResetComplete => "ResetComplete",
            Self::ResetFailed { .. } => "ResetFailed",
            Self::Authenticated => "Authenticated",
            Self::AuthenticationFailed { .. } => "AuthenticationFailed",
            Self::Authorized => "Authorized",
            Self::AuthorizationFailed { .. } => "AuthorizationFailed",
            Self::Accredited => "Accredited",
            Self::AccreditationFailed { .. } => "AccreditationFailed",
            Self::SessionOpened => "SessionOpened",
            Self::SessionOpenFailed { .. } => "SessionOpenFailed",
            Self::SessionStarted { .. } => "SessionStarted",
            Self::SessionStartFailed { .. } => "SessionStartFailed",
            Self::SessionExited { .. } => "SessionExited",
            Self::SessionDied { .. } => "SessionDied",
            Self::SessionStopped => "SessionStopped",
            Self::WorkerExited { .. } => "WorkerExited",
            Self::WorkerDied { .. } => "WorkerDied",
            Self::InfoQuery { .. } => "InfoQuery",
            Self::SecretInfoQuery { .. } => "SecretInfoQuery",
            Self::Info { .. } => "Info",
            Self::Problem { .. } => "Problem",
            Self::SelectedUserChanged { .. } => "SelectedUserChanged",
            Self::DefaultLanguageNameChanged { .. } => "DefaultLanguageNameChanged",
            Self::DefaultLayoutNameChanged { .. } => "DefaultLayoutNameChanged",
            Self::DefaultSessionNameChanged { .. } => "DefaultSessionNameChanged",
        }
    }
}

/// Relay → peer one-way signals, one per session operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum RelaySignal {
    StartConversation,
    Close,
    Setup { service_name: String },
    SetupForUser { service_name: String, username: String },
    Authenticate,
    Authorize,
    EstablishCredentials,
    RefreshCredentials,
    OpenSession,
    StartSession,
    AnswerQuery { text: String },
    SessionSelected { name: String },
    LanguageSelected { name: String },
    LayoutSelected { name: String },
    UserSelected { name: String },
    Cancelled,
}
