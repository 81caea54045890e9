//! Conversation states and the phases that move between them.

use std::fmt;

use crate::SessionEvent;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a login conversation currently stands.
///
/// ```text
///   New ──► ConversationStarted ──► SetupPending ──► SetupComplete | SetupFailed
///       ──► AuthPending  ──► Authenticated  | AuthenticationFailed
///       ──► AuthzPending ──► Authorized     | AuthorizationFailed
///       ──► CredPending  ──► Accredited     | AccreditationFailed
///       ──► OpenPending  ──► SessionOpened  | SessionOpenFailed
///       ──► StartPending ──► Running        | SessionStartFailed
///   Running ──► Exited | Died ──► Closed
/// ```
///
/// Failure states do not advance on their own; the caller retries the
/// phase, starts over with `setup`, or closes the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    New,
    ConversationStarted,
    SetupPending,
    SetupComplete,
    SetupFailed,
    AuthPending,
    Authenticated,
    AuthenticationFailed,
    AuthzPending,
    Authorized,
    AuthorizationFailed,
    CredPending,
    Accredited,
    AccreditationFailed,
    OpenPending,
    SessionOpened,
    SessionOpenFailed,
    StartPending,
    SessionStartFailed,
    Running,
    Exited,
    Died,
    Closed,
}

impl SessionState {
    /// Returns `true` for the `*Failed` states.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::SetupFailed
                | Self::AuthenticationFailed
                | Self::AuthorizationFailed
                | Self::AccreditationFailed
                | Self::SessionOpenFailed
                | Self::SessionStartFailed
        )
    }

    /// The phase awaiting completion, if this is a `*Pending` state.
    pub fn pending_phase(self) -> Option<Phase> {
        Phase::ALL.into_iter().find(|phase| phase.pending() == self)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One step of the login sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Setup,
    Authenticate,
    Authorize,
    Accredit,
    Open,
    Start,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Setup,
        Phase::Authenticate,
        Phase::Authorize,
        Phase::Accredit,
        Phase::Open,
        Phase::Start,
    ];

    /// State while the worker is busy with this phase.
    pub fn pending(self) -> SessionState {
        match self {
            Self::Setup => SessionState::SetupPending,
            Self::Authenticate => SessionState::AuthPending,
            Self::Authorize => SessionState::AuthzPending,
            Self::Accredit => SessionState::CredPending,
            Self::Open => SessionState::OpenPending,
            Self::Start => SessionState::StartPending,
        }
    }

    /// State after the phase succeeded.
    pub fn succeeded(self) -> SessionState {
        match self {
            Self::Setup => SessionState::SetupComplete,
            Self::Authenticate => SessionState::Authenticated,
            Self::Authorize => SessionState::Authorized,
            Self::Accredit => SessionState::Accredited,
            Self::Open => SessionState::SessionOpened,
            Self::Start => SessionState::Running,
        }
    }

    /// State after the phase failed.
    pub fn failed(self) -> SessionState {
        match self {
            Self::Setup => SessionState::SetupFailed,
            Self::Authenticate => SessionState::AuthenticationFailed,
            Self::Authorize => SessionState::AuthorizationFailed,
            Self::Accredit => SessionState::AccreditationFailed,
            Self::Open => SessionState::SessionOpenFailed,
            Self::Start => SessionState::SessionStartFailed,
        }
    }

    /// States from which this phase may be requested.
    ///
    /// A phase can always be retried after its own failure, and `setup`
    /// restarts the conversation after any failure.
    pub fn accepts(self, state: SessionState) -> bool {
        use SessionState as S;
        match self {
            Self::Setup => {
                matches!(state, S::ConversationStarted | S::SetupComplete) || state.is_failure()
            }
            Self::Authenticate => matches!(state, S::SetupComplete | S::AuthenticationFailed),
            Self::Authorize => matches!(state, S::Authenticated | S::AuthorizationFailed),
            Self::Accredit => matches!(state, S::Authorized | S::AccreditationFailed),
            Self::Open => matches!(state, S::Accredited | S::SessionOpenFailed),
            Self::Start => matches!(state, S::SessionOpened | S::SessionStartFailed),
        }
    }

    /// Whether the worker may prompt the user during this phase.
    pub fn allows_queries(self) -> bool {
        matches!(
            self,
            Self::Authenticate | Self::Authorize | Self::Accredit | Self::Open
        )
    }

    /// Success notification for every phase but `Start`, which carries a pid.
    pub(crate) fn success_event(self) -> Option<SessionEvent> {
        match self {
            Self::Setup => Some(SessionEvent::SetupComplete),
            Self::Authenticate => Some(SessionEvent::Authenticated),
            Self::Authorize => Some(SessionEvent::Authorized),
            Self::Accredit => Some(SessionEvent::Accredited),
            Self::Open => Some(SessionEvent::SessionOpened),
            Self::Start => None,
        }
    }

    pub(crate) fn failure_event(self, reason: String) -> SessionEvent {
        match self {
            Self::Setup => SessionEvent::SetupFailed(reason),
            Self::Authenticate => SessionEvent::AuthenticationFailed(reason),
            Self::Authorize => SessionEvent::AuthorizationFailed(reason),
            Self::Accredit => SessionEvent::AccreditationFailed(reason),
            Self::Open => SessionEvent::SessionOpenFailed(reason),
            Self::Start => SessionEvent::SessionStartFailed(reason),
        }
    }

    /// Operation name used in errors and logs.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Authenticate => "authenticate",
            Self::Authorize => "authorize",
            Self::Accredit => "accredit",
            Self::Open => "open_session",
            Self::Start => "start_session",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// What `accredit` should do with the user's credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialMode {
    /// Establish credentials for a new session.
    Establish,
    /// Refresh credentials of an existing session.
    Refresh,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_phase_round_trips_every_phase() {
        for phase in Phase::ALL {
            assert_eq!(phase.pending().pending_phase(), Some(phase));
        }
        assert_eq!(SessionState::Running.pending_phase(), None);
    }

    #[test]
    fn test_setup_accepted_after_any_failure() {
        for phase in Phase::ALL {
            assert!(Phase::Setup.accepts(phase.failed()), "{phase}");
        }
        assert!(!Phase::Setup.accepts(SessionState::New));
        assert!(!Phase::Setup.accepts(SessionState::Running));
    }

    #[test]
    fn test_phase_accepts_retry_after_own_failure() {
        for phase in Phase::ALL {
            assert!(phase.accepts(phase.failed()), "{phase}");
        }
    }

    #[test]
    fn test_authenticate_rejected_before_setup_complete() {
        assert!(!Phase::Authenticate.accepts(SessionState::ConversationStarted));
        assert!(!Phase::Authenticate.accepts(SessionState::SetupPending));
        assert!(Phase::Authenticate.accepts(SessionState::SetupComplete));
    }

    #[test]
    fn test_queries_only_in_interactive_phases() {
        assert!(!Phase::Setup.allows_queries());
        assert!(Phase::Authenticate.allows_queries());
        assert!(Phase::Open.allows_queries());
        assert!(!Phase::Start.allows_queries());
    }

    #[test]
    fn test_start_success_is_running() {
        assert_eq!(Phase::Start.succeeded(), SessionState::Running);
        assert!(Phase::Start.success_event().is_none());
    }
}
