//! The state machine shared by direct and relay sessions.
//!
//! [`Conversation`] decides which operations may start a phase, which
//! inbound completions are expected, and whether a query may be parked.
//! It does no I/O; the session actors consult it before sending and
//! after receiving.

use std::fmt;

use crate::query::{PendingQuery, QueryKind};
use crate::{Phase, SessionError, SessionState};

/// Why a query could not be parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryRejection {
    /// No interactive phase is in flight.
    OutOfPhase(SessionState),
    /// Another query is still waiting for its answer.
    AlreadyPending,
}

impl fmt::Display for QueryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfPhase(state) => write!(f, "query not expected in state {state}"),
            Self::AlreadyPending => write!(f, "a query is already pending"),
        }
    }
}

pub(crate) struct Conversation<R> {
    state: SessionState,
    /// Set between `SessionStarted` and the session's end. Survives a
    /// credential refresh, which passes through `CredPending`.
    running: bool,
    /// State to return to when a refresh succeeds.
    resume: Option<SessionState>,
    query: Option<PendingQuery<R>>,
}

impl<R> Conversation<R> {
    pub fn new() -> Self {
        Self {
            state: SessionState::New,
            running: false,
            resume: None,
            query: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending_phase(&self) -> Option<Phase> {
        self.state.pending_phase()
    }

    pub fn pending_query(&self) -> Option<&PendingQuery<R>> {
        self.query.as_ref()
    }

    /// Back to `New` for a fresh conversation.
    pub fn restart(&mut self) {
        *self = Self::new();
    }

    /// The peer is connected and ready for `setup`.
    pub fn connected(&mut self) {
        self.state = SessionState::ConversationStarted;
        self.running = false;
        self.resume = None;
        self.query = None;
    }

    /// Enters the pending state of `phase`, returning the state it left.
    pub fn begin(&mut self, phase: Phase) -> Result<SessionState, SessionError> {
        if !phase.accepts(self.state) {
            return Err(SessionError::InvalidOperation {
                operation: phase.operation(),
                state: self.state,
            });
        }
        let previous = self.state;
        self.state = phase.pending();
        self.resume = None;
        Ok(previous)
    }

    /// Like `begin(Phase::Accredit)`, but also accepted once credentials
    /// exist. A successful refresh returns to the state it started from.
    pub fn begin_refresh(&mut self) -> Result<SessionState, SessionError> {
        let established = matches!(
            self.state,
            SessionState::Accredited | SessionState::SessionOpened | SessionState::Running
        );
        if !established && !Phase::Accredit.accepts(self.state) {
            return Err(SessionError::InvalidOperation {
                operation: "refresh_credentials",
                state: self.state,
            });
        }
        let previous = self.state;
        self.state = SessionState::CredPending;
        self.resume = established.then_some(previous);
        Ok(previous)
    }

    /// Undoes a `begin` whose request never left.
    pub fn restore(&mut self, previous: SessionState) {
        self.state = previous;
        self.resume = None;
    }

    /// Resolves `phase`. Fails with the current state when `phase` is not
    /// the one in flight; otherwise returns a query left unanswered by the
    /// finished phase.
    pub fn finish(
        &mut self,
        phase: Phase,
        succeeded: bool,
    ) -> Result<Option<PendingQuery<R>>, SessionState> {
        if self.state != phase.pending() {
            return Err(self.state);
        }
        let resume = self.resume.take();
        self.state = match (succeeded, resume) {
            (true, Some(resume)) => resume,
            (true, None) => phase.succeeded(),
            (false, _) => phase.failed(),
        };
        if phase == Phase::Start && succeeded {
            self.running = true;
        }
        Ok(self.query.take())
    }

    /// The worker reset the conversation back to before `setup`.
    pub fn reset(&mut self) -> Result<Option<PendingQuery<R>>, SessionState> {
        self.check_resettable()?;
        self.state = SessionState::ConversationStarted;
        self.resume = None;
        Ok(self.query.take())
    }

    /// A reset attempt that failed leaves the state alone but must still
    /// come from a live, not-yet-running conversation.
    pub fn check_resettable(&self) -> Result<(), SessionState> {
        match self.state {
            SessionState::New | SessionState::Closed => Err(self.state),
            _ if self.running => Err(self.state),
            _ => Ok(()),
        }
    }

    /// Ends a running session with `Exited` or `Died`.
    pub fn end_session(&mut self, end: SessionState) -> Result<(), SessionState> {
        if !self.running {
            return Err(self.state);
        }
        self.running = false;
        self.resume = None;
        self.query = None;
        self.state = end;
        Ok(())
    }

    /// Parks a worker query until the caller answers or cancels it.
    pub fn park(&mut self, kind: QueryKind, prompt: &str, reply: R) -> Result<(), QueryRejection> {
        match self.pending_phase() {
            Some(phase) if phase.allows_queries() => {}
            _ => return Err(QueryRejection::OutOfPhase(self.state)),
        }
        if self.query.is_some() {
            return Err(QueryRejection::AlreadyPending);
        }
        self.query = Some(PendingQuery {
            reply,
            kind,
            prompt: prompt.to_string(),
        });
        Ok(())
    }

    pub fn take_query(&mut self) -> Option<PendingQuery<R>> {
        self.query.take()
    }

    /// Moves to `Closed`. Returns `false` if it already was.
    pub fn close(&mut self) -> bool {
        let was_closed = self.state == SessionState::Closed;
        self.state = SessionState::Closed;
        self.running = false;
        self.resume = None;
        self.query = None;
        !was_closed
    }
}
