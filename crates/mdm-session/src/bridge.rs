//! Forwarding a real session to a relay.
//!
//! The bridge is the glue between the two halves of a relayed session:
//! events from the real session become calls on the relay channel, and
//! signals from the relay become operations on the real session.

use mdm_protocol::{RelayCall, RelaySignal};

use crate::peer::RelayPeer;
use crate::{CredentialMode, PeerError, Selector, Session, SessionEvent, SessionEvents};

/// Runs until either side goes away.
///
/// Operation errors on `session` and error replies from the relay are
/// logged and skipped; only losing the relay channel ends the bridge with
/// an error.
pub async fn run_bridge<S: Session>(
    session: &S,
    mut events: SessionEvents,
    relay: &RelayPeer,
) -> Result<(), PeerError> {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!("session event stream ended");
                    break;
                };
                let Some(call) = relay_call(event) else {
                    continue;
                };
                let method = call.name();
                match relay.call(call).await {
                    Ok(_) => {}
                    Err(PeerError::Remote { name, message }) => {
                        tracing::warn!(method, %name, %message, "relay refused forwarded event");
                    }
                    Err(e) => return Err(e),
                }
            }
            signal = relay.next_signal() => {
                let Some(signal) = signal else {
                    tracing::debug!("relay channel closed");
                    break;
                };
                apply_signal(session, signal).await;
            }
        }
    }
    Ok(())
}

/// The relay call announcing `event`, if the relay needs to hear of it.
pub(crate) fn relay_call(event: SessionEvent) -> Option<RelayCall> {
    Some(match event {
        SessionEvent::ConversationStarted => RelayCall::ConversationStarted,
        SessionEvent::SetupComplete => RelayCall::SetupComplete,
        SessionEvent::SetupFailed(message) => RelayCall::SetupFailed { message },
        SessionEvent::ResetComplete => RelayCall::ResetComplete,
        SessionEvent::ResetFailed(message) => RelayCall::ResetFailed { message },
        SessionEvent::Authenticated => RelayCall::Authenticated,
        SessionEvent::AuthenticationFailed(message) => RelayCall::AuthenticationFailed { message },
        SessionEvent::Authorized => RelayCall::Authorized,
        SessionEvent::AuthorizationFailed(message) => RelayCall::AuthorizationFailed { message },
        SessionEvent::Accredited => RelayCall::Accredited,
        SessionEvent::AccreditationFailed(message) => RelayCall::AccreditationFailed { message },
        SessionEvent::SessionOpened => RelayCall::SessionOpened,
        SessionEvent::SessionOpenFailed(message) => RelayCall::SessionOpenFailed { message },
        SessionEvent::SessionStarted { pid } => RelayCall::SessionStarted { pid },
        SessionEvent::SessionStartFailed(message) => RelayCall::SessionStartFailed { message },
        SessionEvent::SessionExited { code } => RelayCall::SessionExited { code },
        SessionEvent::SessionDied { signal } => RelayCall::SessionDied { signal },
        SessionEvent::Info(text) => RelayCall::Info { text },
        SessionEvent::Problem(text) => RelayCall::Problem { text },
        SessionEvent::InfoQuery(text) => RelayCall::InfoQuery { text },
        SessionEvent::SecretInfoQuery(text) => RelayCall::SecretInfoQuery { text },
        SessionEvent::SelectedUserChanged(username) => RelayCall::SelectedUserChanged { username },
        SessionEvent::DefaultLanguageNameChanged(name) => {
            RelayCall::DefaultLanguageNameChanged { name }
        }
        SessionEvent::DefaultLayoutNameChanged(name) => RelayCall::DefaultLayoutNameChanged { name },
        SessionEvent::DefaultSessionNameChanged(name) => {
            RelayCall::DefaultSessionNameChanged { name }
        }
        SessionEvent::WorkerExited { code } => RelayCall::WorkerExited { code },
        SessionEvent::WorkerDied { signal } => RelayCall::WorkerDied { signal },
        SessionEvent::Connected | SessionEvent::Disconnected | SessionEvent::Closed => {
            return None;
        }
    })
}

async fn apply_signal<S: Session>(session: &S, signal: RelaySignal) {
    let result = match &signal {
        RelaySignal::StartConversation => session.start_conversation().await,
        RelaySignal::Close => session.close().await,
        RelaySignal::Setup { service_name } => session.setup(service_name).await,
        RelaySignal::SetupForUser {
            service_name,
            username,
        } => session.setup_for_user(service_name, username).await,
        RelaySignal::Authenticate => session.authenticate().await,
        RelaySignal::Authorize => session.authorize().await,
        RelaySignal::EstablishCredentials => session.accredit(CredentialMode::Establish).await,
        RelaySignal::RefreshCredentials => session.accredit(CredentialMode::Refresh).await,
        RelaySignal::OpenSession => session.open_session().await,
        RelaySignal::StartSession => session.start_session().await,
        RelaySignal::AnswerQuery { text } => session.answer_query(text).await,
        RelaySignal::SessionSelected { name } => session.select(Selector::Session, name).await,
        RelaySignal::LanguageSelected { name } => session.select(Selector::Language, name).await,
        RelaySignal::LayoutSelected { name } => session.select(Selector::Layout, name).await,
        RelaySignal::UserSelected { name } => session.select(Selector::User, name).await,
        RelaySignal::Cancelled => session.cancel().await,
    };
    if let Err(e) = result {
        tracing::warn!(?signal, error = %e, "relayed operation failed");
    }
}
