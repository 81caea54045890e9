//! The relay session: the session contract, carried across one more hop.
//!
//! A relay owns no worker. It listens on its own endpoint for a single
//! peer (typically a process running [`run_bridge`](crate::run_bridge)
//! against a real session) and:
//!
//! ```text
//!   caller ──operation──► RelaySession ──RelaySignal──► peer ──► real session
//!   caller ◄──event────── RelaySession ◄──RelayCall──── peer ◄── real session
//! ```
//!
//! Every inbound call is acknowledged immediately, queries included; the
//! answer travels back later as an `AnswerQuery` signal.

use std::path::Path;
use std::sync::Arc;

use mdm_protocol::{Codec, JsonCodec, PROTOCOL_ERROR, RelayCall, RelayFrame, RelaySignal, ReplyResult};
use mdm_transport::{Address, Connection, ConnectionId, SocketConnection};
use tokio::sync::{mpsc, oneshot};

use crate::channel::{Endpoint, Inbound, InboundRx, InboundTx, recv_opt, send_frame, spawn_reader};
use crate::contract::Operation;
use crate::conversation::Conversation;
use crate::query::QueryKind;
use crate::{
    CredentialMode, Phase, Selector, Session, SessionError, SessionEvent, SessionEvents,
    SessionState,
};

const COMMAND_CHANNEL_SIZE: usize = 32;

type Reply = oneshot::Sender<Result<(), SessionError>>;

enum RelayCommand {
    Run { op: Operation, reply: Reply },
    State { reply: oneshot::Sender<SessionState> },
}

/// Handle to a running relay session.
#[derive(Clone)]
pub struct RelaySession {
    address: Address,
    sender: mpsc::Sender<RelayCommand>,
}

impl RelaySession {
    /// Binds a fresh endpoint and starts the relay.
    ///
    /// `socket_dir` chooses a filesystem socket over the abstract
    /// namespace; only peers running as `trusted_uid` may attach.
    pub async fn bind(
        socket_dir: Option<&Path>,
        trusted_uid: u32,
    ) -> Result<(Self, SessionEvents), SessionError> {
        let address = Address::generate(socket_dir);
        let (endpoint, accepted) = Endpoint::bind(address.clone(), trusted_uid).await?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let actor = RelayActor {
            codec: JsonCodec,
            commands: command_rx,
            events: event_tx,
            conversation: Conversation::new(),
            endpoint: Some(endpoint),
            accepted: Some(accepted),
            peer: None,
            inbound_tx,
            inbound_rx,
        };
        tokio::spawn(actor.run());

        Ok((
            Self {
                address,
                sender: command_tx,
            },
            event_rx,
        ))
    }

    /// The address a peer connects to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Current conversation state as seen by the relay.
    pub async fn state(&self) -> Result<SessionState, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::State { reply: reply_tx })
            .await
            .map_err(|_| SessionError::Unavailable)?;
        reply_rx.await.map_err(|_| SessionError::Unavailable)
    }

    async fn run(&self, op: Operation) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Run { op, reply: reply_tx })
            .await
            .map_err(|_| SessionError::Unavailable)?;
        reply_rx.await.map_err(|_| SessionError::Unavailable)?
    }
}

impl Session for RelaySession {
    async fn start_conversation(&self) -> Result<(), SessionError> {
        self.run(Operation::StartConversation).await
    }

    async fn setup(&self, service: &str) -> Result<(), SessionError> {
        self.run(Operation::Setup {
            service: service.to_string(),
            user: None,
        })
        .await
    }

    async fn setup_for_user(&self, service: &str, username: &str) -> Result<(), SessionError> {
        self.run(Operation::Setup {
            service: service.to_string(),
            user: Some(username.to_string()),
        })
        .await
    }

    async fn authenticate(&self) -> Result<(), SessionError> {
        self.run(Operation::Authenticate).await
    }

    async fn authorize(&self) -> Result<(), SessionError> {
        self.run(Operation::Authorize).await
    }

    async fn accredit(&self, mode: CredentialMode) -> Result<(), SessionError> {
        self.run(Operation::Accredit(mode)).await
    }

    async fn open_session(&self) -> Result<(), SessionError> {
        self.run(Operation::OpenSession).await
    }

    async fn start_session(&self) -> Result<(), SessionError> {
        self.run(Operation::StartSession).await
    }

    async fn answer_query(&self, text: &str) -> Result<(), SessionError> {
        self.run(Operation::AnswerQuery(text.to_string())).await
    }

    async fn select(&self, selector: Selector, value: &str) -> Result<(), SessionError> {
        self.run(Operation::Select(selector, value.to_string())).await
    }

    async fn cancel(&self) -> Result<(), SessionError> {
        self.run(Operation::Cancel).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.run(Operation::Close).await
    }
}

// ---------------------------------------------------------------------------
// RelayActor
// ---------------------------------------------------------------------------

struct RelayActor {
    codec: JsonCodec,
    commands: mpsc::Receiver<RelayCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Mirrors the real session's conversation; queries need no reply
    /// handle since they were acknowledged on arrival.
    conversation: Conversation<()>,
    endpoint: Option<Endpoint>,
    accepted: Option<mpsc::UnboundedReceiver<SocketConnection>>,
    peer: Option<Arc<SocketConnection>>,
    inbound_tx: InboundTx,
    inbound_rx: InboundRx,
}

impl RelayActor {
    async fn run(mut self) {
        let address = self
            .endpoint
            .as_ref()
            .map(|e| e.address().to_string())
            .unwrap_or_default();
        tracing::info!(%address, "relay session started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RelayCommand::Run { op, reply }) => {
                        let result = self.apply(op).await;
                        let _ = reply.send(result);
                    }
                    Some(RelayCommand::State { reply }) => {
                        let _ = reply.send(self.conversation.state());
                    }
                    None => break,
                },
                accepted = recv_opt(&mut self.accepted) => match accepted {
                    Some(conn) => self.handle_accepted(conn),
                    None => self.accepted = None,
                },
                Some((id, inbound)) = self.inbound_rx.recv() => {
                    self.handle_inbound(id, inbound).await;
                }
            }
        }

        if let Some(peer) = self.peer.take() {
            let _ = peer.close().await;
        }
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.shutdown().await;
        }
        tracing::info!(%address, "relay session stopped");
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // -- operations ---------------------------------------------------------

    async fn apply(&mut self, op: Operation) -> Result<(), SessionError> {
        match op {
            Operation::StartConversation => self.send_signal(RelaySignal::StartConversation).await,
            Operation::Setup { service, user } => {
                let signal = match user {
                    Some(username) => RelaySignal::SetupForUser {
                        service_name: service,
                        username,
                    },
                    None => RelaySignal::Setup {
                        service_name: service,
                    },
                };
                self.begin_phase(Phase::Setup, signal).await
            }
            Operation::Authenticate => {
                self.begin_phase(Phase::Authenticate, RelaySignal::Authenticate)
                    .await
            }
            Operation::Authorize => self.begin_phase(Phase::Authorize, RelaySignal::Authorize).await,
            Operation::Accredit(CredentialMode::Establish) => {
                self.begin_phase(Phase::Accredit, RelaySignal::EstablishCredentials)
                    .await
            }
            Operation::Accredit(CredentialMode::Refresh) => {
                self.require_peer()?;
                let previous = self.conversation.begin_refresh()?;
                self.send_or_restore(previous, RelaySignal::RefreshCredentials)
                    .await
            }
            Operation::OpenSession => self.begin_phase(Phase::Open, RelaySignal::OpenSession).await,
            Operation::StartSession => self.begin_phase(Phase::Start, RelaySignal::StartSession).await,
            Operation::AnswerQuery(text) => {
                self.require_peer()?;
                self.conversation
                    .take_query()
                    .ok_or(SessionError::NoPendingQuery)?;
                self.send_signal(RelaySignal::AnswerQuery { text }).await
            }
            Operation::Select(selector, name) => {
                let signal = match selector {
                    Selector::User => RelaySignal::UserSelected { name },
                    Selector::Session => RelaySignal::SessionSelected { name },
                    Selector::Language => RelaySignal::LanguageSelected { name },
                    Selector::Layout => RelaySignal::LayoutSelected { name },
                };
                self.send_signal(signal).await
            }
            Operation::Cancel => {
                if self.conversation.take_query().is_some() {
                    self.send_signal(RelaySignal::Cancelled).await?;
                }
                Ok(())
            }
            Operation::Close => {
                if self.peer.is_some() {
                    if let Err(e) = self.send_signal(RelaySignal::Close).await {
                        tracing::debug!(error = %e, "failed to forward close");
                    }
                }
                if self.conversation.close() {
                    self.emit(SessionEvent::Closed);
                }
                Ok(())
            }
        }
    }

    async fn begin_phase(&mut self, phase: Phase, signal: RelaySignal) -> Result<(), SessionError> {
        self.require_peer()?;
        let previous = self.conversation.begin(phase)?;
        self.send_or_restore(previous, signal).await
    }

    async fn send_or_restore(
        &mut self,
        previous: SessionState,
        signal: RelaySignal,
    ) -> Result<(), SessionError> {
        if let Err(e) = self.send_signal(signal).await {
            self.conversation.restore(previous);
            return Err(e);
        }
        Ok(())
    }

    fn require_peer(&self) -> Result<(), SessionError> {
        if self.peer.is_none() {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    async fn send_signal(&self, signal: RelaySignal) -> Result<(), SessionError> {
        let peer = self.peer.as_ref().ok_or(SessionError::NotConnected)?;
        send_frame(peer, &self.codec, &RelayFrame::Signal { signal }).await
    }

    async fn reply(&self, serial: u32, result: ReplyResult) {
        let Some(peer) = &self.peer else {
            return;
        };
        let frame = RelayFrame::Reply {
            reply_to: serial,
            result,
        };
        if let Err(e) = send_frame(peer, &self.codec, &frame).await {
            tracing::warn!(serial, error = %e, "failed to reply to relay peer");
        }
    }

    // -- peer ---------------------------------------------------------------

    fn handle_accepted(&mut self, conn: SocketConnection) {
        if self.peer.is_some() {
            tracing::warn!(id = %conn.id(), "relay already has a peer, dropping connection");
            return;
        }
        tracing::info!(id = %conn.id(), pid = ?conn.peer().pid, "relay peer connected");
        let conn = Arc::new(conn);
        spawn_reader(Arc::clone(&conn), self.inbound_tx.clone());
        self.peer = Some(conn);
        self.emit(SessionEvent::Connected);
    }

    async fn handle_inbound(&mut self, id: ConnectionId, inbound: Inbound) {
        if self.peer.as_ref().map(|peer| peer.id()) != Some(id) {
            return;
        }
        match inbound {
            Inbound::Closed => {
                tracing::info!(%id, "relay peer disconnected");
                self.peer = None;
                self.conversation.restart();
                self.emit(SessionEvent::Disconnected);
            }
            Inbound::Frame(data) => match self.codec.decode::<RelayFrame>(&data) {
                Ok(RelayFrame::Call { serial, call }) => self.handle_call(serial, call).await,
                Ok(_) => tracing::warn!(%id, "protocol violation: relay peer sent a non-call frame"),
                Err(e) => tracing::warn!(%id, error = %e, "protocol violation: undecodable frame"),
            },
        }
    }

    async fn handle_call(&mut self, serial: u32, call: RelayCall) {
        let method = call.name();
        tracing::debug!(method, serial, "relay call");

        let outcome = match call {
            RelayCall::ConversationStarted => {
                self.conversation.connected();
                Ok(Some(SessionEvent::ConversationStarted))
            }
            RelayCall::SetupComplete => self.finish(Phase::Setup, Ok(())),
            RelayCall::SetupFailed { message } => self.finish(Phase::Setup, Err(message)),
            RelayCall::ResetComplete => self
                .conversation
                .reset()
                .map(|_| Some(SessionEvent::ResetComplete))
                .map_err(|state| unexpected(method, state)),
            RelayCall::ResetFailed { message } => self
                .conversation
                .check_resettable()
                .map(|()| Some(SessionEvent::ResetFailed(message)))
                .map_err(|state| unexpected(method, state)),
            RelayCall::Authenticated => self.finish(Phase::Authenticate, Ok(())),
            RelayCall::AuthenticationFailed { message } => {
                self.finish(Phase::Authenticate, Err(message))
            }
            RelayCall::Authorized => self.finish(Phase::Authorize, Ok(())),
            RelayCall::AuthorizationFailed { message } => {
                self.finish(Phase::Authorize, Err(message))
            }
            RelayCall::Accredited => self.finish(Phase::Accredit, Ok(())),
            RelayCall::AccreditationFailed { message } => {
                self.finish(Phase::Accredit, Err(message))
            }
            RelayCall::SessionOpened => self.finish(Phase::Open, Ok(())),
            RelayCall::SessionOpenFailed { message } => self.finish(Phase::Open, Err(message)),
            RelayCall::SessionStarted { pid } => self
                .finish(Phase::Start, Ok(()))
                .map(|_| Some(SessionEvent::SessionStarted { pid })),
            RelayCall::SessionStartFailed { message } => self.finish(Phase::Start, Err(message)),
            RelayCall::SessionExited { code } => self
                .conversation
                .end_session(SessionState::Exited)
                .map(|()| Some(SessionEvent::SessionExited { code }))
                .map_err(|state| unexpected(method, state)),
            RelayCall::SessionDied { signal } => self
                .conversation
                .end_session(SessionState::Died)
                .map(|()| Some(SessionEvent::SessionDied { signal }))
                .map_err(|state| unexpected(method, state)),
            RelayCall::SessionStopped => Ok(None),
            RelayCall::WorkerExited { code } => {
                self.conversation.take_query();
                Ok(Some(SessionEvent::WorkerExited { code }))
            }
            RelayCall::WorkerDied { signal } => {
                self.conversation.take_query();
                Ok(Some(SessionEvent::WorkerDied { signal }))
            }
            RelayCall::InfoQuery { text } => self.park(QueryKind::Info, text),
            RelayCall::SecretInfoQuery { text } => self.park(QueryKind::Secret, text),
            RelayCall::Info { text } => Ok(Some(SessionEvent::Info(text))),
            RelayCall::Problem { text } => Ok(Some(SessionEvent::Problem(text))),
            RelayCall::SelectedUserChanged { username } => {
                Ok(Some(SessionEvent::SelectedUserChanged(username)))
            }
            RelayCall::DefaultLanguageNameChanged { name } => {
                Ok(Some(SessionEvent::DefaultLanguageNameChanged(name)))
            }
            RelayCall::DefaultLayoutNameChanged { name } => {
                Ok(Some(SessionEvent::DefaultLayoutNameChanged(name)))
            }
            RelayCall::DefaultSessionNameChanged { name } => {
                Ok(Some(SessionEvent::DefaultSessionNameChanged(name)))
            }
        };

        match outcome {
            Ok(event) => {
                self.reply(serial, ReplyResult::ack()).await;
                if let Some(event) = event {
                    self.emit(event);
                }
            }
            Err(message) => {
                tracing::warn!(method, %message, "protocol violation: relay call refused");
                self.reply(serial, ReplyResult::error(PROTOCOL_ERROR, message))
                    .await;
            }
        }
    }

    fn finish(
        &mut self,
        phase: Phase,
        outcome: Result<(), String>,
    ) -> Result<Option<SessionEvent>, String> {
        self.conversation
            .finish(phase, outcome.is_ok())
            .map_err(|state| format!("{phase} completion not expected in state {state}"))?;
        Ok(match outcome {
            Ok(()) => phase.success_event(),
            Err(reason) => Some(phase.failure_event(reason)),
        })
    }

    fn park(&mut self, kind: QueryKind, text: String) -> Result<Option<SessionEvent>, String> {
        self.conversation
            .park(kind, &text, ())
            .map_err(|rejection| rejection.to_string())?;
        Ok(Some(match kind {
            QueryKind::Info => SessionEvent::InfoQuery(text),
            QueryKind::Secret => SessionEvent::SecretInfoQuery(text),
        }))
    }
}

fn unexpected(method: &str, state: SessionState) -> String {
    format!("{method} not expected in state {state}")
}
