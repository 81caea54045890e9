//! The direct session: drives a worker process it spawned itself.
//!
//! ```text
//!   DirectSession (handle) ──Command──► DirectActor ──WorkerSignal──► worker
//!          ▲                               │   ▲                        │
//!          └──────── SessionEvent ─────────┘   └──── WorkerCall ────────┘
//! ```
//!
//! `start_conversation` binds a fresh endpoint at a random address and
//! spawns the worker with that address in its environment. The first
//! trusted connection becomes the worker channel; any later one is
//! dropped. From then on the actor translates operations into worker
//! signals and worker calls into events, with [`Conversation`] deciding
//! what is valid when.
//!
//! Worker queries are the one call the actor does not answer right away:
//! the serial is parked until `answer_query` or `cancel`.

use std::sync::Arc;

use mdm_accounting::{AccountingSink, RecordKind};
use mdm_protocol::{Codec, JsonCodec, PROTOCOL_ERROR, ReplyResult, WorkerCall, WorkerFrame, WorkerSignal};
use mdm_transport::{Address, Connection, ConnectionId, SocketConnection};
use mdm_worker::{JobEvent, JobEvents, WorkerJob};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::catalog::{DesktopCatalog, SessionCatalog};
use crate::channel::{
    Endpoint, Inbound, InboundRx, InboundTx, recv_opt, send_frame, sleep_until_opt, spawn_reader,
};
use crate::contract::Operation;
use crate::conversation::Conversation;
use crate::environment::Environment;
use crate::preferences::Preferences;
use crate::query::{PendingQuery, QueryKind};
use crate::{
    CredentialMode, DisplayInfo, Phase, Selector, Session, SessionConfig, SessionError,
    SessionEvent, SessionEvents, SessionState,
};

const COMMAND_CHANNEL_SIZE: usize = 32;

type Reply = oneshot::Sender<Result<(), SessionError>>;

enum Command {
    Run {
        op: Operation,
        reply: Reply,
    },
    SetEnvironmentVariable {
        key: String,
        value: String,
        reply: Reply,
    },
    SetUserAuthorityFile {
        path: Option<String>,
        reply: Reply,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// A point-in-time view of a direct session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub running: bool,
    pub user: Option<String>,
    /// Effective session, language and layout names.
    pub session_name: String,
    pub language_name: String,
    pub layout_name: String,
    pub session_pid: Option<i32>,
    pub worker_pid: Option<u32>,
    /// Endpoint address while a conversation is live.
    pub address: Option<String>,
    pub pending_query: Option<QueryKind>,
    pub environment: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and spawns a [`DirectSession`].
pub struct DirectSessionBuilder {
    display: DisplayInfo,
    config: SessionConfig,
    catalog: Option<Arc<dyn SessionCatalog>>,
    accounting: Option<Arc<dyn AccountingSink>>,
}

impl DirectSessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Source of session commands. Defaults to a [`DesktopCatalog`] over
    /// the configured session directories.
    pub fn catalog(mut self, catalog: Arc<dyn SessionCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Records logins, logouts and failed attempts.
    pub fn accounting(mut self, sink: Arc<dyn AccountingSink>) -> Self {
        self.accounting = Some(sink);
        self
    }

    /// Spawns the session actor. Must be called inside a Tokio runtime.
    pub fn spawn(self) -> (DirectSession, SessionEvents) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let catalog = self.catalog.unwrap_or_else(|| {
            Arc::new(DesktopCatalog::new(self.config.session_dirs.iter().cloned()))
        });
        let preferences = Preferences::new(
            self.config.system_language(),
            self.config.default_layout.clone(),
        );
        let session_id: Arc<str> = Arc::from(self.display.session_id.as_str());

        let actor = DirectActor {
            display: self.display,
            config: self.config,
            catalog,
            accounting: self.accounting,
            codec: JsonCodec,
            commands: command_rx,
            events: event_tx,
            conversation: Conversation::new(),
            preferences,
            environment: Environment::default(),
            user_authority_file: None,
            session_pid: None,
            endpoint: None,
            accepted: None,
            worker: None,
            job_events: None,
            connect_deadline: None,
            connection: None,
            inbound_tx,
            inbound_rx,
        };
        tokio::spawn(actor.run());

        (
            DirectSession {
                session_id,
                sender: command_tx,
            },
            event_rx,
        )
    }
}

// ---------------------------------------------------------------------------
// DirectSession (handle)
// ---------------------------------------------------------------------------

/// Handle to a running direct session. Cheap to clone; the session ends
/// when the last handle is dropped.
#[derive(Clone)]
pub struct DirectSession {
    session_id: Arc<str>,
    sender: mpsc::Sender<Command>,
}

impl DirectSession {
    pub fn builder(display: DisplayInfo) -> DirectSessionBuilder {
        DirectSessionBuilder {
            display,
            config: SessionConfig::default(),
            catalog: None,
            accounting: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Adds a variable to the session program's environment.
    ///
    /// # Errors
    /// [`SessionError::EnvironmentFrozen`] once the program was started.
    pub async fn set_environment_variable(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.request(|reply| Command::SetEnvironmentVariable { key, value, reply })
            .await
    }

    /// Sets the X authority file the session program will use.
    pub async fn set_user_authority_file(&self, path: Option<&str>) -> Result<(), SessionError> {
        let path = path.map(str::to_string);
        self.request(|reply| Command::SetUserAuthorityFile { path, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(Command::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| SessionError::Unavailable)?;
        reply_rx.await.map_err(|_| SessionError::Unavailable)
    }

    async fn run(&self, op: Operation) -> Result<(), SessionError> {
        self.request(|reply| Command::Run { op, reply }).await
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| SessionError::Unavailable)?;
        reply_rx.await.map_err(|_| SessionError::Unavailable)?
    }
}

impl Session for DirectSession {
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
// DirectActor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum WorkerEnd {
    Exited(i32),
    Died(i32),
}

struct DirectActor {
    display: DisplayInfo,
    config: SessionConfig,
    catalog: Arc<dyn SessionCatalog>,
    accounting: Option<Arc<dyn AccountingSink>>,
    codec: JsonCodec,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,

    conversation: Conversation<u32>,
    preferences: Preferences,
    environment: Environment,
    user_authority_file: Option<String>,
    session_pid: Option<i32>,

    endpoint: Option<Endpoint>,
    accepted: Option<mpsc::UnboundedReceiver<SocketConnection>>,
    worker: Option<WorkerJob>,
    job_events: Option<JobEvents>,
    /// Set while waiting for the spawned worker to connect back.
    connect_deadline: Option<Instant>,
    connection: Option<Arc<SocketConnection>>,
    inbound_tx: InboundTx,
    inbound_rx: InboundRx,
}

impl DirectActor {
    async fn run(mut self) {
        tracing::info!(session_id = %self.display.session_id, "direct session started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                accepted = recv_opt(&mut self.accepted) => match accepted {
                    Some(conn) => self.handle_accepted(conn).await,
                    None => self.accepted = None,
                },
                Some((id, inbound)) = self.inbound_rx.recv() => {
                    self.handle_inbound(id, inbound).await;
                }
                event = recv_opt(&mut self.job_events) => match event {
                    Some(event) => self.handle_job_event(event).await,
                    None => self.job_events = None,
                },
                () = sleep_until_opt(self.connect_deadline) => {
                    self.handle_connect_timeout().await;
                }
            }
        }

        self.teardown().await;
        tracing::info!(session_id = %self.display.session_id, "direct session stopped");
    }

    fn emit(&self, event: SessionEvent) {
        tracing::debug!(session_id = %self.display.session_id, ?event, "session event");
        let _ = self.events.send(event);
    }

    // -- commands -----------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Run { op, reply } => {
                let result = self.apply(op).await;
                let _ = reply.send(result);
            }
            Command::SetEnvironmentVariable { key, value, reply } => {
                let _ = reply.send(self.environment.set(&key, &value));
            }
            Command::SetUserAuthorityFile { path, reply } => {
                self.user_authority_file = path;
                let _ = reply.send(Ok(()));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn apply(&mut self, op: Operation) -> Result<(), SessionError> {
        match op {
            Operation::StartConversation => self.start_conversation().await,
            Operation::Setup { service, user } => self.setup(service, user).await,
            Operation::Authenticate => {
                self.begin_phase(Phase::Authenticate, WorkerSignal::Authenticate)
                    .await
            }
            Operation::Authorize => {
                self.begin_phase(Phase::Authorize, WorkerSignal::Authorize)
                    .await
            }
            Operation::Accredit(CredentialMode::Establish) => {
                self.begin_phase(Phase::Accredit, WorkerSignal::EstablishCredentials)
                    .await
            }
            Operation::Accredit(CredentialMode::Refresh) => {
                self.require_worker()?;
                let previous = self.conversation.begin_refresh()?;
                self.send_or_restore(previous, WorkerSignal::RefreshCredentials)
                    .await
            }
            Operation::OpenSession => self.begin_phase(Phase::Open, WorkerSignal::OpenSession).await,
            Operation::StartSession => self.start_session().await,
            Operation::AnswerQuery(text) => {
                let query = self
                    .conversation
                    .take_query()
                    .ok_or(SessionError::NoPendingQuery)?;
                self.reply(query.reply, ReplyResult::value(text)).await;
                Ok(())
            }
            Operation::Select(selector, value) => {
                self.select(selector, &value).await;
                Ok(())
            }
            Operation::Cancel => {
                self.cancel_pending_query().await;
                Ok(())
            }
            Operation::Close => {
                self.close().await;
                Ok(())
            }
        }
    }

    async fn start_conversation(&mut self) -> Result<(), SessionError> {
        if self.worker.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        // Releases the endpoint of a worker that already went away.
        self.teardown().await;

        let address = Address::generate(self.config.socket_dir.as_deref());
        let (endpoint, accepted) = Endpoint::bind(address, self.config.trusted_uid).await?;

        let mut job = WorkerJob::new(&self.config.worker_program)
            .args(self.config.worker_args.iter().cloned())
            .server_address(&self.config.address_variable, endpoint.address().to_string())
            .stop_timeout(self.config.stop_timeout());
        let job_events = match job.start() {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(session_id = %self.display.session_id, error = %e, "failed to start session worker");
                endpoint.shutdown().await;
                let reason = e.to_string();
                self.emit(SessionEvent::SetupFailed(reason.clone()));
                return Err(SessionError::WorkerUnavailable(reason));
            }
        };

        tracing::info!(
            session_id = %self.display.session_id,
            address = %endpoint.address(),
            worker_pid = ?job.pid(),
            "waiting for session worker"
        );
        self.conversation.restart();
        self.endpoint = Some(endpoint);
        self.accepted = Some(accepted);
        self.worker = Some(job);
        self.job_events = Some(job_events);
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout());
        Ok(())
    }

    async fn setup(&mut self, service: String, user: Option<String>) -> Result<(), SessionError> {
        self.require_worker()?;
        let previous = self.conversation.begin(Phase::Setup)?;

        let display = &self.display;
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        let (display_name, display_device, display_hostname, x11_authority_file) = (
            field(&display.display_name),
            field(&display.device),
            field(&display.hostname),
            field(&display.x11_authority_file),
        );
        let signal = match user {
            Some(username) => {
                self.preferences.select_user(Some(username.clone()));
                WorkerSignal::SetupForUser {
                    service_name: service,
                    display_name,
                    display_device,
                    display_hostname,
                    x11_authority_file,
                    username,
                }
            }
            None => WorkerSignal::Setup {
                service_name: service,
                display_name,
                display_device,
                display_hostname,
                x11_authority_file,
            },
        };

        self.send_or_restore(previous, signal).await?;
        self.announce_defaults();
        Ok(())
    }

    async fn begin_phase(&mut self, phase: Phase, signal: WorkerSignal) -> Result<(), SessionError> {
        self.require_worker()?;
        let previous = self.conversation.begin(phase)?;
        self.send_or_restore(previous, signal).await
    }

    async fn send_or_restore(
        &mut self,
        previous: SessionState,
        signal: WorkerSignal,
    ) -> Result<(), SessionError> {
        if let Err(e) = self.send_signal(signal).await {
            self.conversation.restore(previous);
            return Err(e);
        }
        Ok(())
    }

    async fn start_session(&mut self) -> Result<(), SessionError> {
        self.require_worker()?;
        let previous = self.conversation.begin(Phase::Start)?;

        let name = self.session_name();
        let Some(entry) = self.catalog.lookup(&name) else {
            tracing::warn!(session_id = %self.display.session_id, session = %name, "no command for session");
            let _ = self.conversation.finish(Phase::Start, false);
            self.emit(SessionEvent::SessionStartFailed(format!(
                "no command for session {name}"
            )));
            return Ok(());
        };
        let command = if entry.bypass_xsession {
            entry.command
        } else {
            format!("{} \"{}\"", self.config.xsession_command, entry.command)
        };

        if let Err(e) = self.prepare_environment(&name) {
            self.conversation.restore(previous);
            return Err(e);
        }
        for (key, value) in self.environment.pairs().to_vec() {
            let signal = WorkerSignal::SetEnvironmentVariable { key, value };
            if let Err(e) = self.send_signal(signal).await {
                self.conversation.restore(previous);
                return Err(e);
            }
        }

        self.environment.freeze();
        tracing::info!(session_id = %self.display.session_id, %command, "starting session program");
        if let Err(e) = self.send_signal(WorkerSignal::StartProgram { command }).await {
            self.environment.thaw();
            self.conversation.restore(previous);
            return Err(e);
        }
        Ok(())
    }

    fn prepare_environment(&mut self, session_name: &str) -> Result<(), SessionError> {
        let language = self.preferences.language().to_string();
        let layout = self.preferences.layout();
        let env = &mut self.environment;

        env.set("MDMSESSION", session_name)?;
        env.set("DESKTOP_SESSION", session_name)?;
        env.set("LANG", &language)?;
        env.set("MDM_LANG", &language)?;
        if layout == self.preferences.default_layout() {
            env.set("MDM_KEYBOARD_LAYOUT", layout)?;
        }
        if let Some(display) = &self.display.display_name {
            env.set("DISPLAY", display)?;
        }
        if let Some(authority) = &self.user_authority_file {
            env.set("XAUTHORITY", authority)?;
        }
        if let Ok(window_path) = std::env::var("WINDOWPATH") {
            env.set("WINDOWPATH", &window_path)?;
        }
        env.set("PATH", &self.config.default_path)
    }

    async fn select(&mut self, selector: Selector, value: &str) {
        let signal = match selector {
            Selector::User => {
                self.preferences.select_user(Some(value.to_string()));
                return;
            }
            Selector::Session => {
                self.preferences.select_session(value);
                WorkerSignal::SetSessionName {
                    name: self.session_name(),
                }
            }
            Selector::Language => {
                self.preferences.select_language(value);
                WorkerSignal::SetLanguageName {
                    name: self.preferences.language().to_string(),
                }
            }
            Selector::Layout => {
                self.preferences.select_layout(value);
                WorkerSignal::SetLayoutName {
                    name: self.preferences.layout().to_string(),
                }
            }
        };
        if self.connection.is_some() {
            if let Err(e) = self.send_signal(signal).await {
                tracing::warn!(session_id = %self.display.session_id, error = %e, "failed to forward selection");
            }
        }
    }

    async fn cancel_pending_query(&mut self) {
        if let Some(query) = self.conversation.take_query() {
            tracing::debug!(session_id = %self.display.session_id, "cancelling pending query");
            self.reply(query.reply, ReplyResult::cancelled()).await;
        }
    }

    async fn close(&mut self) {
        self.cancel_pending_query().await;
        if self.conversation.is_running() {
            self.account(RecordKind::Logout);
        }
        self.teardown().await;

        self.preferences.clear();
        self.environment.clear();
        self.user_authority_file = None;
        self.session_pid = None;

        if self.conversation.close() {
            tracing::info!(session_id = %self.display.session_id, "session closed");
            self.emit(SessionEvent::Closed);
        }
    }

    async fn teardown(&mut self) {
        self.connect_deadline = None;
        if let Some(conn) = self.connection.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "failed to close worker connection");
            }
        }
        if let Some(mut worker) = self.worker.take() {
            worker.stop().await;
        }
        self.job_events = None;
        self.accepted = None;
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.shutdown().await;
        }
    }

    // -- worker channel -----------------------------------------------------

    /// Takes the first connection from the spawned worker and stops
    /// accepting; only that connection ever speaks for the worker.
    async fn handle_accepted(&mut self, conn: SocketConnection) {
        if self.connection.is_some() || self.worker.is_none() {
            tracing::warn!(
                session_id = %self.display.session_id,
                id = %conn.id(),
                pid = ?conn.peer().pid,
                "rejecting extra connection"
            );
            return;
        }

        tracing::info!(
            session_id = %self.display.session_id,
            id = %conn.id(),
            pid = ?conn.peer().pid,
            "session worker connected"
        );
        self.accepted = None;
        if let Some(endpoint) = self.endpoint.as_mut() {
            endpoint.stop_accepting().await;
        }
        let conn = Arc::new(conn);
        spawn_reader(Arc::clone(&conn), self.inbound_tx.clone());
        self.connection = Some(conn);
        self.connect_deadline = None;
        self.conversation.connected();
        self.emit(SessionEvent::ConversationStarted);
    }

    async fn handle_inbound(&mut self, id: ConnectionId, inbound: Inbound) {
        if self.connection.as_ref().map(|conn| conn.id()) != Some(id) {
            return;
        }
        match inbound {
            Inbound::Closed => self.worker_disconnected().await,
            Inbound::Frame(data) => match self.codec.decode::<WorkerFrame>(&data) {
                Ok(WorkerFrame::Call { serial, call }) => self.handle_call(serial, call).await,
                Ok(_) => {
                    tracing::warn!(session_id = %self.display.session_id, "protocol violation: worker sent a non-call frame");
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.display.session_id, error = %e, "protocol violation: undecodable frame");
                }
            },
        }
    }

    async fn handle_call(&mut self, serial: u32, call: WorkerCall) {
        let method = call.name();
        tracing::debug!(session_id = %self.display.session_id, method, serial, "worker call");

        match call {
            WorkerCall::SetupComplete => {
                self.complete(serial, method, Phase::Setup, Ok(())).await;
            }
            WorkerCall::SetupFailed { message } => {
                self.complete(serial, method, Phase::Setup, Err(message)).await;
            }
            WorkerCall::ResetComplete => match self.conversation.reset() {
                Ok(stale) => {
                    self.cancel_stale(stale).await;
                    self.reply(serial, ReplyResult::ack()).await;
                    self.emit(SessionEvent::ResetComplete);
                }
                Err(state) => self.violation(serial, method, state).await,
            },
            WorkerCall::ResetFailed { message } => match self.conversation.check_resettable() {
                Ok(()) => {
                    self.reply(serial, ReplyResult::ack()).await;
                    self.emit(SessionEvent::ResetFailed(message));
                }
                Err(state) => self.violation(serial, method, state).await,
            },
            WorkerCall::Authenticated => {
                self.complete(serial, method, Phase::Authenticate, Ok(())).await;
            }
            WorkerCall::AuthenticationFailed { message } => {
                if self
                    .complete(serial, method, Phase::Authenticate, Err(message))
                    .await
                {
                    self.account(RecordKind::FailedAttempt);
                }
            }
            WorkerCall::Authorized => {
                self.complete(serial, method, Phase::Authorize, Ok(())).await;
            }
            WorkerCall::AuthorizationFailed { message } => {
                self.complete(serial, method, Phase::Authorize, Err(message)).await;
            }
            WorkerCall::Accredited => {
                self.complete(serial, method, Phase::Accredit, Ok(())).await;
            }
            WorkerCall::AccreditationFailed { message } => {
                self.complete(serial, method, Phase::Accredit, Err(message)).await;
            }
            WorkerCall::SessionOpened => {
                self.complete(serial, method, Phase::Open, Ok(())).await;
            }
            WorkerCall::OpenFailed { message } => {
                self.complete(serial, method, Phase::Open, Err(message)).await;
            }
            WorkerCall::SessionStarted { pid } => {
                if self.complete(serial, method, Phase::Start, Ok(())).await {
                    self.session_pid = Some(pid);
                    tracing::info!(session_id = %self.display.session_id, pid, "session program started");
                    self.account(RecordKind::Login);
                    self.emit(SessionEvent::SessionStarted { pid });
                }
            }
            WorkerCall::StartFailed { message } => {
                if self
                    .complete(serial, method, Phase::Start, Err(message))
                    .await
                {
                    self.environment.thaw();
                    // The worker has already registered the login by now.
                    self.account(RecordKind::Login);
                }
            }
            WorkerCall::SessionExited { code } => {
                self.end_session(serial, method, WorkerEnd::Exited(code)).await;
            }
            WorkerCall::SessionDied { signal } => {
                self.end_session(serial, method, WorkerEnd::Died(signal)).await;
            }
            WorkerCall::InfoQuery { text } => self.park_query(serial, QueryKind::Info, text).await,
            WorkerCall::SecretInfoQuery { text } => {
                self.park_query(serial, QueryKind::Secret, text).await;
            }
            WorkerCall::Info { text } => {
                self.reply(serial, ReplyResult::ack()).await;
                self.emit(SessionEvent::Info(text));
            }
            WorkerCall::Problem { text } => {
                self.reply(serial, ReplyResult::ack()).await;
                self.emit(SessionEvent::Problem(text));
            }
            WorkerCall::CancelPendingQuery => {
                self.reply(serial, ReplyResult::ack()).await;
                self.cancel_pending_query().await;
            }
            WorkerCall::UsernameChanged { text } => {
                self.reply(serial, ReplyResult::ack()).await;
                tracing::debug!(
                    session_id = %self.display.session_id,
                    from = self.preferences.user().unwrap_or("<unset>"),
                    to = if text.is_empty() { "<unset>" } else { text.as_str() },
                    "username changed"
                );
                self.preferences.select_user(Some(text));
                self.emit(SessionEvent::SelectedUserChanged(
                    self.preferences.user().map(str::to_string),
                ));
                self.announce_defaults();
            }
            WorkerCall::SavedLanguageNameRead { text } => {
                self.reply(serial, ReplyResult::ack()).await;
                if text != self.preferences.default_language() {
                    self.preferences.set_saved_language(&text);
                    self.emit(SessionEvent::DefaultLanguageNameChanged(text));
                }
            }
            WorkerCall::SavedLayoutNameRead { text } => {
                self.reply(serial, ReplyResult::ack()).await;
                if text != self.preferences.default_layout() {
                    self.preferences.set_saved_layout(&text);
                    self.emit(SessionEvent::DefaultLayoutNameChanged(text));
                }
            }
            WorkerCall::SavedSessionNameRead { text } => {
                self.reply(serial, ReplyResult::ack()).await;
                if text != self.default_session_name() && self.catalog.lookup(&text).is_some() {
                    self.preferences.set_saved_session(&text);
                    self.emit(SessionEvent::DefaultSessionNameChanged(text));
                }
            }
        }
    }

    /// Resolves `phase` with the worker's outcome. Returns `false` (after
    /// refusing the call) if the phase was not in flight.
    async fn complete(
        &mut self,
        serial: u32,
        method: &'static str,
        phase: Phase,
        outcome: Result<(), String>,
    ) -> bool {
        match self.conversation.finish(phase, outcome.is_ok()) {
            Ok(stale) => {
                self.cancel_stale(stale).await;
                self.reply(serial, ReplyResult::ack()).await;
                let event = match outcome {
                    Ok(()) => phase.success_event(),
                    Err(reason) => Some(phase.failure_event(reason)),
                };
                if let Some(event) = event {
                    self.emit(event);
                }
                true
            }
            Err(state) => {
                self.violation(serial, method, state).await;
                false
            }
        }
    }

    async fn end_session(&mut self, serial: u32, method: &'static str, end: WorkerEnd) {
        let (state, event) = match end {
            WorkerEnd::Exited(code) => (SessionState::Exited, SessionEvent::SessionExited { code }),
            WorkerEnd::Died(signal) => (SessionState::Died, SessionEvent::SessionDied { signal }),
        };
        match self.conversation.end_session(state) {
            Ok(()) => {
                self.reply(serial, ReplyResult::ack()).await;
                self.account(RecordKind::Logout);
                self.emit(event);
            }
            Err(state) => self.violation(serial, method, state).await,
        }
    }

    async fn park_query(&mut self, serial: u32, kind: QueryKind, text: String) {
        if let Err(rejection) = self.conversation.park(kind, &text, serial) {
            tracing::warn!(session_id = %self.display.session_id, %rejection, "protocol violation: query refused");
            self.reply(serial, ReplyResult::error(PROTOCOL_ERROR, rejection.to_string()))
                .await;
            return;
        }
        self.emit(match kind {
            QueryKind::Info => SessionEvent::InfoQuery(text),
            QueryKind::Secret => SessionEvent::SecretInfoQuery(text),
        });
    }

    async fn cancel_stale(&self, stale: Option<PendingQuery<u32>>) {
        if let Some(query) = stale {
            self.reply(query.reply, ReplyResult::cancelled()).await;
        }
    }

    async fn violation(&self, serial: u32, method: &'static str, state: SessionState) {
        tracing::warn!(
            session_id = %self.display.session_id,
            method,
            %state,
            "protocol violation: unexpected worker call"
        );
        let message = format!("{method} not expected in state {state}");
        self.reply(serial, ReplyResult::error(PROTOCOL_ERROR, message))
            .await;
    }

    async fn send_signal(&self, signal: WorkerSignal) -> Result<(), SessionError> {
        let conn = self.connection.as_ref().ok_or(SessionError::NotConnected)?;
        send_frame(conn, &self.codec, &WorkerFrame::Signal { signal }).await
    }

    async fn reply(&self, serial: u32, result: ReplyResult) {
        let Some(conn) = &self.connection else {
            return;
        };
        let frame = WorkerFrame::Reply {
            reply_to: serial,
            result,
        };
        if let Err(e) = send_frame(conn, &self.codec, &frame).await {
            tracing::warn!(session_id = %self.display.session_id, serial, error = %e, "failed to reply to worker");
        }
    }

    fn require_worker(&self) -> Result<(), SessionError> {
        if self.connection.is_none() {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    // -- worker process -----------------------------------------------------

    async fn handle_job_event(&mut self, event: JobEvent) {
        match event {
            JobEvent::Started { pid } => {
                tracing::debug!(session_id = %self.display.session_id, pid, "worker process running");
            }
            JobEvent::Exited { code } => self.worker_gone(WorkerEnd::Exited(code)).await,
            JobEvent::Died { signal } => self.worker_gone(WorkerEnd::Died(signal)).await,
        }
    }

    /// The worker process ended without being stopped.
    ///
    /// While running this ends the session. Before that, the phase in
    /// flight is failed so the caller is never left waiting.
    async fn worker_gone(&mut self, end: WorkerEnd) {
        self.worker = None;
        self.job_events = None;
        self.connect_deadline = None;
        if let Some(conn) = self.connection.take() {
            let _ = conn.close().await;
        }

        if self.conversation.is_running() {
            let (state, event) = match end {
                WorkerEnd::Exited(code) => (SessionState::Exited, SessionEvent::SessionExited { code }),
                WorkerEnd::Died(signal) => (SessionState::Died, SessionEvent::SessionDied { signal }),
            };
            let _ = self.conversation.end_session(state);
            self.account(RecordKind::Logout);
            self.emit(event);
            return;
        }

        if let Some(phase) = self.conversation.pending_phase() {
            let reason = match end {
                WorkerEnd::Exited(_) => "session worker exited",
                WorkerEnd::Died(_) => "session worker died",
            };
            tracing::warn!(session_id = %self.display.session_id, %phase, reason, "phase failed");
            let _ = self.conversation.finish(phase, false);
            if phase == Phase::Start {
                self.environment.thaw();
            }
            self.emit(phase.failure_event(reason.to_string()));
        }
        self.conversation.take_query();

        if !matches!(
            self.conversation.state(),
            SessionState::Exited | SessionState::Died
        ) {
            self.emit(match end {
                WorkerEnd::Exited(code) => SessionEvent::WorkerExited { code },
                WorkerEnd::Died(signal) => SessionEvent::WorkerDied { signal },
            });
        }
    }

    /// The worker's channel closed. Without it the worker can no longer
    /// be driven, so it is stopped and handled as gone.
    async fn worker_disconnected(&mut self) {
        tracing::warn!(session_id = %self.display.session_id, "session worker disconnected");
        self.connection = None;
        let Some(mut worker) = self.worker.take() else {
            self.conversation.take_query();
            return;
        };
        let end = match worker.stop().await {
            Some(JobEvent::Died { signal }) => WorkerEnd::Died(signal),
            Some(JobEvent::Exited { code }) => WorkerEnd::Exited(code),
            Some(JobEvent::Started { .. }) | None => WorkerEnd::Exited(-1),
        };
        self.worker_gone(end).await;
    }

    async fn handle_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if self.connection.is_some() {
            return;
        }
        tracing::warn!(
            session_id = %self.display.session_id,
            timeout = ?self.config.connect_timeout(),
            "session worker did not connect"
        );
        if let Some(mut worker) = self.worker.take() {
            worker.stop().await;
        }
        self.job_events = None;
        self.emit(SessionEvent::SetupFailed(
            "session worker did not connect".to_string(),
        ));
    }

    // -- helpers ------------------------------------------------------------

    fn fallback_session(&self) -> String {
        self.catalog
            .fallback(&self.config.fallback_session)
            .unwrap_or_else(|| self.config.fallback_session.clone())
    }

    fn default_session_name(&self) -> String {
        let fallback = self.fallback_session();
        self.preferences.default_session(&fallback).to_string()
    }

    fn session_name(&self) -> String {
        let fallback = self.fallback_session();
        self.preferences.session(&fallback).to_string()
    }

    fn announce_defaults(&self) {
        self.emit(SessionEvent::DefaultLanguageNameChanged(
            self.preferences.default_language().to_string(),
        ));
        self.emit(SessionEvent::DefaultLayoutNameChanged(
            self.preferences.default_layout().to_string(),
        ));
        self.emit(SessionEvent::DefaultSessionNameChanged(
            self.default_session_name(),
        ));
    }

    fn account(&self, kind: RecordKind) {
        let Some(sink) = &self.accounting else {
            return;
        };
        let worker_pid = self
            .worker
            .as_ref()
            .and_then(WorkerJob::pid)
            .and_then(|pid| i32::try_from(pid).ok());
        let pid = self.session_pid.or(worker_pid).unwrap_or_default();
        let record = self.display.login_record(pid, self.preferences.user());
        match kind {
            RecordKind::Login => mdm_accounting::record_login(sink.as_ref(), &record),
            RecordKind::Logout => mdm_accounting::record_logout(sink.as_ref(), &record),
            RecordKind::FailedAttempt => {
                mdm_accounting::record_failed_attempt(sink.as_ref(), &record);
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.conversation.state(),
            running: self.conversation.is_running(),
            user: self.preferences.user().map(str::to_string),
            session_name: self.session_name(),
            language_name: self.preferences.language().to_string(),
            layout_name: self.preferences.layout().to_string(),
            session_pid: self.session_pid,
            worker_pid: self.worker.as_ref().and_then(WorkerJob::pid),
            address: self.endpoint.as_ref().map(|e| e.address().to_string()),
            pending_query: self.conversation.pending_query().map(|q| q.kind),
            environment: self.environment.pairs().to_vec(),
        }
    }
}
