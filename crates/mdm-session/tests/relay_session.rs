//! Integration tests for `RelaySession` and the bridge that feeds it.

use std::sync::Arc;
use std::time::Duration;

use mdm_protocol::{PROTOCOL_ERROR, RelayCall, RelaySignal, WorkerCall, WorkerSignal};
use mdm_session::{
    CredentialMode, DirectSession, DisplayInfo, PeerError, RelayPeer, RelaySession, Session, SessionConfig,
    SessionEntry, SessionError, SessionEvent, SessionEvents, SessionState, StaticCatalog,
    WorkerPeer, run_bridge,
};
use mdm_transport::Address;
use nix::unistd::getuid;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut SessionEvents) -> SessionEvent {
    tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .expect("event should arrive")
        .expect("event channel should stay open")
}

/// Skips events until `expected` arrives.
async fn expect(events: &mut SessionEvents, expected: SessionEvent) {
    while next_event(events).await != expected {}
}

async fn next_relay_signal(peer: &RelayPeer) -> RelaySignal {
    tokio::time::timeout(TIMEOUT, peer.next_signal())
        .await
        .expect("signal should arrive")
        .expect("relay channel should stay open")
}

async fn bind() -> (RelaySession, SessionEvents, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let (relay, events) = RelaySession::bind(Some(dir.path()), getuid().as_raw())
        .await
        .unwrap();
    (relay, events, dir)
}

/// A relay with a peer attached; `Connected` already consumed.
async fn attached() -> (RelaySession, SessionEvents, RelayPeer, TempDir) {
    let (relay, mut events, dir) = bind().await;
    let peer = RelayPeer::connect(relay.address()).await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    (relay, events, peer, dir)
}

/// Drives the relay to `SetupComplete`.
async fn set_up(relay: &RelaySession, events: &mut SessionEvents, peer: &RelayPeer) {
    peer.call(RelayCall::ConversationStarted).await.unwrap();
    assert_eq!(next_event(events).await, SessionEvent::ConversationStarted);

    relay.setup("mdm").await.unwrap();
    assert_eq!(
        next_relay_signal(peer).await,
        RelaySignal::Setup {
            service_name: "mdm".into()
        }
    );
    peer.call(RelayCall::SetupComplete).await.unwrap();
    assert_eq!(next_event(events).await, SessionEvent::SetupComplete);
}

/// Acks `call` as the peer and checks the event it produces.
async fn complete(events: &mut SessionEvents, peer: &RelayPeer, call: RelayCall, event: SessionEvent) {
    assert_eq!(peer.call(call).await.unwrap(), None);
    assert_eq!(next_event(events).await, event);
}

/// Drives the relay through every phase to `Running`.
async fn run_to_running(relay: &RelaySession, events: &mut SessionEvents, peer: &RelayPeer) {
    set_up(relay, events, peer).await;
    relay.authenticate().await.unwrap();
    complete(events, peer, RelayCall::Authenticated, SessionEvent::Authenticated).await;
    relay.authorize().await.unwrap();
    complete(events, peer, RelayCall::Authorized, SessionEvent::Authorized).await;
    relay.accredit(CredentialMode::Establish).await.unwrap();
    complete(events, peer, RelayCall::Accredited, SessionEvent::Accredited).await;
    relay.open_session().await.unwrap();
    complete(events, peer, RelayCall::SessionOpened, SessionEvent::SessionOpened).await;
    relay.start_session().await.unwrap();
    complete(
        events,
        peer,
        RelayCall::SessionStarted { pid: 4242 },
        SessionEvent::SessionStarted { pid: 4242 },
    )
    .await;
    assert_eq!(relay.state().await.unwrap(), SessionState::Running);
}

// ---------------------------------------------------------------------------
// RelaySession
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_operations_without_peer_are_not_connected() {
    let (relay, _events, _dir) = bind().await;

    assert!(matches!(
        relay.setup("mdm").await,
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        relay.start_conversation().await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn test_setup_forwards_signal_and_reports_completion() {
    let (relay, mut events, peer, _dir) = attached().await;

    set_up(&relay, &mut events, &peer).await;

    assert_eq!(relay.state().await.unwrap(), SessionState::SetupComplete);
}

#[tokio::test]
async fn test_query_is_acked_and_answer_forwarded() {
    let (relay, mut events, peer, _dir) = attached().await;
    set_up(&relay, &mut events, &peer).await;
    relay.authenticate().await.unwrap();
    assert_eq!(next_relay_signal(&peer).await, RelaySignal::Authenticate);

    let ack = peer
        .call(RelayCall::InfoQuery {
            text: "login:".into(),
        })
        .await
        .unwrap();

    assert_eq!(ack, None);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::InfoQuery("login:".into())
    );
    relay.answer_query("alice").await.unwrap();
    assert_eq!(
        next_relay_signal(&peer).await,
        RelaySignal::AnswerQuery {
            text: "alice".into()
        }
    );
    assert!(matches!(
        relay.answer_query("again").await,
        Err(SessionError::NoPendingQuery)
    ));
}

#[tokio::test]
async fn test_cancel_forwards_only_with_pending_query() {
    let (relay, mut events, peer, _dir) = attached().await;
    set_up(&relay, &mut events, &peer).await;
    relay.authenticate().await.unwrap();
    assert_eq!(next_relay_signal(&peer).await, RelaySignal::Authenticate);

    relay.cancel().await.unwrap();
    peer.call(RelayCall::SecretInfoQuery {
        text: "Password:".into(),
    })
    .await
    .unwrap();
    relay.cancel().await.unwrap();

    assert_eq!(next_relay_signal(&peer).await, RelaySignal::Cancelled);
}

#[tokio::test]
async fn test_unexpected_completion_is_refused() {
    let (_relay, _events, peer, _dir) = attached().await;

    let err = peer.call(RelayCall::Authenticated).await.unwrap_err();

    assert!(matches!(err, PeerError::Remote { ref name, .. } if name == PROTOCOL_ERROR));
}

#[tokio::test]
async fn test_disconnect_resets_and_accepts_new_peer() {
    let (relay, mut events, peer, _dir) = attached().await;
    set_up(&relay, &mut events, &peer).await;

    peer.close().await.unwrap();
    drop(peer);

    assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
    assert_eq!(relay.state().await.unwrap(), SessionState::New);

    let _again = RelayPeer::connect(relay.address()).await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
}

#[tokio::test]
async fn test_close_forwards_and_is_idempotent() {
    let (relay, mut events, peer, _dir) = attached().await;

    relay.close().await.unwrap();
    relay.close().await.unwrap();

    assert_eq!(next_relay_signal(&peer).await, RelaySignal::Close);
    assert_eq!(next_event(&mut events).await, SessionEvent::Closed);
    let next = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
    assert!(next.is_err(), "unexpected event: {next:?}");
}

#[tokio::test]
async fn test_reset_returns_to_conversation_started() {
    let (relay, mut events, peer, _dir) = attached().await;
    set_up(&relay, &mut events, &peer).await;
    relay.authenticate().await.unwrap();

    complete(
        &mut events,
        &peer,
        RelayCall::ResetFailed {
            message: "busy".into(),
        },
        SessionEvent::ResetFailed("busy".into()),
    )
    .await;
    assert_eq!(relay.state().await.unwrap(), SessionState::AuthPending);

    complete(&mut events, &peer, RelayCall::ResetComplete, SessionEvent::ResetComplete).await;
    assert_eq!(
        relay.state().await.unwrap(),
        SessionState::ConversationStarted
    );
}

#[tokio::test]
async fn test_session_exited_while_running() {
    let (relay, mut events, peer, _dir) = attached().await;
    run_to_running(&relay, &mut events, &peer).await;

    complete(
        &mut events,
        &peer,
        RelayCall::SessionExited { code: 0 },
        SessionEvent::SessionExited { code: 0 },
    )
    .await;

    assert_eq!(relay.state().await.unwrap(), SessionState::Exited);
}

#[tokio::test]
async fn test_session_died_while_running() {
    let (relay, mut events, peer, _dir) = attached().await;
    run_to_running(&relay, &mut events, &peer).await;

    complete(
        &mut events,
        &peer,
        RelayCall::SessionDied { signal: 9 },
        SessionEvent::SessionDied { signal: 9 },
    )
    .await;

    assert_eq!(relay.state().await.unwrap(), SessionState::Died);
}

#[tokio::test]
async fn test_session_end_before_running_is_refused() {
    let (relay, mut events, peer, _dir) = attached().await;
    set_up(&relay, &mut events, &peer).await;

    let err = peer
        .call(RelayCall::SessionExited { code: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::Remote { ref name, .. } if name == PROTOCOL_ERROR));

    let err = peer
        .call(RelayCall::SessionDied { signal: 9 })
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::Remote { ref name, .. } if name == PROTOCOL_ERROR));
    assert_eq!(relay.state().await.unwrap(), SessionState::SetupComplete);
}

#[tokio::test]
async fn test_worker_exited_clears_pending_query() {
    let (relay, mut events, peer, _dir) = attached().await;
    set_up(&relay, &mut events, &peer).await;
    relay.authenticate().await.unwrap();
    complete(
        &mut events,
        &peer,
        RelayCall::InfoQuery {
            text: "login:".into(),
        },
        SessionEvent::InfoQuery("login:".into()),
    )
    .await;

    complete(
        &mut events,
        &peer,
        RelayCall::WorkerExited { code: 1 },
        SessionEvent::WorkerExited { code: 1 },
    )
    .await;

    assert!(matches!(
        relay.answer_query("alice").await,
        Err(SessionError::NoPendingQuery)
    ));
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bridge_carries_a_login_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        worker_program: "/bin/sleep".into(),
        worker_args: vec!["30".into()],
        socket_dir: Some(dir.path().to_path_buf()),
        trusted_uid: getuid().as_raw(),
        default_language: Some("en_US.UTF-8".into()),
        ..Default::default()
    };
    let (direct, direct_events) = DirectSession::builder(DisplayInfo::local("session-1", ":0"))
        .config(config)
        .catalog(Arc::new(
            StaticCatalog::new().with(SessionEntry::new("mate", "mate-session")),
        ))
        .spawn();

    let (relay, mut events, _relay_dir) = bind().await;
    let relay_peer = RelayPeer::connect(relay.address()).await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);

    let bridged = direct.clone();
    let bridge =
        tokio::spawn(async move { run_bridge(&bridged, direct_events, &relay_peer).await });

    // The caller talks to the relay only; the test plays the worker.
    relay.start_conversation().await.unwrap();
    let address = tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Some(address) = direct.snapshot().await.unwrap().address {
                break address;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("direct session should bind an endpoint");
    let worker = Arc::new(
        WorkerPeer::connect(&address.parse::<Address>().unwrap())
            .await
            .unwrap(),
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::ConversationStarted
    );

    relay.setup("mdm").await.unwrap();
    let signal = worker.next_signal().await.unwrap();
    assert!(matches!(signal, WorkerSignal::Setup { ref service_name, .. } if service_name == "mdm"));
    worker.call(WorkerCall::SetupComplete).await.unwrap();
    expect(&mut events, SessionEvent::SetupComplete).await;

    relay.authenticate().await.unwrap();
    assert_eq!(
        worker.next_signal().await.unwrap(),
        WorkerSignal::Authenticate
    );
    let query_worker = worker.clone();
    let query = tokio::spawn(async move {
        query_worker
            .call(WorkerCall::InfoQuery {
                text: "login:".into(),
            })
            .await
    });
    expect(&mut events, SessionEvent::InfoQuery("login:".into())).await;

    relay.answer_query("alice").await.unwrap();

    let answer = tokio::time::timeout(TIMEOUT, query)
        .await
        .expect("answer should reach the worker")
        .unwrap()
        .unwrap();
    assert_eq!(answer.as_deref(), Some("alice"));

    worker.call(WorkerCall::Authenticated).await.unwrap();
    expect(&mut events, SessionEvent::Authenticated).await;
    assert_eq!(relay.state().await.unwrap(), SessionState::Authenticated);

    drop(relay);
    direct.close().await.unwrap();
    bridge.abort();
}
