//! Unix-domain socket transport with a peer-credential gate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

use crate::{Address, Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// How long a freshly accepted peer gets to finish the framing handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<UnixStream>;

fn io_error(kind: std::io::ErrorKind, e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(kind, e.to_string())
}

// ---------------------------------------------------------------------------
// PeerCredentials
// ---------------------------------------------------------------------------

/// Credentials of the process on the other end of a socket, as reported
/// by the kernel at accept/connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Effective uid of the peer.
    pub uid: u32,
    /// Process id of the peer, when the platform reports it.
    pub pid: Option<i32>,
}

impl PeerCredentials {
    fn of(stream: &UnixStream) -> std::io::Result<Self> {
        let cred = stream.peer_cred()?;
        Ok(Self {
            uid: cred.uid(),
            pid: cred.pid(),
        })
    }
}

// ---------------------------------------------------------------------------
// UnixSocketTransport
// ---------------------------------------------------------------------------

/// A listening endpoint for one session.
///
/// When a trusted uid is set, connections from any other uid are dropped
/// before the handshake and never surface from [`accept`](Transport::accept).
pub struct UnixSocketTransport {
    listener: UnixListener,
    address: Address,
    trusted_uid: Option<u32>,
    /// Socket file to unlink on shutdown/drop (path addresses only).
    socket_file: Option<PathBuf>,
}

impl UnixSocketTransport {
    /// Binds a new listener at the given address.
    pub async fn bind(address: &Address) -> Result<Self, TransportError> {
        let (listener, socket_file) = match address {
            Address::Path(path) => {
                let listener =
                    UnixListener::bind(path).map_err(TransportError::AcceptFailed)?;
                (listener, Some(path.clone()))
            }
            Address::Abstract(name) => (bind_abstract(name)?, None),
        };
        tracing::info!(%address, "session endpoint listening");
        Ok(Self {
            listener,
            address: address.clone(),
            trusted_uid: None,
            socket_file,
        })
    }

    /// Only accept peers running as `uid`.
    pub fn with_trusted_uid(mut self, uid: u32) -> Self {
        self.trusted_uid = Some(uid);
        self
    }

    /// Returns the address this endpoint is bound to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    fn remove_socket_file(&self) {
        if let Some(path) = &self.socket_file {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %e, "failed to remove socket file");
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> Result<UnixListener, TransportError> {
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
        .map_err(TransportError::AcceptFailed)?;
    let listener = std::os::unix::net::UnixListener::bind_addr(&addr)
        .map_err(TransportError::AcceptFailed)?;
    listener
        .set_nonblocking(true)
        .map_err(TransportError::AcceptFailed)?;
    UnixListener::from_std(listener).map_err(TransportError::AcceptFailed)
}

#[cfg(not(target_os = "linux"))]
fn bind_abstract(name: &str) -> Result<UnixListener, TransportError> {
    Err(TransportError::Unsupported(format!("unix:abstract={name}")))
}

impl Transport for UnixSocketTransport {
    type Connection = SocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        loop {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .map_err(TransportError::AcceptFailed)?;

            let peer = match PeerCredentials::of(&stream) {
                Ok(peer) => peer,
                Err(e) => {
                    tracing::warn!(error = %e, "unable to read peer credentials, dropping connection");
                    continue;
                }
            };

            if let Some(trusted) = self.trusted_uid {
                if peer.uid != trusted {
                    tracing::warn!(
                        uid = peer.uid,
                        trusted,
                        "rejecting connection from untrusted uid"
                    );
                    continue;
                }
            }

            let ws = match tokio::time::timeout(
                HANDSHAKE_TIMEOUT,
                tokio_tungstenite::accept_async(stream),
            )
            .await
            {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "peer handshake failed");
                    continue;
                }
                Err(_) => {
                    tracing::debug!(uid = peer.uid, "peer handshake timed out");
                    continue;
                }
            };

            let conn = SocketConnection::new(ws, peer);
            tracing::debug!(id = %conn.id(), uid = peer.uid, pid = ?peer.pid, "accepted connection");
            return Ok(conn);
        }
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.remove_socket_file();
        Ok(())
    }
}

impl Drop for UnixSocketTransport {
    fn drop(&mut self) {
        self.remove_socket_file();
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Connects to an endpoint and completes the framing handshake.
///
/// This is what the worker (or a relay peer) calls with the address it was
/// handed through its environment.
pub async fn connect(address: &Address) -> Result<SocketConnection, TransportError> {
    let stream = match address {
        Address::Path(path) => UnixStream::connect(path)
            .await
            .map_err(TransportError::ConnectFailed)?,
        Address::Abstract(name) => connect_abstract(name)?,
    };
    let peer = PeerCredentials::of(&stream).map_err(TransportError::ConnectFailed)?;

    let (ws, _) = tokio_tungstenite::client_async("ws://localhost/session", stream)
        .await
        .map_err(|e| {
            TransportError::ConnectFailed(io_error(std::io::ErrorKind::ConnectionRefused, e))
        })?;

    let conn = SocketConnection::new(ws, peer);
    tracing::debug!(id = %conn.id(), %address, "connected to session endpoint");
    Ok(conn)
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> Result<UnixStream, TransportError> {
    use std::os::linux::net::SocketAddrExt;

    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
        .map_err(TransportError::ConnectFailed)?;
    let stream = std::os::unix::net::UnixStream::connect_addr(&addr)
        .map_err(TransportError::ConnectFailed)?;
    stream
        .set_nonblocking(true)
        .map_err(TransportError::ConnectFailed)?;
    UnixStream::from_std(stream).map_err(TransportError::ConnectFailed)
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(name: &str) -> Result<UnixStream, TransportError> {
    Err(TransportError::Unsupported(format!("unix:abstract={name}")))
}

// ---------------------------------------------------------------------------
// SocketConnection
// ---------------------------------------------------------------------------

/// One framed connection over a Unix socket.
///
/// The read and write halves are locked separately so a task blocked in
/// [`recv`](Connection::recv) never holds up a [`send`](Connection::send).
pub struct SocketConnection {
    id: ConnectionId,
    peer: PeerCredentials,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl SocketConnection {
    fn new(ws: WsStream, peer: PeerCredentials) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    /// Credentials of the remote process.
    pub fn peer(&self) -> PeerCredentials {
        self.peer
    }
}

impl Connection for SocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(io_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
