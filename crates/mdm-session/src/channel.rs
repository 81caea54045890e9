//! Plumbing shared by the session actors: the accepting endpoint, the
//! per-connection reader task, and helpers for optional `select!` arms.

use std::future::pending;
use std::sync::Arc;

use mdm_protocol::{Codec, JsonCodec};
use mdm_transport::{
    Address, Connection, ConnectionId, SocketConnection, Transport, UnixSocketTransport,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::SessionError;

/// What a reader task saw on its connection.
pub(crate) enum Inbound {
    Frame(Vec<u8>),
    Closed,
}

pub(crate) type InboundTx = mpsc::UnboundedSender<(ConnectionId, Inbound)>;
pub(crate) type InboundRx = mpsc::UnboundedReceiver<(ConnectionId, Inbound)>;

/// A bound endpoint whose accept loop runs in its own task.
pub(crate) struct Endpoint {
    address: Address,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Binds `address` and starts accepting peers running as `trusted_uid`.
    /// Accepted connections arrive on the returned receiver.
    pub async fn bind(
        address: Address,
        trusted_uid: u32,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SocketConnection>), SessionError> {
        let transport = UnixSocketTransport::bind(&address)
            .await?
            .with_trusted_uid(trusted_uid);
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(transport, accepted_tx, shutdown_rx));
        Ok((
            Self {
                address,
                shutdown: Some(shutdown_tx),
                task: Some(task),
            },
            accepted_rx,
        ))
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Stops accepting and waits until the listener is released.
    /// Connections already accepted stay open; the address is kept for
    /// reporting.
    pub async fn stop_accepting(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "accept task ended abnormally");
            }
        }
    }

    /// Stops accepting and waits until the endpoint is released.
    pub async fn shutdown(mut self) {
        self.stop_accepting().await;
    }
}

async fn accept_loop(
    mut transport: UnixSocketTransport,
    accepted: mpsc::UnboundedSender<SocketConnection>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            result = transport.accept() => match result {
                Ok(conn) => {
                    if accepted.send(conn).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(address = %transport.address(), error = %e, "endpoint stopped accepting");
                    break;
                }
            },
        }
    }
    if let Err(e) = transport.shutdown().await {
        tracing::debug!(error = %e, "endpoint shutdown failed");
    }
}

/// Forwards every frame of `conn` to `inbound`, then a final `Closed`.
pub(crate) fn spawn_reader(conn: Arc<SocketConnection>, inbound: InboundTx) {
    tokio::spawn(async move {
        let id = conn.id();
        loop {
            match conn.recv().await {
                Ok(Some(data)) => {
                    if inbound.send((id, Inbound::Frame(data))).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(%id, error = %e, "connection read failed");
                    break;
                }
            }
        }
        let _ = inbound.send((id, Inbound::Closed));
    });
}

/// Encodes `frame` and sends it on `conn`.
pub(crate) async fn send_frame<T: Serialize>(
    conn: &SocketConnection,
    codec: &JsonCodec,
    frame: &T,
) -> Result<(), SessionError> {
    let bytes = codec.encode(frame)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// `recv` on an optional receiver; never resolves when there is none.
pub(crate) async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

/// Sleeps until `deadline`; never resolves without one.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}
