//! Private IPC endpoints for the mdm session broker.
//!
//! Provides the [`Transport`] and [`Connection`] traits plus the one
//! implementation the broker needs: a Unix-domain socket bound to a
//! random per-session [`Address`], guarded by a peer-credential check.
//!
//! ```text
//! broker                                   worker / relay peer
//! UnixSocketTransport::bind(address)
//!   accept() ── uid check ── handshake ◄── connect(address)
//!   SocketConnection  ◄──── frames ────►   SocketConnection
//! ```
//!
//! Frames are carried as WebSocket messages over the Unix stream, which
//! gives message boundaries and clean close semantics for free.

#![allow(async_fn_in_trait)]

mod address;
mod error;
mod unix;

pub use address::{Address, ADDRESS_PREFIX};
pub use error::TransportError;
pub use unix::{connect, PeerCredentials, SocketConnection, UnixSocketTransport};

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next permitted incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops accepting and releases the endpoint.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single connection that can send and receive framed bytes.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_equality() {
        assert_eq!(ConnectionId::new(1), ConnectionId::new(1));
        assert_ne!(ConnectionId::new(1), ConnectionId::new(2));
    }
}
