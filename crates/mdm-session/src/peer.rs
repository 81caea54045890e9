//! The connecting side of a session channel.
//!
//! A [`Peer`] is what a worker process, or a bridge forwarding a session
//! to a relay, holds: it makes calls and waits for their replies, and
//! hands out the signals the listening side sends.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use mdm_protocol::{Codec, Frame, JsonCodec, RelayCall, RelaySignal, ReplyResult, WorkerCall, WorkerSignal};
use mdm_transport::{Address, Connection, SocketConnection};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::PeerError;

/// `None` once the connection is gone; no new call may wait after that.
type Pending = Arc<Mutex<Option<HashMap<u32, oneshot::Sender<ReplyResult>>>>>;

/// A peer speaking the worker channel.
pub type WorkerPeer = Peer<WorkerCall, WorkerSignal>;

/// A peer speaking the relay channel.
pub type RelayPeer = Peer<RelayCall, RelaySignal>;

/// Client end of a channel whose calls are `C` and signals are `S`.
pub struct Peer<C, S> {
    conn: Arc<SocketConnection>,
    codec: JsonCodec,
    next_serial: AtomicU32,
    pending: Pending,
    signals: Mutex<mpsc::UnboundedReceiver<S>>,
    reader: JoinHandle<()>,
    _calls: PhantomData<fn(C)>,
}

impl<C, S> Peer<C, S>
where
    C: Serialize + DeserializeOwned + Send + 'static,
    S: Serialize + DeserializeOwned + Send + 'static,
{
    /// Connects to the endpoint at `address`.
    pub async fn connect(address: &Address) -> Result<Self, PeerError> {
        let conn = Arc::new(mdm_transport::connect(address).await?);
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop::<C, S>(
            Arc::clone(&conn),
            Arc::clone(&pending),
            signal_tx,
        ));

        Ok(Self {
            conn,
            codec: JsonCodec,
            next_serial: AtomicU32::new(1),
            pending,
            signals: Mutex::new(signal_rx),
            reader,
            _calls: PhantomData,
        })
    }

    /// Makes a call and waits for its reply.
    ///
    /// Returns the reply's value; acknowledgements carry `None`.
    ///
    /// # Errors
    /// [`PeerError::Remote`] for an error reply, [`PeerError::Closed`] if
    /// the channel closes first.
    pub async fn call(&self, call: C) -> Result<Option<String>, PeerError> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            let pending = pending.as_mut().ok_or(PeerError::Closed)?;
            pending.insert(serial, reply_tx);
        }

        let frame: Frame<C, S> = Frame::Call { serial, call };
        if let Err(e) = self.send(&frame).await {
            if let Some(pending) = self.pending.lock().await.as_mut() {
                pending.remove(&serial);
            }
            return Err(e);
        }

        match reply_rx.await.map_err(|_| PeerError::Closed)? {
            ReplyResult::Return { value } => Ok(value),
            ReplyResult::Error { name, message } => Err(PeerError::Remote { name, message }),
        }
    }

    async fn send(&self, frame: &Frame<C, S>) -> Result<(), PeerError> {
        let bytes = self.codec.encode(frame)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    /// The next signal, or `None` once the channel has closed.
    pub async fn next_signal(&self) -> Option<S> {
        self.signals.lock().await.recv().await
    }

    /// Closes the channel.
    pub async fn close(&self) -> Result<(), PeerError> {
        self.conn.close().await?;
        Ok(())
    }
}

impl<C, S> Drop for Peer<C, S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<C, S>(
    conn: Arc<SocketConnection>,
    pending: Pending,
    signals: mpsc::UnboundedSender<S>,
) where
    C: DeserializeOwned,
    S: DeserializeOwned,
{
    let codec = JsonCodec;
    let id = conn.id();
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%id, error = %e, "peer read failed");
                break;
            }
        };
        match codec.decode::<Frame<C, S>>(&data) {
            Ok(Frame::Reply { reply_to, result }) => {
                let waiter = pending
                    .lock()
                    .await
                    .as_mut()
                    .and_then(|pending| pending.remove(&reply_to));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => tracing::warn!(%id, reply_to, "reply to unknown serial"),
                }
            }
            Ok(Frame::Signal { signal }) => {
                let _ = signals.send(signal);
            }
            Ok(Frame::Call { serial, .. }) => {
                tracing::warn!(%id, serial, "protocol violation: call sent to the calling side");
            }
            Err(e) => tracing::warn!(%id, error = %e, "undecodable frame"),
        }
    }
    // Dropping the waiters fails every outstanding call with `Closed`.
    pending.lock().await.take();
}
