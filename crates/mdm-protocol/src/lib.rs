//! Message set for the mdm session channels.
//!
//! This crate defines the "language" spoken on the two private channels
//! a session broker owns:
//!
//! - **Frames** ([`Frame`], [`ReplyResult`]): call / reply / signal
//!   envelope shared by both channels.
//! - **Worker channel** ([`WorkerCall`], [`WorkerSignal`]): between the
//!   broker and the worker process it spawned.
//! - **Relay channel** ([`RelayCall`], [`RelaySignal`]): between a relay
//!   session and the peer that forwards a real session to it.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): frames to bytes.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Frame) → Session (state machine, events)
//! ```

mod codec;
mod error;
mod frame;
mod relay;
mod worker;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frame::{CANCEL_ERROR, CANCEL_MESSAGE, Frame, PROTOCOL_ERROR, ReplyResult};
pub use relay::{RelayCall, RelayFrame, RelaySignal};
pub use worker::{WorkerCall, WorkerFrame, WorkerSignal};
