//! The envelope every message on a session channel travels in.
//!
//! A channel carries three kinds of frames:
//!
//! ```text
//! peer ──── Call { serial, call } ────► server      (expects a Reply)
//! peer ◄─── Reply { reply_to, result } ── server
//! peer ◄─── Signal { signal } ─────────── server    (one-way)
//! ```
//!
//! Frames on one channel are delivered in send order, so a reply can
//! never overtake a signal sent after it.

use serde::{Deserialize, Serialize};

/// Error name used when a pending query is cancelled.
pub const CANCEL_ERROR: &str = "org.mate.DisplayManager.Session.Error.Cancel";

/// Message that accompanies [`CANCEL_ERROR`].
pub const CANCEL_MESSAGE: &str = "Operation cancelled";

/// Error name used when a call is not valid where it arrived.
pub const PROTOCOL_ERROR: &str = "org.mate.DisplayManager.Session.Error.ProtocolViolation";

/// Outcome of a call, carried in a [`Frame::Reply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ReplyResult {
    /// The call was handled. Acks carry no value; answered queries carry
    /// the answer text.
    Return {
        #[serde(default)]
        value: Option<String>,
    },

    /// The call was refused or cancelled.
    Error { name: String, message: String },
}

impl ReplyResult {
    /// An empty acknowledgement.
    pub fn ack() -> Self {
        Self::Return { value: None }
    }

    /// A reply carrying a string value.
    pub fn value(value: impl Into<String>) -> Self {
        Self::Return {
            value: Some(value.into()),
        }
    }

    /// An error reply.
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The standard cancellation reply.
    pub fn cancelled() -> Self {
        Self::error(CANCEL_ERROR, CANCEL_MESSAGE)
    }

    /// Returns `true` if this is the cancellation reply.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Error { name, .. } if name == CANCEL_ERROR)
    }
}

/// One frame on a session channel.
///
/// `C` is the set of calls the connecting peer may make; `S` is the set
/// of one-way signals the listening side sends back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Frame<C, S> {
    /// Peer → server method call. `serial` is chosen by the caller and
    /// echoed in the matching reply.
    Call { serial: u32, call: C },

    /// Server → peer reply to the call with serial `reply_to`.
    Reply { reply_to: u32, result: ReplyResult },

    /// Server → peer one-way notification.
    Signal { signal: S },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{WorkerCall, WorkerFrame, WorkerSignal};

    #[test]
    fn test_call_frame_json_shape() {
        let frame = WorkerFrame::Call {
            serial: 4,
            call: WorkerCall::SessionStarted { pid: 1234 },
        };
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["kind"], "Call");
        assert_eq!(json["serial"], 4);
        assert_eq!(json["call"]["method"], "SessionStarted");
        assert_eq!(json["call"]["pid"], 1234);
    }

    #[test]
    fn test_signal_frame_json_shape() {
        let frame = WorkerFrame::Signal {
            signal: WorkerSignal::Authenticate,
        };
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["kind"], "Signal");
        assert_eq!(json["signal"]["signal"], "Authenticate");
    }

    #[test]
    fn test_ack_reply_has_null_value() {
        let json = serde_json::to_value(ReplyResult::ack()).unwrap();
        assert_eq!(json["status"], "Return");
        assert!(json["value"].is_null());
    }

    #[test]
    fn test_return_without_value_field_decodes_as_ack() {
        let result: ReplyResult = serde_json::from_str(r#"{"status":"Return"}"#).unwrap();
        assert_eq!(result, ReplyResult::ack());
    }

    #[test]
    fn test_cancelled_reply_carries_cancel_error() {
        let reply = ReplyResult::cancelled();
        assert!(reply.is_cancelled());
        assert_eq!(
            reply,
            ReplyResult::Error {
                name: CANCEL_ERROR.into(),
                message: "Operation cancelled".into(),
            }
        );
    }

    #[test]
    fn test_protocol_error_is_not_cancellation() {
        assert!(!ReplyResult::error(PROTOCOL_ERROR, "nope").is_cancelled());
        assert!(!ReplyResult::ack().is_cancelled());
    }

    #[test]
    fn test_unknown_frame_kind_is_rejected() {
        let result: Result<WorkerFrame, _> =
            serde_json::from_str(r#"{"kind":"Broadcast","payload":1}"#);
        assert!(result.is_err());
    }
}
