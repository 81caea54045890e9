//! Codec trait and implementations for serializing/deserializing frames.
//!
//! The session layer doesn't care how frames become bytes; it holds
//! something implementing [`Codec`]. [`JsonCodec`] is the only
//! implementation today and keeps the channel readable in debug logs.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// This is behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use mdm_protocol::{Codec, JsonCodec, WorkerCall, WorkerFrame};
///
/// let codec = JsonCodec;
///
/// let frame = WorkerFrame::Call {
///     serial: 3,
///     call: WorkerCall::InfoQuery { text: "login:".into() },
/// };
///
/// let bytes = codec.encode(&frame).unwrap();
/// let decoded: WorkerFrame = codec.decode(&bytes).unwrap();
/// assert_eq!(frame, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ReplyResult, WorkerFrame, WorkerSignal};

    #[test]
    fn test_json_codec_decodes_what_it_encodes() {
        let codec = JsonCodec;
        let frame = WorkerFrame::Signal {
            signal: WorkerSignal::SetEnvironmentVariable {
                key: "DISPLAY".into(),
                value: ":0".into(),
            },
        };
        let bytes = codec.encode(&frame).unwrap();
        let decoded: WorkerFrame = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let result: Result<WorkerFrame, _> = JsonCodec.decode(b"\x00\x01not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_decode_reply_frame() {
        let bytes = br#"{"kind":"Reply","reply_to":9,"result":{"status":"Return","value":"alice"}}"#;
        let frame: WorkerFrame = JsonCodec.decode(bytes).unwrap();
        assert_eq!(
            frame,
            WorkerFrame::Reply {
                reply_to: 9,
                result: ReplyResult::value("alice"),
            }
        );
    }
}
