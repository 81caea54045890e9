//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding or validating frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed bytes, unknown method, or an
    /// argument of the wrong shape.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but is not valid where it arrived, e.g. a reply
    /// to a serial that was never sent.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
