//! Unified error type for the mdm crates.

use mdm_accounting::AccountingError;
use mdm_protocol::ProtocolError;
use mdm_session::{PeerError, SessionError};
use mdm_transport::TransportError;
use mdm_worker::WorkerError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes let `?` convert sub-crate errors, so callers
/// of the meta crate only match on this one type.
#[derive(Debug, thiserror::Error)]
pub enum MdmError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Accounting(#[from] AccountingError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[source] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Json(#[source] serde_json::Error),

    /// An environment override could not be parsed.
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_session_error() {
        let err: MdmError = SessionError::NoPendingQuery.into();
        assert!(matches!(err, MdmError::Session(_)));
        assert_eq!(err.to_string(), "no query is pending");
    }

    #[test]
    fn test_from_protocol_error() {
        let err: MdmError = ProtocolError::InvalidMessage("bad".into()).into();
        assert!(matches!(err, MdmError::Protocol(_)));
    }

    #[test]
    fn test_from_peer_error() {
        let err: MdmError = PeerError::Closed.into();
        assert!(matches!(err, MdmError::Peer(_)));
    }

    #[test]
    fn test_config_error_message() {
        let err: MdmError = ConfigError::InvalidValue {
            key: "MDM_TRUSTED_UID",
            value: "root".into(),
        }
        .into();
        assert_eq!(err.to_string(), "invalid value for MDM_TRUSTED_UID: 'root'");
    }
}
