//! Error types for notifier-bridge-core

use crate::network::TransportType;
use std::io;
use thiserror::Error;

/// Result type alias using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Wire record decoding failures
///
/// Always recoverable: the notification manager logs and drops the offending
/// unit, it is never propagated past a listener callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The type field does not name any known notification/command type
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// The record has fewer fields than the minimum for its kind
    #[error("Truncated record: expected at least {expected} fields, found {found}")]
    Truncated {
        /// Minimum field count for the record kind
        expected: usize,
        /// Fields actually present
        found: usize,
    },

    /// A field is not valid (bad escape, invalid UTF-8, extra fields)
    #[error("Malformed field: {0}")]
    MalformedField(String),
}

/// Protocol error types
///
/// All errors that can occur in the bridge layer. None of them terminates the
/// process; callers either log-and-drop or return them as results.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wire record could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Transport-level failure (bind, advertise, accept, connect)
    #[error("{transport} transport error: {message}")]
    Transport {
        /// Transport that failed
        transport: TransportType,
        /// Failure description
        message: String,
    },

    /// No enabled sender could take a command
    #[error("No transport available")]
    NoTransportAvailable,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ProtocolError {
    /// Create a Transport error
    pub fn transport(transport: TransportType, msg: impl Into<String>) -> Self {
        Self::Transport {
            transport,
            message: msg.into(),
        }
    }

    /// Create a Config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an Other error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error came from the wire codec
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl From<toml::de::Error> for ProtocolError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ProtocolError::transport(TransportType::Tcp, "bind failed");
        assert!(matches!(
            err,
            ProtocolError::Transport {
                transport: TransportType::Tcp,
                ..
            }
        ));
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::transport(TransportType::Udp, "address in use");
        assert_eq!(err.to_string(), "udp transport error: address in use");

        let err = DecodeError::Truncated {
            expected: 4,
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "Truncated record: expected at least 4 fields, found 2"
        );
    }

    #[test]
    fn test_decode_error_conversion() {
        let err: ProtocolError = DecodeError::UnknownType("BOGUS".to_string()).into();
        assert!(err.is_decode());
        assert_eq!(err.to_string(), "Decode error: Unknown type: BOGUS");
    }
}
