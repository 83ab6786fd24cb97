//! Transport error kinds.

use mcpgate_protocol::{ErrorKind, GatewayError};
use std::time::Duration;
use thiserror::Error;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures a driver can report. None is fatal to the driver object itself;
/// the session pool decides whether to evict.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The remote refused or never accepted the connection.
    #[error("connection refused: {0}")]
    ConnectRefused(String),

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was being attempted
        operation: &'static str,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// The peer spoke something that is not MCP (bad framing, bad JSON).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// I/O failure on an established connection.
    #[error("wire error: {0}")]
    WireError(String),

    /// The call was cancelled by its context.
    #[error("operation cancelled")]
    Cancelled,

    /// The upstream went away (child exited, stream ended, close frame).
    #[error("upstream closed: {0}")]
    UpstreamClosed(String),

    /// An operation was attempted before `connect` (or after `close`).
    #[error("transport not connected")]
    NotConnected,

    /// Message (de)serialisation failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The driver was built from an invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::WireError(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::ConnectRefused(_) => ErrorKind::ConnectRefused,
            TransportError::Timeout { .. } => ErrorKind::UpstreamTimeout,
            TransportError::ProtocolError(_) | TransportError::Serialization(_) => {
                ErrorKind::ProtocolError
            }
            TransportError::WireError(_) | TransportError::NotConnected => ErrorKind::WireError,
            TransportError::Cancelled => ErrorKind::Cancelled,
            TransportError::UpstreamClosed(_) => ErrorKind::UpstreamClosed,
            TransportError::Config(_) => ErrorKind::InvalidConfig,
        };
        GatewayError::new(kind, err.to_string()).with_component("transport")
    }
}
