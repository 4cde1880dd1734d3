//! Client error types.

use crate::types::JsonRpcError;
use pocketmcp_retries::Retryable;
use thiserror::Error;

/// Errors surfaced by the protocol client.
#[derive(Debug, Error)]
pub enum McpError {
    /// The transport channel could not be opened or written.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No matching response arrived within the configured budget.
    #[error("request timed out")]
    Timeout,

    /// The server rejected the initialize handshake, or negotiated an
    /// incompatible protocol version.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// An operation was attempted outside the ready state.
    #[error("client is not connected")]
    NotConnected,

    /// Offline and no fresh cached copy was available.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// A well-formed error envelope from the server.
    #[error("server error {code}: {message}")]
    Remote {
        /// Server-supplied error code.
        code: i32,
        /// Server-supplied message.
        message: String,
    },

    /// The transport dropped before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// A response carried neither a result nor an error.
    #[error("response contained no result")]
    MissingResult,

    /// HTTP-level failure (status code).
    #[error("HTTP error: {0}")]
    Http(u16),

    /// JSON encode/decode failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        Self::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

impl McpError {
    /// Whether this is a transport-class failure a retry could recover
    /// from. Server answers ([`McpError::Remote`],
    /// [`McpError::HandshakeRejected`]) are never recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TransportUnavailable(_) | Self::Timeout | Self::ConnectionClosed => true,
            Self::Http(status) => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

impl Retryable for McpError {
    fn is_retryable(&self) -> bool {
        self.is_recoverable()
    }
}

/// Result type for client operations.
pub type McpResult<T> = Result<T, McpError>;
