//! Error types for the push-channel RPC transport.
//!
//! Connection and handshake failures are returned from `connect` and leave the
//! transport disconnected. Per-request failures only reach the caller awaiting
//! that request and never disturb the stream consumer.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    // Stream errors
    #[error("Connection to {url} failed: {message}")]
    Connection {
        url: String,
        /// HTTP status when the server answered with a non-success code.
        status: Option<u16>,
        message: String,
    },

    #[error("Event stream closed: {message}")]
    StreamClosed { message: String },

    #[error("Stream event of {size} bytes exceeds maximum {limit}")]
    EventTooLarge { size: usize, limit: usize },

    // Handshake errors
    #[error("No session endpoint event within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    // Request errors
    #[error("Submission rejected with HTTP {status}: {body}")]
    Submission { status: u16, body: String },

    #[error("Request {id} timed out waiting for a response")]
    RequestTimeout { id: u64 },

    #[error("Request {id} cancelled by transport teardown")]
    Cancelled { id: u64 },

    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Malformed stream message: {message}")]
    MalformedStreamMessage { message: String },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Request id {0} is already pending")]
    DuplicateRequestId(u64),

    // Lower-level errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TransportError {
    /// Whether this error leaves the transport without a live session.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            TransportError::Connection { .. }
                | TransportError::StreamClosed { .. }
                | TransportError::EventTooLarge { .. }
                | TransportError::HandshakeTimeout(_)
                | TransportError::Handshake { .. }
                | TransportError::NotConnected
        )
    }

    /// Whether this error describes a request that got no answer, as opposed
    /// to one the server explicitly rejected.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            TransportError::RequestTimeout { .. } | TransportError::Cancelled { .. }
        )
    }
}
