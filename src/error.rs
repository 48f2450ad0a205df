//! Error types for the ceptic protocol.
//!
//! Errors fall into a handful of families:
//! - protocol violations (malformed frames, bad handshake fields, duplicate streams),
//!   always fatal to the connection
//! - resource limits (oversized bodies or frames, handler limit), fatal to one stream
//! - timeouts, reported as a stopped stream
//! - configuration (bad route templates, unknown encoders), surfaced to the caller
//! - transport failures from the socket or TLS layer

use thiserror::Error;

/// Main error type for all ceptic operations.
#[derive(Debug, Error)]
pub enum CepticError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading or writing headers.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed frame, unexpected field, duplicate stream id.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A frame declared a payload larger than the negotiated maximum.
    #[error("Frame of {size} bytes exceeds max frame size {max}")]
    FrameSize { size: usize, max: usize },

    /// Settings negotiation failed or the remote rejected the connection.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The stream handler has been stopped.
    #[error("Stream handler is stopped")]
    HandlerStopped,

    /// The stream was closed by a CLOSE frame, carrying its reason.
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// Received data exceeded the permitted total length.
    #[error("Total data size exceeded max of {max} bytes")]
    TotalSizeExceeded { max: usize },

    /// No frame arrived before the read deadline.
    #[error("Stream timed out waiting for data")]
    StreamTimeout,

    /// Route template could not be compiled or collides with another route.
    #[error("Endpoint error: {0}")]
    Endpoint(String),

    /// No route matches the requested command and endpoint.
    #[error("No endpoint found for {command} {endpoint}")]
    NotFound { command: String, endpoint: String },

    /// An encoder name in the Encoding header is not known.
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Request fields failed validation before sending.
    #[error("Invalid request: {0}")]
    Request(String),

    /// TLS setup or session failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid configuration values.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using CepticError.
pub type Result<T> = std::result::Result<T, CepticError>;

impl CepticError {
    /// Whether the error means the stream is no longer usable.
    pub fn is_stream_ended(&self) -> bool {
        matches!(
            self,
            CepticError::HandlerStopped | CepticError::StreamClosed(_) | CepticError::StreamTimeout
        )
    }
}

impl From<tokio_rustls::rustls::Error> for CepticError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        CepticError::Tls(err.to_string())
    }
}

impl From<Vec<crate::config::ValidationError>> for CepticError {
    fn from(errors: Vec<crate::config::ValidationError>) -> Self {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        CepticError::Config(messages.join("; "))
    }
}
