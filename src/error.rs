//! Error types for duplex-ws.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Main error type for all endpoint operations.
///
/// The enum is `Clone` so that an error captured on the receive path can be
/// handed to the listener; non-cloneable sources are shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum WsError {
    /// A send of the same kind (data or control) is still in flight.
    #[error("Send pending")]
    SendPending,

    /// Output is closed: a close message was already sent, or the endpoint failed.
    #[error("Output closed")]
    OutputClosed,

    /// The application may not send this close status code.
    #[error("Illegal status code: {0}")]
    IllegalStatusCode(u16),

    /// The close reason exceeds 123 bytes once UTF-8 encoded.
    #[error("Illegal close reason: {0} bytes")]
    IllegalReason(usize),

    /// Any other argument rejected by the endpoint or the transport.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// The close message could not be sent within the close timeout.
    #[error("Could not send close within a reasonable timeout")]
    CloseTimedOut,

    /// The peer violated the protocol; `code` is the status to fail the connection with.
    #[error("Protocol error ({code}): {message}")]
    Protocol { code: u16, message: String },

    /// A listener callback panicked.
    #[error("Listener panicked: {0}")]
    Listener(String),

    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The server rejected or botched the opening handshake.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The endpoint was created outside of a Tokio runtime.
    #[error("No Tokio runtime available")]
    NoRuntime,
}

impl WsError {
    /// Create a protocol violation carrying the status code to close with.
    pub fn protocol(code: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Status code associated with a protocol violation, if any.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this is the interrupted-I/O error reported on close timeout.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::CloseTimedOut)
    }

    /// Whether the peer dropped the connection without a close frame.
    pub fn is_connection_reset(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
            ),
            Self::ConnectionClosed => true,
            _ => false,
        }
    }
}

impl From<io::Error> for WsError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for WsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(Arc::new(e))
    }
}

/// Result type alias using WsError.
pub type Result<T> = std::result::Result<T, WsError>;
