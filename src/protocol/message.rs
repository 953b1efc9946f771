//! Decoded inbound messages.
//!
//! The transport hands the endpoint one decoded message at a time; the
//! endpoint parks it in a single slot until the receive task consumes it.
//! Payloads use `bytes::Bytes` so a ping can be answered with the same
//! buffer the listener sees, without copying.

use bytes::Bytes;

/// A data or control message awaiting dispatch to the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text fragment; `last` marks the final fragment of the message.
    Text { data: String, last: bool },
    /// Binary fragment; `last` marks the final fragment of the message.
    Binary { data: Bytes, last: bool },
    /// Ping with its application data.
    Ping(Bytes),
    /// Pong with its application data.
    Pong(Bytes),
}

impl Inbound {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Binary { .. } => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text { data, .. } => data.len(),
            Self::Binary { data, .. } => data.len(),
            Self::Ping(data) | Self::Pong(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Status code and reason of a received (or synthesized) close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// Close status code.
    pub code: u16,
    /// Close reason (may be empty).
    pub reason: String,
}

impl CloseStatus {
    /// Create a new close status.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}
