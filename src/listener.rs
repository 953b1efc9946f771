//! Application-facing callbacks.
//!
//! A [`Listener`] receives the events of one endpoint. Calls are strictly
//! serialized: at most one listener method runs at any time, in the order
//! the endpoint observed the events.
//!
//! Every method has a default. The data and control defaults request one
//! more message, so a listener that overrides nothing drains the connection.
//!
//! # Example
//!
//! ```ignore
//! use duplex_ws::{CompletionSignal, Listener, WebSocket};
//!
//! struct Printer;
//!
//! impl Listener for Printer {
//!     fn on_text(&self, ws: &WebSocket, text: String, last: bool) -> Option<CompletionSignal> {
//!         println!("{text} (last={last})");
//!         let _ = ws.request(1);
//!         None
//!     }
//! }
//! ```

use bytes::Bytes;

use crate::endpoint::WebSocket;
use crate::error::WsError;
use crate::transport::BoxFuture;

/// Future a listener returns to signal it is done with an event.
///
/// For `on_close` the endpoint replies with a close message once it resolves.
pub type CompletionSignal = BoxFuture<'static, ()>;

/// Receives the events of a WebSocket endpoint.
pub trait Listener: Send + Sync + 'static {
    /// The endpoint is open. Called exactly once, before any other method.
    fn on_open(&self, ws: &WebSocket) {
        let _ = ws.request(1);
    }

    /// A text fragment was received.
    fn on_text(&self, ws: &WebSocket, data: String, last: bool) -> Option<CompletionSignal> {
        let _ = (data, last);
        let _ = ws.request(1);
        None
    }

    /// A binary fragment was received.
    fn on_binary(&self, ws: &WebSocket, data: Bytes, last: bool) -> Option<CompletionSignal> {
        let _ = (data, last);
        let _ = ws.request(1);
        None
    }

    /// A ping was received. The endpoint replies with a pong on its own.
    fn on_ping(&self, ws: &WebSocket, data: Bytes) -> Option<CompletionSignal> {
        let _ = data;
        let _ = ws.request(1);
        None
    }

    /// A pong was received.
    fn on_pong(&self, ws: &WebSocket, data: Bytes) -> Option<CompletionSignal> {
        let _ = data;
        let _ = ws.request(1);
        None
    }

    /// The peer closed the connection, or the stream ended abnormally (1006).
    ///
    /// Input is closed. The endpoint sends a close reply once the returned
    /// signal resolves (immediately for `None`).
    fn on_close(&self, ws: &WebSocket, code: u16, reason: String) -> Option<CompletionSignal> {
        let _ = (ws, code, reason);
        None
    }

    /// The endpoint failed. Input and output are closed.
    fn on_error(&self, ws: &WebSocket, error: WsError) {
        let _ = ws;
        tracing::debug!("Unhandled WebSocket error: {}", error);
    }
}
