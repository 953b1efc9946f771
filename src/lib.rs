//! # duplex-ws
//!
//! Full-duplex WebSocket client endpoint.
//!
//! The send and receive paths are independent. Sends go straight to the
//! transport and return futures; at most one data message (text/binary) and
//! one control message (ping/pong) can be in flight at a time. Received
//! messages are delivered to a [`Listener`] one at a time, and only as many
//! as the application asked for with [`WebSocket::request`].
//!
//! ## Architecture
//!
//! - **Endpoint** ([`WebSocket`]): receive state machine, send guards, close handshake
//! - **Transport** ([`transport::Transport`]): byte-level collaborator, e.g. [`StreamTransport`]
//! - **Listener** ([`Listener`]): application callbacks
//!
//! ## Example
//!
//! ```ignore
//! use duplex_ws::{CompletionSignal, Listener, WebSocket};
//!
//! struct Echo;
//!
//! impl Listener for Echo {
//!     fn on_text(&self, ws: &WebSocket, text: String, last: bool) -> Option<CompletionSignal> {
//!         let ws = ws.clone();
//!         Some(Box::pin(async move {
//!             let _ = ws.send_text(text, last).await;
//!             let _ = ws.request(1);
//!         }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> duplex_ws::Result<()> {
//!     let ws = WebSocket::builder(Echo).connect("ws://localhost:9001").await?;
//!     ws.send_text("hello", true).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod demand;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod scheduler;
pub mod transport;

mod client;
mod endpoint;

pub use client::WebSocketBuilder;
pub use config::EndpointConfig;
pub use endpoint::{ReceiveState, WebSocket};
pub use error::{Result, WsError};
pub use listener::{CompletionSignal, Listener};
pub use transport::{RecordingTransport, StreamTransport};
