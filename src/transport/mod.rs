//! Transport module - the byte-level collaborator of the endpoint.
//!
//! The endpoint never touches frames or sockets. It talks to a [`Transport`]
//! that sends messages and closes stream directions, and it receives decoded
//! messages through the [`MessageConsumer`] it hands to the transport on
//! creation.
//!
//! Provided implementations:
//! - [`StreamTransport`] - frames a byte stream with the RFC 6455 codec
//! - [`RecordingTransport`] - in-memory, records every call (for testing listeners)
//!
//! # Delivery contract
//!
//! A transport delivers at most one inbound event per unit requested through
//! [`Transport::request`], and never delivers the next event before the
//! endpoint has asked for it. The endpoint keeps a single pending-message
//! slot and relies on this ordering.

mod recording;
mod stream;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, WsError};

pub use recording::{Recorded, RecordingTransport};
pub use stream::StreamTransport;

/// Boxed future used across the transport and listener seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a send operation.
pub type SendFuture = BoxFuture<'static, Result<()>>;

/// Produces the payload of an automatic pong at the moment it is written.
pub type PongSupplier = Box<dyn FnOnce() -> Bytes + Send>;

/// Send primitives and stream control offered to the endpoint.
///
/// Send methods start the operation when called and return a future that
/// resolves once the message has been written (or failed).
pub trait Transport: Send + Sync + 'static {
    /// Send a text fragment.
    fn send_text(&self, text: String, last: bool) -> SendFuture;

    /// Send a binary fragment.
    fn send_binary(&self, data: Bytes, last: bool) -> SendFuture;

    /// Send a ping.
    fn send_ping(&self, data: Bytes) -> SendFuture;

    /// Send a pong.
    fn send_pong(&self, data: Bytes) -> SendFuture;

    /// Send a pong whose payload is taken from `payload` when the write happens.
    fn send_automatic_pong(&self, payload: PongSupplier) -> SendFuture;

    /// Send a close message. The code is not validated here.
    fn send_close(&self, code: u16, reason: String) -> SendFuture;

    /// Allow `n` more inbound messages to be delivered to the consumer.
    fn request(&self, n: u64);

    /// Called by the consumer on every inbound event before processing it.
    fn acknowledge_reception(&self);

    /// Stop reading. Idempotent.
    fn close_input(&self) -> io::Result<()>;

    /// Stop writing. Idempotent.
    fn close_output(&self) -> io::Result<()>;
}

/// Receiver of decoded inbound events, implemented by the endpoint.
pub trait MessageConsumer: Send + Sync + 'static {
    /// A text fragment arrived.
    fn on_text(&self, data: String, last: bool);

    /// A binary fragment arrived.
    fn on_binary(&self, data: Bytes, last: bool);

    /// A ping arrived.
    fn on_ping(&self, data: Bytes);

    /// A pong arrived.
    fn on_pong(&self, data: Bytes);

    /// A close message arrived.
    fn on_close(&self, code: u16, reason: String);

    /// The stream ended without a close message.
    fn on_complete(&self);

    /// Receiving failed.
    fn on_error(&self, error: WsError);
}

/// Creates the transport for an endpoint, given the consumer it must feed.
///
/// Implemented for any `FnOnce(Arc<dyn MessageConsumer>) -> T`.
pub trait TransportFactory {
    /// Transport produced by this factory.
    type Transport: Transport;

    /// Create the transport.
    fn create_transport(self, consumer: Arc<dyn MessageConsumer>) -> Self::Transport;
}

impl<F, T> TransportFactory for F
where
    F: FnOnce(Arc<dyn MessageConsumer>) -> T,
    T: Transport,
{
    type Transport = T;

    fn create_transport(self, consumer: Arc<dyn MessageConsumer>) -> T {
        self(consumer)
    }
}
