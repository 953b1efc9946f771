//! In-memory transport that records every call.
//!
//! Useful for testing listeners without a socket: build the endpoint with
//! [`RecordingTransport::factory`], push inbound events through
//! [`RecordingTransport::consumer`], and inspect what the endpoint did with
//! [`RecordingTransport::events`].
//!
//! # Example
//!
//! ```ignore
//! let transport = RecordingTransport::new();
//! let ws = WebSocket::with_transport(listener, "", EndpointConfig::default(), transport.factory())?;
//!
//! transport.consumer().unwrap().on_text("hello".into(), true);
//! assert!(transport.events().contains(&Recorded::Request(1)));
//! ```

use std::future::{pending, ready};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;

use super::{MessageConsumer, PongSupplier, SendFuture, Transport};
use crate::error::{Result, WsError};

/// A call observed by a [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Text { data: String, last: bool },
    Binary { data: Bytes, last: bool },
    Ping(Bytes),
    Pong(Bytes),
    /// Automatic pong, recorded with the payload its supplier produced.
    AutomaticPong(Bytes),
    Close { code: u16, reason: String },
    Request(u64),
    CloseInput,
    CloseOutput,
}

/// Cloneable handle to a recording transport; clones share state.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    consumer: Option<Arc<dyn MessageConsumer>>,
    events: Vec<Recorded>,
    acknowledged: u64,
    hold_sends: bool,
    held: Vec<oneshot::Sender<Result<()>>>,
    stall_close: bool,
    defer_pongs: bool,
    deferred_pongs: Vec<(PongSupplier, oneshot::Sender<Result<()>>)>,
}

impl RecordingTransport {
    /// Create an empty recording transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory to pass to `WebSocket::with_transport`. Captures the consumer.
    pub fn factory(&self) -> impl FnOnce(Arc<dyn MessageConsumer>) -> RecordingTransport {
        let transport = self.clone();
        move |consumer| {
            transport.lock().consumer = Some(consumer);
            transport
        }
    }

    /// Consumer handed over by the endpoint, once created.
    pub fn consumer(&self) -> Option<Arc<dyn MessageConsumer>> {
        self.lock().consumer.clone()
    }

    /// Snapshot of all recorded calls, in order.
    pub fn events(&self) -> Vec<Recorded> {
        self.lock().events.clone()
    }

    /// Number of `acknowledge_reception` calls.
    pub fn acknowledged(&self) -> u64 {
        self.lock().acknowledged
    }

    /// Keep data and control sends pending until [`release`](Self::release).
    pub fn hold_sends(&self) {
        self.lock().hold_sends = true;
    }

    /// Complete every held send successfully and stop holding.
    pub fn release(&self) {
        let held = {
            let mut inner = self.lock();
            inner.hold_sends = false;
            std::mem::take(&mut inner.held)
        };
        for done in held {
            let _ = done.send(Ok(()));
        }
    }

    /// Make close sends never complete.
    pub fn stall_close(&self) {
        self.lock().stall_close = true;
    }

    /// Keep automatic pongs unwritten until [`flush_automatic_pongs`](Self::flush_automatic_pongs).
    pub fn defer_automatic_pongs(&self) {
        self.lock().defer_pongs = true;
    }

    /// Write every deferred automatic pong and stop deferring.
    pub fn flush_automatic_pongs(&self) {
        let deferred = {
            let mut inner = self.lock();
            inner.defer_pongs = false;
            std::mem::take(&mut inner.deferred_pongs)
        };
        for (payload, done) in deferred {
            let data = payload();
            self.record(Recorded::AutomaticPong(data));
            let _ = done.send(Ok(()));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: Recorded) {
        tracing::debug!("Recorded {:?}", event);
        self.lock().events.push(event);
    }

    /// Record a data or control send, holding it if requested.
    fn send(&self, event: Recorded) -> SendFuture {
        let mut inner = self.lock();
        inner.events.push(event);
        if !inner.hold_sends {
            return Box::pin(ready(Ok(())));
        }
        let (done, completion) = oneshot::channel();
        inner.held.push(done);
        Box::pin(async move { completion.await.unwrap_or(Err(WsError::ConnectionClosed)) })
    }
}

impl Transport for RecordingTransport {
    fn send_text(&self, text: String, last: bool) -> SendFuture {
        self.send(Recorded::Text { data: text, last })
    }

    fn send_binary(&self, data: Bytes, last: bool) -> SendFuture {
        self.send(Recorded::Binary { data, last })
    }

    fn send_ping(&self, data: Bytes) -> SendFuture {
        self.send(Recorded::Ping(data))
    }

    fn send_pong(&self, data: Bytes) -> SendFuture {
        self.send(Recorded::Pong(data))
    }

    fn send_automatic_pong(&self, payload: PongSupplier) -> SendFuture {
        {
            let mut inner = self.lock();
            if inner.defer_pongs {
                let (done, completion) = oneshot::channel();
                inner.deferred_pongs.push((payload, done));
                return Box::pin(async move {
                    completion.await.unwrap_or(Err(WsError::ConnectionClosed))
                });
            }
        }
        self.record(Recorded::AutomaticPong(payload()));
        Box::pin(ready(Ok(())))
    }

    fn send_close(&self, code: u16, reason: String) -> SendFuture {
        let stall = {
            let mut inner = self.lock();
            inner.events.push(Recorded::Close { code, reason });
            inner.stall_close
        };
        if stall {
            Box::pin(pending())
        } else {
            Box::pin(ready(Ok(())))
        }
    }

    fn request(&self, n: u64) {
        self.record(Recorded::Request(n));
    }

    fn acknowledge_reception(&self) {
        self.lock().acknowledged += 1;
    }

    fn close_input(&self) -> io::Result<()> {
        self.record(Recorded::CloseInput);
        Ok(())
    }

    fn close_output(&self) -> io::Result<()> {
        self.record(Recorded::CloseOutput);
        Ok(())
    }
}

impl std::fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("RecordingTransport")
            .field("events", &inner.events)
            .field("acknowledged", &inner.acknowledged)
            .finish()
    }
}
