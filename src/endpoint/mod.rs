//! The WebSocket endpoint.
//!
//! A [`WebSocket`] ties one [`Transport`] to one [`Listener`]. Sends go
//! straight to the transport, guarded so that at most one data message and
//! at most one control message are in flight. Inbound events move the
//! receive state machine (see [`ReceiveState`]), and a sequential scheduler
//! dispatches them to the listener one at a time, as demand allows.
//!
//! # Example
//!
//! ```ignore
//! let ws = WebSocket::builder(MyListener).connect("ws://localhost:9001").await?;
//! ws.send_text("hello", true).await?;
//! ws.send_close(status::NORMAL_CLOSURE, "done").await?;
//! ```

mod close;
mod guard;
mod pong;
mod receive;
mod state;

use std::future::ready;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tokio::runtime::Handle;

use crate::client::WebSocketBuilder;
use crate::config::EndpointConfig;
use crate::demand::Demand;
use crate::error::{Result, WsError};
use crate::listener::Listener;
use crate::protocol::{status, CloseStatus, Inbound};
use crate::scheduler::SequentialScheduler;
use crate::transport::{SendFuture, Transport, TransportFactory};

use guard::{PendingFlag, SendGuard};
use pong::AutomaticPong;
use receive::SignallingConsumer;
use state::StateCell;

pub use state::ReceiveState;

/// A full-duplex WebSocket endpoint.
///
/// Cheap to clone; clones refer to the same connection. The connection is
/// torn down when the last handle is dropped.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
}

/// State shared by every handle, the receive task and the transport callbacks.
pub(crate) struct Shared {
    transport: Box<dyn Transport>,
    listener: Box<dyn Listener>,
    uri: String,
    subprotocol: String,
    close_timeout: Duration,
    runtime: Handle,

    // Receive side
    state: StateCell,
    scheduler: SequentialScheduler,
    demand: Demand,
    input_closed: AtomicBool,
    inbound: ArcSwapOption<Inbound>,
    close_status: ArcSwapOption<CloseStatus>,
    close_signalled: AtomicBool,
    error: ArcSwapOption<WsError>,
    error_signalled: AtomicBool,

    // Send side
    data_send: Arc<PendingFlag>,
    control_send: Arc<PendingFlag>,
    output_closed: AtomicBool,
    automatic_pong: Arc<AutomaticPong>,

    send_ids: AtomicU64,
    receive_ids: AtomicU64,
}

impl WebSocket {
    /// Start configuring a client endpoint.
    pub fn builder<L: Listener>(listener: L) -> WebSocketBuilder<L> {
        WebSocketBuilder::new(listener)
    }

    /// Create an endpoint over a transport built by `factory`.
    ///
    /// The handshake is assumed done; `subprotocol` is the negotiated one
    /// (empty if none). `on_open` is invoked before this returns.
    ///
    /// # Errors
    ///
    /// Returns `NoRuntime` when called outside of a Tokio runtime.
    pub fn with_transport<L, F>(
        listener: L,
        subprotocol: impl Into<String>,
        config: EndpointConfig,
        factory: F,
    ) -> Result<WebSocket>
    where
        L: Listener,
        F: TransportFactory,
    {
        Self::create(listener, String::new(), subprotocol.into(), config, factory)
    }

    pub(crate) fn create<L, F>(
        listener: L,
        uri: String,
        subprotocol: String,
        config: EndpointConfig,
        factory: F,
    ) -> Result<WebSocket>
    where
        L: Listener,
        F: TransportFactory,
    {
        let runtime = Handle::try_current().map_err(|_| WsError::NoRuntime)?;

        let shared = Arc::new_cyclic(|weak| {
            let consumer = Arc::new(SignallingConsumer::new(weak.clone()));
            let transport = factory.create_transport(consumer);
            Shared {
                transport: Box::new(transport),
                listener: Box::new(listener),
                uri,
                subprotocol,
                close_timeout: config.close_timeout,
                runtime,
                state: StateCell::new(),
                scheduler: SequentialScheduler::new(),
                demand: Demand::new(),
                input_closed: AtomicBool::new(false),
                inbound: ArcSwapOption::empty(),
                close_status: ArcSwapOption::empty(),
                close_signalled: AtomicBool::new(false),
                error: ArcSwapOption::empty(),
                error_signalled: AtomicBool::new(false),
                data_send: PendingFlag::new(),
                control_send: PendingFlag::new(),
                output_closed: AtomicBool::new(false),
                automatic_pong: AutomaticPong::new(),
                send_ids: AtomicU64::new(0),
                receive_ids: AtomicU64::new(0),
            }
        });

        tracing::debug!(
            "Created endpoint uri={:?} subprotocol={:?} close_timeout={:?}",
            shared.uri,
            shared.subprotocol,
            shared.close_timeout
        );
        shared.signal_open();
        Ok(WebSocket { shared })
    }

    /// Send a text fragment.
    ///
    /// Fails with `SendPending` if another text or binary send has not
    /// completed yet, and with `OutputClosed` after a close was sent.
    pub fn send_text(&self, data: impl Into<String>, last: bool) -> SendFuture {
        let data = data.into();
        let id = self.shared.next_send_id();
        tracing::debug!("enter send text {} length={} last={}", id, data.len(), last);
        let result = match self.shared.acquire(&self.shared.data_send) {
            Ok(guard) => guarded(guard, self.shared.transport.send_text(data, last)),
            Err(e) => rejected(e),
        };
        tracing::debug!("exit send text {}", id);
        result
    }

    /// Send a binary fragment.
    pub fn send_binary(&self, data: Bytes, last: bool) -> SendFuture {
        let id = self.shared.next_send_id();
        tracing::debug!("enter send binary {} length={} last={}", id, data.len(), last);
        let result = match self.shared.acquire(&self.shared.data_send) {
            Ok(guard) => guarded(guard, self.shared.transport.send_binary(data, last)),
            Err(e) => rejected(e),
        };
        tracing::debug!("exit send binary {}", id);
        result
    }

    /// Send a ping.
    ///
    /// Fails with `SendPending` if another ping or pong has not completed yet.
    pub fn send_ping(&self, data: Bytes) -> SendFuture {
        let id = self.shared.next_send_id();
        tracing::debug!("enter send ping {} length={}", id, data.len());
        let result = match self.shared.acquire(&self.shared.control_send) {
            Ok(guard) => guarded(guard, self.shared.transport.send_ping(data)),
            Err(e) => rejected(e),
        };
        tracing::debug!("exit send ping {}", id);
        result
    }

    /// Send an unsolicited pong.
    pub fn send_pong(&self, data: Bytes) -> SendFuture {
        let id = self.shared.next_send_id();
        tracing::debug!("enter send pong {} length={}", id, data.len());
        let result = match self.shared.acquire(&self.shared.control_send) {
            Ok(guard) => guarded(guard, self.shared.transport.send_pong(data)),
            Err(e) => rejected(e),
        };
        tracing::debug!("exit send pong {}", id);
        result
    }

    /// Send a close message and close output.
    ///
    /// Only codes a client may send are accepted, and the reason must fit in
    /// 123 UTF-8 bytes. Output is marked closed before the message is
    /// written; any later call fails with `OutputClosed`. If the message is
    /// not written within the close timeout, both directions are closed and
    /// the future fails with `CloseTimedOut`.
    pub fn send_close(&self, code: u16, reason: impl Into<String>) -> SendFuture {
        let reason = reason.into();
        let id = self.shared.next_send_id();
        tracing::debug!(
            "enter send close {} code={} reason.length={}",
            id,
            code,
            reason.len()
        );
        let result = if !status::is_legal_to_send_from_client(code) {
            rejected(WsError::IllegalStatusCode(code))
        } else if !status::is_legal_reason(&reason) {
            rejected(WsError::IllegalReason(reason.len()))
        } else if self.shared.output_closed.swap(true, Ordering::AcqRel) {
            rejected(WsError::OutputClosed)
        } else {
            self.shared.send_close0(code, reason)
        };
        tracing::debug!("exit send close {}", id);
        result
    }

    /// Outstanding demand not yet used by a delivery.
    pub fn demand(&self) -> u64 {
        self.shared.demand.get()
    }

    /// Allow `n` more messages to be delivered to the listener.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if `n` is zero.
    pub fn request(&self, n: u64) -> Result<()> {
        tracing::debug!("request {}", n);
        if self.shared.demand.increase(n)? {
            self.shared.schedule();
        }
        Ok(())
    }

    /// URI the endpoint connected to, empty when built over a custom transport.
    pub fn uri(&self) -> &str {
        &self.shared.uri
    }

    /// Negotiated subprotocol, empty if none.
    pub fn subprotocol(&self) -> &str {
        &self.shared.subprotocol
    }

    /// Whether no more messages will be sent by this endpoint.
    pub fn is_output_closed(&self) -> bool {
        self.shared.output_closed.load(Ordering::Acquire)
    }

    /// Whether no more messages will be delivered to the listener.
    pub fn is_input_closed(&self) -> bool {
        self.shared.input_closed.load(Ordering::Acquire)
    }

    /// Close-handshake timeout in effect.
    pub fn close_timeout(&self) -> Duration {
        self.shared.close_timeout
    }

    /// Current receive state.
    pub fn receive_state(&self) -> ReceiveState {
        self.shared.state.get()
    }

    /// Close both directions immediately, without a close handshake.
    ///
    /// No listener method is invoked afterwards.
    pub fn abort(&self) {
        tracing::debug!("abort");
        self.shared.input_closed.store(true, Ordering::Release);
        self.shared.output_closed.store(true, Ordering::Release);
        self.shared.scheduler.stop();
        let dropped = self.shared.demand.reset();
        if dropped > 0 {
            tracing::debug!("dropped demand {}", dropped);
        }
        self.shared.close_transport();
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("uri", &self.shared.uri)
            .field("subprotocol", &self.shared.subprotocol)
            .field("state", &self.shared.state.get())
            .field("input_closed", &self.is_input_closed())
            .field("output_closed", &self.is_output_closed())
            .field("data_send_pending", &self.shared.data_send.is_pending())
            .field("control_send_pending", &self.shared.control_send.is_pending())
            .finish()
    }
}

impl Shared {
    /// Handle to pass to listener methods.
    fn handle(self: &Arc<Self>) -> WebSocket {
        WebSocket {
            shared: self.clone(),
        }
    }

    fn next_send_id(&self) -> u64 {
        self.send_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn next_receive_id(&self) -> u64 {
        self.receive_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Claim a send guard, checking output first.
    fn acquire(&self, flag: &Arc<PendingFlag>) -> Result<SendGuard> {
        if self.output_closed.load(Ordering::Acquire) {
            return Err(WsError::OutputClosed);
        }
        flag.try_acquire().ok_or(WsError::SendPending)
    }

    /// Trigger the receive task.
    fn schedule(self: &Arc<Self>) {
        self.scheduler.run_or_schedule(|| self.dispatch());
    }
}

/// Release `guard` once `send` completes, fails or is dropped.
fn guarded(guard: SendGuard, send: SendFuture) -> SendFuture {
    Box::pin(async move {
        let _guard = guard;
        send.await
    })
}

fn rejected(error: WsError) -> SendFuture {
    tracing::debug!("Send rejected: {}", error);
    Box::pin(ready(Err(error)))
}
