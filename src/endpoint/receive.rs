//! Receive side: state transitions and the dispatch task.
//!
//! Transport callbacks only park a payload and move the state off WAITING;
//! all listener calls happen in [`Shared::dispatch`], which the sequential
//! scheduler never runs on two threads at once. The transport is asked for
//! exactly one message each time the state moves from IDLE to WAITING, so
//! the single payload slot is never overwritten before it is consumed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use bytes::Bytes;

use super::state::ReceiveState;
use super::Shared;
use crate::error::{Result, WsError};
use crate::protocol::{status, CloseStatus, Inbound};
use crate::transport::MessageConsumer;

impl Shared {
    pub(super) fn signal_open(self: &Arc<Self>) {
        tracing::debug!("signal open");
        self.schedule();
    }

    /// Record a received close (or end of stream) and move to CLOSE.
    fn signal_close(self: &Arc<Self>, code: u16, reason: String) {
        self.input_closed.store(true, Ordering::Release);
        if self.close_signalled.swap(true, Ordering::AcqRel) {
            tracing::debug!("Ignoring close {} after an earlier one", code);
            return;
        }
        tracing::debug!("signal close code={} reason.length={}", code, reason.len());
        self.close_status
            .store(Some(Arc::new(CloseStatus::new(code, reason))));
        if self.try_set_state(ReceiveState::Close) {
            if let Err(e) = self.transport.close_input() {
                tracing::warn!("Failed to close input: {}", e);
            }
        }
    }

    /// Record a failure and move to ERROR. Only the first error is kept.
    pub(super) fn signal_error(self: &Arc<Self>, error: WsError) {
        tracing::debug!("signal error: {}", error);
        self.input_closed.store(true, Ordering::Release);
        self.output_closed.store(true, Ordering::Release);

        if self.error_signalled.swap(true, Ordering::AcqRel) {
            tracing::error!("Error after the endpoint already failed: {}", error);
            return;
        }
        let close_code = error.close_code();
        self.error.store(Some(Arc::new(error.clone())));
        if !self.try_set_state(ReceiveState::Error) {
            tracing::error!("Error after the endpoint closed: {}", error);
            return;
        }

        // A protocol violation still has to tell the peer; output is closed
        // once that close is written.
        if close_code.is_some() {
            if let Err(e) = self.transport.close_input() {
                tracing::warn!("Failed to close input: {}", e);
            }
        } else {
            self.close_transport();
        }
    }

    /// Move to `new` from any non-terminal state.
    fn try_set_state(self: &Arc<Self>, new: ReceiveState) -> bool {
        match self.state.try_set(new) {
            Ok(previous) => {
                tracing::debug!("set state {:?} (previous {:?})", new, previous);
                self.schedule();
                true
            }
            Err(terminal) => {
                tracing::debug!("set state {:?} refused in {:?}", new, terminal);
                false
            }
        }
    }

    /// Move from `expected` to `new`.
    ///
    /// # Panics
    ///
    /// Panics if the state is neither `expected` nor terminal.
    fn try_change_state(self: &Arc<Self>, expected: ReceiveState, new: ReceiveState) -> bool {
        match self.state.compare_exchange(expected, new) {
            Ok(()) => {
                tracing::debug!("change state from {:?} to {:?}", expected, new);
                self.schedule();
                true
            }
            Err(witness) if witness.is_terminal() => {
                tracing::debug!(
                    "change state from {:?} to {:?} refused in {:?}",
                    expected,
                    new,
                    witness
                );
                false
            }
            Err(witness) => panic!(
                "receive state is {:?}, expected {:?} on the way to {:?}",
                witness, expected, new
            ),
        }
    }

    /// Body of the receive task.
    pub(super) fn dispatch(self: &Arc<Self>) {
        tracing::debug!("enter receive task");
        while !self.scheduler.is_stopped() {
            let state = self.state.get();
            tracing::debug!("receive state: {:?}", state);
            let processed = match state {
                ReceiveState::Open => self
                    .process_open()
                    .map(|()| self.try_change_state(ReceiveState::Open, ReceiveState::Idle)),
                ReceiveState::Text
                | ReceiveState::Binary
                | ReceiveState::Ping
                | ReceiveState::Pong => self
                    .process_message(state)
                    .map(|()| self.try_change_state(state, ReceiveState::Idle)),
                ReceiveState::Idle => {
                    if self.demand.try_decrement()
                        && self.try_change_state(ReceiveState::Idle, ReceiveState::Waiting)
                    {
                        self.transport.request(1);
                    }
                    break;
                }
                ReceiveState::Waiting => break,
                ReceiveState::Close => {
                    self.process_close();
                    break;
                }
                ReceiveState::Error => {
                    self.process_error();
                    break;
                }
            };
            if let Err(e) = processed {
                self.signal_error(e);
            }
        }
        tracing::debug!("exit receive task");
    }

    fn process_open(self: &Arc<Self>) -> Result<()> {
        let ws = self.handle();
        self.call_listener("onOpen", || self.listener.on_open(&ws))
    }

    fn process_message(self: &Arc<Self>, state: ReceiveState) -> Result<()> {
        let inbound = match self.inbound.swap(None) {
            Some(inbound) => Arc::try_unwrap(inbound).unwrap_or_else(|shared| (*shared).clone()),
            None => panic!("no pending payload in state {:?}", state),
        };
        tracing::debug!("process {} length={}", inbound.kind(), inbound.len());

        let ws = self.handle();
        let signal = match inbound {
            Inbound::Text { data, last } => {
                self.call_listener("onText", || self.listener.on_text(&ws, data, last))?
            }
            Inbound::Binary { data, last } => {
                self.call_listener("onBinary", || self.listener.on_binary(&ws, data, last))?
            }
            Inbound::Ping(data) => {
                self.reply_pong(&data);
                self.call_listener("onPing", || self.listener.on_ping(&ws, data))?
            }
            Inbound::Pong(data) => {
                self.call_listener("onPong", || self.listener.on_pong(&ws, data))?
            }
        };
        if let Some(signal) = signal {
            self.runtime.spawn(signal);
        }
        Ok(())
    }

    /// Answer a ping through the automatic pong slot.
    fn reply_pong(self: &Arc<Self>, data: &Bytes) {
        if self.output_closed.load(Ordering::Acquire) {
            return;
        }
        if self.automatic_pong.swap_in(data.clone()) {
            return;
        }

        let slot = self.automatic_pong.clone();
        let send = self
            .transport
            .send_automatic_pong(Box::new(move || slot.take()));
        let endpoint = Arc::downgrade(self);
        self.runtime.spawn(async move {
            match send.await {
                Ok(()) => {}
                Err(WsError::OutputClosed) => tracing::debug!("Automatic pong after output closed"),
                Err(e) => {
                    if let Some(shared) = endpoint.upgrade() {
                        shared.signal_error(e);
                    }
                }
            }
        });
    }

    fn process_close(self: &Arc<Self>) {
        tracing::debug!("process close");
        if let Err(e) = self.transport.close_input() {
            tracing::warn!("Failed to close input: {}", e);
        }
        self.scheduler.stop();

        let CloseStatus { code, reason } = match self.close_status.load_full() {
            Some(status) => (*status).clone(),
            None => panic!("close state without a close status"),
        };

        let ws = self.handle();
        let signal = match self.call_listener("onClose", || self.listener.on_close(&ws, code, reason)) {
            Ok(signal) => signal,
            Err(e) => {
                // Still reply to the peer below
                tracing::error!("{}", e);
                None
            }
        };

        let reply = status::normalize_echo_code(code);
        if reply != code {
            tracing::debug!("using status code {} instead of {}", reply, code);
        }
        let shared = self.clone();
        self.runtime.spawn(async move {
            if let Some(signal) = signal {
                signal.await;
            }
            if shared.output_closed.swap(true, Ordering::AcqRel) {
                tracing::debug!("Close already sent, not replying");
                return;
            }
            shared.send_close_silently(reply);
        });
    }

    fn process_error(self: &Arc<Self>) {
        tracing::debug!("process error");
        if let Err(e) = self.transport.close_input() {
            tracing::warn!("Failed to close input: {}", e);
        }
        self.scheduler.stop();

        let error = match self.error.load_full() {
            Some(error) => (*error).clone(),
            None => panic!("error state without an error"),
        };
        if let Some(code) = error.close_code() {
            tracing::debug!("failing connection with status code {}: {}", code, error);
            self.send_close_silently(code);
        }

        let ws = self.handle();
        if let Err(e) = self.call_listener("onError", || self.listener.on_error(&ws, error)) {
            tracing::error!("{}", e);
        }
    }

    /// Invoke a listener method, turning a panic into an error.
    fn call_listener<R>(&self, event: &'static str, call: impl FnOnce() -> R) -> Result<R> {
        let id = self.next_receive_id();
        tracing::debug!("enter {} {}", event, id);
        let _exit = ExitLog { event, id };
        panic::catch_unwind(AssertUnwindSafe(call))
            .map_err(|payload| WsError::Listener(format!("{}: {}", event, panic_message(&*payload))))
    }
}

/// Logs the end of a listener call, including when it unwinds.
struct ExitLog {
    event: &'static str,
    id: u64,
}

impl Drop for ExitLog {
    fn drop(&mut self) {
        tracing::debug!("exit {} {}", self.event, self.id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The consumer handed to the transport.
///
/// Holds the endpoint weakly so the transport does not keep it alive.
pub(crate) struct SignallingConsumer {
    endpoint: Weak<Shared>,
}

impl SignallingConsumer {
    pub(super) fn new(endpoint: Weak<Shared>) -> Self {
        Self { endpoint }
    }

    /// Acknowledge the event and return the endpoint, if still alive.
    fn receive(&self) -> Option<Arc<Shared>> {
        let shared = self.endpoint.upgrade()?;
        shared.transport.acknowledge_reception();
        Some(shared)
    }

    fn deliver(&self, inbound: Inbound, state: ReceiveState) {
        if let Some(shared) = self.receive() {
            shared.inbound.store(Some(Arc::new(inbound)));
            shared.try_change_state(ReceiveState::Waiting, state);
        }
    }
}

impl MessageConsumer for SignallingConsumer {
    fn on_text(&self, data: String, last: bool) {
        self.deliver(Inbound::Text { data, last }, ReceiveState::Text);
    }

    fn on_binary(&self, data: Bytes, last: bool) {
        self.deliver(Inbound::Binary { data, last }, ReceiveState::Binary);
    }

    fn on_ping(&self, data: Bytes) {
        self.deliver(Inbound::Ping(data), ReceiveState::Ping);
    }

    fn on_pong(&self, data: Bytes) {
        self.deliver(Inbound::Pong(data), ReceiveState::Pong);
    }

    fn on_close(&self, code: u16, reason: String) {
        if let Some(shared) = self.receive() {
            shared.signal_close(code, reason);
        }
    }

    fn on_complete(&self) {
        if let Some(shared) = self.receive() {
            shared.signal_close(status::CLOSED_ABNORMALLY, String::new());
        }
    }

    fn on_error(&self, error: WsError) {
        if let Some(shared) = self.endpoint.upgrade() {
            shared.signal_error(error);
        }
    }
}
