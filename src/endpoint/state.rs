//! Receive state and its atomic cell.
//!
//! ```text
//! OPEN ──► IDLE ──► WAITING ──► TEXT | BINARY | PING | PONG ──► IDLE
//!                      │
//!                      └──────► CLOSE | ERROR        (terminal)
//! ```
//!
//! Any non-terminal state may also jump straight to CLOSE or ERROR.

use std::sync::atomic::{AtomicU8, Ordering};

/// Receive-side state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReceiveState {
    /// Initial state; `on_open` has not returned yet.
    Open = 0,
    /// Waiting for demand before asking the transport for a message.
    Idle = 1,
    /// One message requested from the transport.
    Waiting = 2,
    /// A text fragment is pending dispatch.
    Text = 3,
    /// A binary fragment is pending dispatch.
    Binary = 4,
    /// A ping is pending dispatch.
    Ping = 5,
    /// A pong is pending dispatch.
    Pong = 6,
    /// Close received or stream ended. Terminal.
    Close = 7,
    /// Endpoint failed. Terminal.
    Error = 8,
}

impl ReceiveState {
    /// Whether no further transitions can happen.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Close | Self::Error)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Idle,
            2 => Self::Waiting,
            3 => Self::Text,
            4 => Self::Binary,
            5 => Self::Ping,
            6 => Self::Pong,
            7 => Self::Close,
            8 => Self::Error,
            other => unreachable!("invalid receive state {other}"),
        }
    }
}

/// Atomically updated [`ReceiveState`].
#[derive(Debug)]
pub(crate) struct StateCell {
    value: AtomicU8,
}

impl StateCell {
    /// New cell in the `Open` state.
    pub(crate) fn new() -> Self {
        Self {
            value: AtomicU8::new(ReceiveState::Open as u8),
        }
    }

    #[inline]
    pub(crate) fn get(&self) -> ReceiveState {
        ReceiveState::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Move from `expected` to `new`; on failure returns the witnessed state.
    pub(crate) fn compare_exchange(
        &self,
        expected: ReceiveState,
        new: ReceiveState,
    ) -> Result<(), ReceiveState> {
        self.value
            .compare_exchange(expected as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ReceiveState::from_u8)
    }

    /// Move to `new` from whatever non-terminal state is current.
    ///
    /// Returns the previous state, or the terminal state that blocked the move.
    pub(crate) fn try_set(&self, new: ReceiveState) -> Result<ReceiveState, ReceiveState> {
        let mut current = self.get();
        loop {
            if current.is_terminal() {
                return Err(current);
            }
            match self.compare_exchange(current, new) {
                Ok(()) => return Ok(current),
                Err(witness) => current = witness,
            }
        }
    }
}
