//! Automatic pong coalescing.
//!
//! Every inbound ping must be answered, but answering a burst of pings with
//! a burst of pongs would queue unbounded output. Instead the endpoint keeps
//! one slot: a new ping payload replaces any pong that has not been written
//! yet, and only an empty slot triggers a new send. The send's payload
//! supplier empties the slot when the transport writes it, so the pong on
//! the wire always carries the latest ping data.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tracing::debug;

/// Single-slot buffer for the next automatic pong.
#[derive(Debug)]
pub(crate) struct AutomaticPong {
    slot: ArcSwapOption<Bytes>,
}

impl AutomaticPong {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: ArcSwapOption::empty(),
        })
    }

    /// Put `payload` in the slot.
    ///
    /// Returns `true` if it replaced a pong that is still waiting to be
    /// written; the caller must then not issue another send.
    pub(crate) fn swap_in(&self, payload: Bytes) -> bool {
        let len = payload.len();
        let previous = self.slot.swap(Some(Arc::new(payload)));
        let swapped = previous.is_some();
        debug!(
            "Automatic pong slot {} ({} bytes)",
            if swapped { "replaced" } else { "filled" },
            len
        );
        swapped
    }

    /// Take the pending payload, leaving the slot empty.
    ///
    /// # Panics
    ///
    /// Panics if the slot is empty: a supplier only exists for a filled slot.
    pub(crate) fn take(&self) -> Bytes {
        match self.slot.swap(None) {
            Some(payload) => Arc::try_unwrap(payload).unwrap_or_else(|shared| (*shared).clone()),
            None => panic!("automatic pong taken from an empty slot"),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.slot.load().is_none()
    }
}
