//! Receive demand tracking.
//!
//! [`Demand`] counts how many more inbound messages the application is
//! ready to receive. It is increased by `request(n)` and consumed one unit
//! at a time before the next message is requested from the transport.
//!
//! The counter saturates at `u64::MAX`; requesting that many messages is
//! treated as unbounded demand. All updates are compare-and-swap retry
//! loops, so callers on I/O threads never block.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, WsError};

/// Lock-free, saturating demand counter.
#[derive(Debug, Default)]
pub struct Demand {
    /// Outstanding number of messages requested.
    value: AtomicU64,
}

impl Demand {
    /// Create a counter with no demand.
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increase demand by `n`.
    ///
    /// Returns `Ok(true)` if the counter went from zero to positive, meaning a
    /// consumer that stopped for lack of demand should resume.
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if `n` is zero.
    pub fn increase(&self, n: u64) -> Result<bool> {
        if n == 0 {
            return Err(WsError::IllegalArgument(format!("non-positive request: {n}")));
        }

        let mut current = self.value.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(n);
            match self
                .value
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(current == 0),
                Err(actual) => current = actual,
            }
        }
    }

    /// Decrement by one if positive.
    ///
    /// Returns `true` if a unit of demand was consumed.
    pub fn try_decrement(&self) -> bool {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.value.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current outstanding demand.
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Whether there is outstanding demand.
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.get() > 0
    }

    /// Drop all outstanding demand, returning what was left.
    pub fn reset(&self) -> u64 {
        self.value.swap(0, Ordering::AcqRel)
    }
}
