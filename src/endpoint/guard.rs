//! Send-path exclusivity flags.
//!
//! A [`PendingFlag`] admits one send at a time. Acquiring it hands out a
//! [`SendGuard`] that clears the flag when dropped, which happens when the
//! send future completes, fails, or is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// At-most-one-in-flight flag for a class of sends.
#[derive(Debug, Default)]
pub(crate) struct PendingFlag {
    pending: AtomicBool,
}

impl PendingFlag {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the flag if clear. Returns `None` if a send is already pending.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<SendGuard> {
        self.pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SendGuard { flag: self.clone() })
    }

    #[inline]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Clears its [`PendingFlag`] on drop.
#[derive(Debug)]
pub(crate) struct SendGuard {
    flag: Arc<PendingFlag>,
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        self.flag.pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_acquire() {
        let flag = PendingFlag::new();
        let guard = flag.try_acquire();

        assert!(guard.is_some());
        assert!(flag.is_pending());
        assert!(flag.try_acquire().is_none());
    }

    #[test]
    fn test_release_on_drop() {
        let flag = PendingFlag::new();
        {
            let _guard = flag.try_acquire().unwrap();
            assert!(flag.is_pending());
        }

        assert!(!flag.is_pending());
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn test_independent_flags() {
        let data = PendingFlag::new();
        let control = PendingFlag::new();

        let _data_guard = data.try_acquire().unwrap();
        assert!(control.try_acquire().is_some());
    }
}
