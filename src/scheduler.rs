//! Sequential scheduler: runs a task body on at most one thread at a time.
//!
//! The scheduler is a single atomic latch with four states:
//!
//! ```text
//! IDLE     - nobody is running the body
//! RUNNING  - a thread is running the body, no rerun requested
//! RERUN    - a thread is running the body and must run it once more
//! STOPPED  - terminal; the body is never run again
//! ```
//!
//! [`SequentialScheduler::run_or_schedule`] either claims the latch and runs
//! the body on the calling thread, or, if another thread holds it, flags a
//! rerun and returns immediately. The running thread loops until it observes
//! no pending rerun. Triggers arriving while the body runs are therefore
//! coalesced into one extra run, and callers never block.

use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const RERUN: u8 = 2;
const STOPPED: u8 = 3;

/// Lock-free runner guaranteeing a task body never runs concurrently with itself.
#[derive(Debug)]
pub struct SequentialScheduler {
    state: AtomicU8,
}

impl SequentialScheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Run `body` now, or make sure the thread currently running it runs it again.
    ///
    /// Does nothing once the scheduler is stopped.
    pub fn run_or_schedule<F: FnMut()>(&self, mut body: F) {
        if !self.try_claim() {
            return;
        }

        // Releases the latch if `body` unwinds, so a panic does not wedge the scheduler.
        let _release = ReleaseOnUnwind { state: &self.state };

        loop {
            body();

            match self
                .state
                .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) | Err(STOPPED) => return,
                Err(_) => {
                    // RERUN: go around again unless stopped in the meantime
                    if self
                        .state
                        .compare_exchange(RERUN, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }

    /// Stop the scheduler permanently. Idempotent.
    ///
    /// A run in progress finishes its current iteration but is not repeated.
    pub fn stop(&self) {
        self.state.store(STOPPED, Ordering::Release);
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    /// Move IDLE -> RUNNING (returns true) or RUNNING -> RERUN (returns false).
    fn try_claim(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => RUNNING,
                RUNNING => RERUN,
                _ => return false,
            };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return current == IDLE,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for SequentialScheduler {
    fn default() -> Self {
        Self::new()
    }
}

struct ReleaseOnUnwind<'a> {
    state: &'a AtomicU8,
}

impl Drop for ReleaseOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let _ = self
                .state
                .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire);
            let _ = self
                .state
                .compare_exchange(RERUN, IDLE, Ordering::AcqRel, Ordering::Acquire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_runs_body_once() {
        let scheduler = SequentialScheduler::new();
        let runs = AtomicUsize::new(0);

        scheduler.run_or_schedule(|| {
            runs.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_stopped());
    }

    #[test]
    fn test_reentrant_trigger_reruns_after_current_run() {
        let scheduler = SequentialScheduler::new();
        let runs = AtomicUsize::new(0);

        scheduler.run_or_schedule(|| {
            let n = runs.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                // Triggering from inside the body must not recurse
                scheduler.run_or_schedule(|| panic!("must not run nested"));
                scheduler.run_or_schedule(|| panic!("must not run nested"));
                assert_eq!(runs.load(Ordering::SeqCst), 1);
            }
        });

        // Two triggers during the first run coalesce into one rerun
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_prevents_runs() {
        let scheduler = SequentialScheduler::new();
        scheduler.stop();
        scheduler.stop();

        scheduler.run_or_schedule(|| panic!("stopped scheduler ran its body"));
        assert!(scheduler.is_stopped());
    }

    #[test]
    fn test_stop_during_run_cancels_rerun() {
        let scheduler = SequentialScheduler::new();
        let runs = AtomicUsize::new(0);

        scheduler.run_or_schedule(|| {
            runs.fetch_add(1, Ordering::SeqCst);
            scheduler.run_or_schedule(|| {});
            scheduler.stop();
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_stopped());
    }

    #[test]
    fn test_panic_releases_latch() {
        let scheduler = SequentialScheduler::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scheduler.run_or_schedule(|| panic!("boom"));
        }));
        assert!(result.is_err());

        let runs = AtomicUsize::new(0);
        scheduler.run_or_schedule(|| {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_never_runs_concurrently() {
        let scheduler = Arc::new(SequentialScheduler::new());
        let active = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = scheduler.clone();
                let active = active.clone();
                let runs = runs.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        scheduler.run_or_schedule(|| {
                            let now = active.fetch_add(1, Ordering::SeqCst);
                            assert_eq!(now, 0, "body ran concurrently");
                            runs.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_micros(10));
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(runs.load(Ordering::SeqCst) >= 1);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_trigger_while_running_is_not_lost() {
        let scheduler = Arc::new(SequentialScheduler::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (resume_tx, resume_rx) = std::sync::mpsc::channel::<()>();

        let runner = {
            let scheduler = scheduler.clone();
            let runs = runs.clone();
            thread::spawn(move || {
                scheduler.run_or_schedule(|| {
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        started_tx.send(()).unwrap();
                        resume_rx.recv().unwrap();
                    }
                });
            })
        };

        started_rx.recv().unwrap();
        // Another thread triggers while the first run is blocked: it returns at once
        scheduler.run_or_schedule(|| panic!("must not run on the triggering thread"));
        resume_tx.send(()).unwrap();
        runner.join().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
