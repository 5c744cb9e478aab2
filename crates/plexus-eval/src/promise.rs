//! Single-assignment promise used for in-flight computations.
//!
//! The winner of an in-flight race fulfils the promise exactly once; every
//! other caller blocks on it. This is the only blocking point in normal
//! evaluation.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::cancel::CancellationToken;

/// How often a waiter re-checks its own cancellation token.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A value that is set once and read by any number of waiters.
#[derive(Debug)]
pub struct Promise<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Promise<T> {
    pub fn new() -> Self {
        Promise {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Sets the value and wakes all waiters. Returns `false` (and leaves the
    /// first value in place) if the promise was already fulfilled.
    pub fn fulfil(&self, value: T) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.ready.notify_all();
        true
    }

    /// Blocks until fulfilled or until `token` is cancelled, whichever comes
    /// first. Returns `None` on cancellation.
    pub fn wait_or_cancel(&self, token: &CancellationToken) -> Option<T> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            if token.is_cancelled() {
                return None;
            }
            slot = self
                .ready
                .wait_timeout(slot, WAIT_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}
