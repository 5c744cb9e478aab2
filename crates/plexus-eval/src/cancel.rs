//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a shared flag. Clone it to hand it to another
//! thread; `cancel()` from one side, `is_cancelled()` from the other.
//! Cancellation is never preemptive: a computation only stops when it polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use plexus_core::error::EvalError;

/// Token for cooperative cancellation of an evaluation chain.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been signaled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(EvalError::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), EvalError> {
        if self.is_cancelled() {
            Err(EvalError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Whether two handles share the same flag.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}
