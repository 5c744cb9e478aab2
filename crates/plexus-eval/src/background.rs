//! Cancellable work on a dedicated thread.
//!
//! Consumers that pull values in the background (a viewer refreshing after
//! every edit, say) hold a [`BackgroundTask`] and cancel it before mutating
//! the graph. Dropping a task cancels it and joins the thread.

use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::cancel::CancellationToken;

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("failed to spawn background thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("background task panicked")]
    Panicked,
}

/// Handle to a closure running on its own thread with its own token.
#[derive(Debug)]
pub struct BackgroundTask<T> {
    token: CancellationToken,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Runs `work` on a new thread, handing it the task's token.
    pub fn spawn<F>(name: &str, work: F) -> Result<Self, BackgroundError>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
    {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name(format!("plexus-{name}"))
            .spawn(move || work(&worker_token))?;
        tracing::debug!(task = name, "background task started");
        Ok(BackgroundTask {
            token,
            handle: Some(handle),
        })
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Requests cancellation. The work stops at its next poll.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Blocks until the work returns.
    pub fn wait(mut self) -> Result<T, BackgroundError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| BackgroundError::Panicked),
            None => Err(BackgroundError::Panicked),
        }
    }

    /// Cancels, then blocks until the work returns.
    pub fn cancel_and_wait(self) -> Result<T, BackgroundError> {
        self.cancel();
        self.wait()
    }
}

impl<T> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.token.cancel();
            if handle.join().is_err() {
                tracing::warn!("background task panicked after being dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn wait_returns_the_result() {
        let task = BackgroundTask::spawn("answer", |_| 42).unwrap();
        assert_eq!(task.wait().unwrap(), 42);
    }

    #[test]
    fn cancel_stops_a_polling_loop() {
        let task = BackgroundTask::spawn("spin", |token| {
            let mut spins = 0u64;
            while !token.is_cancelled() {
                spins += 1;
                thread::sleep(Duration::from_millis(1));
            }
            spins
        })
        .unwrap();
        thread::sleep(Duration::from_millis(10));
        assert!(!task.is_done());
        let start = Instant::now();
        task.cancel_and_wait().unwrap();
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn drop_cancels_and_joins() {
        let stopped = Arc::new(AtomicBool::new(false));
        {
            let stopped = stopped.clone();
            let _task = BackgroundTask::spawn("dropped", move |token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                stopped.store(true, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn panics_are_reported() {
        let task = BackgroundTask::spawn("panics", |_| -> () { panic!("boom") }).unwrap();
        assert!(matches!(task.wait(), Err(BackgroundError::Panicked)));
    }
}
