//! Timeout-bounded execution.
//!
//! [`run_with_deadline`] executes one operation on a dedicated worker
//! thread and blocks the caller on a completion signal up to the deadline.
//! The outcome is the tri-state [`RunOutcome`]: completed with a value,
//! failed with a cause, or timed out. Collapsing those three into one
//! absent-value sentinel loses the distinction between "slow", "broken",
//! and "legitimately empty", so the engine never does.
//!
//! Cancellation is cooperative and best-effort: on deadline the worker's
//! [`CancelToken`] is set and the caller returns immediately without
//! joining. A worker that ignores the token keeps running detached until
//! it finishes on its own; that leak is accepted and documented rather
//! than papered over.

use crate::exec::ExecutionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Cooperative cancellation flag handed to the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, waking early on cancellation.
    ///
    /// Returns `false` when the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(10);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(SLICE);
            thread::sleep(step);
            remaining -= step;
        }
        !self.is_cancelled()
    }
}

/// Outcome of one deadline-bounded operation.
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// The operation finished in time and returned a value.
    Completed(T),
    /// The operation finished in time but raised an error, or the deadline
    /// itself was invalid.
    Failed(ExecutionError),
    /// The deadline elapsed before the completion signal fired.
    TimedOut,
}

impl<T> RunOutcome<T> {
    /// Whether this is a [`RunOutcome::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Whether this is a [`RunOutcome::TimedOut`].
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Run `op` on a worker thread, bounded by `deadline_ms` of wall-clock time.
///
/// A deadline of zero or less is rejected before the worker is spawned:
/// the operation is never invoked and the outcome is a failure, not a
/// timeout. On a genuine timeout the worker's token is cancelled and the
/// caller returns without waiting for the worker to stop.
pub fn run_with_deadline<T, F>(deadline_ms: i64, op: F) -> RunOutcome<T>
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> Result<T, ExecutionError> + Send + 'static,
{
    if deadline_ms <= 0 {
        return RunOutcome::Failed(ExecutionError::InvalidDeadline {
            millis: deadline_ms,
        });
    }
    let deadline_ms = deadline_ms as u64;

    let token = CancelToken::new();
    let worker_token = token.clone();
    let (tx, rx) = mpsc::sync_channel(1);

    let spawned = thread::Builder::new()
        .name("medir-test-worker".into())
        .spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                op(&worker_token)
            }))
            .unwrap_or_else(|payload| Err(ExecutionError::Panicked(panic_message(&*payload))));
            // The caller may have stopped listening; that is fine.
            let _ = tx.send(result);
        });
    if let Err(source) = spawned {
        return RunOutcome::Failed(ExecutionError::WorkerSpawn(source.to_string()));
    }

    match rx.recv_timeout(Duration::from_millis(deadline_ms)) {
        Ok(Ok(value)) => RunOutcome::Completed(value),
        Ok(Err(cause)) => {
            // Interrupting an already-finished worker is harmless.
            token.cancel();
            RunOutcome::Failed(cause)
        }
        Err(RecvTimeoutError::Timeout) => {
            token.cancel();
            debug!(deadline_ms, "deadline elapsed; worker left detached");
            RunOutcome::TimedOut
        }
        Err(RecvTimeoutError::Disconnected) => {
            RunOutcome::Failed(ExecutionError::Panicked("worker vanished".to_string()))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
