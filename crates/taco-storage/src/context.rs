//! Cancellation and deadline signal passed to every store operation.
//!
//! Backends call [`OpContext::check`] on entry and again right before their
//! first mutating step. Once a mutation has started it runs to completion, so
//! cancellation never leaves a half-written unit behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::StorageError;

/// Per-request cancellation flag plus optional deadline.
///
/// Clones share the cancellation flag, so a clone handed to a worker can be
/// cancelled from the request side.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl OpContext {
    /// A context that never expires and is not cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        OpContext {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with `Cancelled` or `DeadlineExceeded` if the operation should
    /// not proceed.
    pub fn check(&self) -> Result<(), StorageError> {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StorageError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_never_fails() {
        assert!(OpContext::background().check().is_ok());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let ctx = OpContext::background();
        let worker = ctx.clone();
        ctx.cancel();
        assert!(matches!(worker.check(), Err(StorageError::Cancelled)));
    }

    #[test]
    fn expired_deadline_fails() {
        let ctx = OpContext::with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(StorageError::DeadlineExceeded)));

        let ctx = OpContext::with_timeout(Duration::from_secs(3600));
        assert!(ctx.check().is_ok());
    }
}
