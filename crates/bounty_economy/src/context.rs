//! Request context handed to every collaborator call.
//!
//! The core never inspects the context itself. It forwards it unchanged so
//! the store, wallet and inventory can honour cancellation and deadlines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{EconomyError, EconomyResult};

/// Cancellation and deadline token.
#[derive(Debug, Default)]
pub struct Context {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never expires on its own.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Cancels the context. Pending collaborator calls should give up.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancelled or past the deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns `Err(Cancelled)` once the context is done.
    ///
    /// # Errors
    ///
    /// [`EconomyError::Cancelled`] if cancelled or past the deadline.
    pub fn check(&self) -> EconomyResult<()> {
        if self.is_done() {
            Err(EconomyError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        ctx.cancel();
        assert_eq!(ctx.check(), Err(EconomyError::Cancelled));
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = Context::with_timeout(Duration::ZERO);
        assert!(ctx.is_done());
    }
}
