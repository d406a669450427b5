use crate::error::{DbError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Context threaded through every public engine operation.
///
/// It carries the caller's cancellation flag and deadline; operations check
/// it at each point that may touch the store, so a cancelled scan stops
/// between rows and a cancelled write never commits. An in-flight cursor is
/// released by dropping it, and a transaction owned by the cancelled
/// operation is rolled back before the error surfaces.
#[derive(Default, Clone)]
pub struct ExecutionContext {
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    /// An unrestricted context for internal operations.
    pub fn internal() -> Self {
        Self::default()
    }

    /// A context cancelled by setting `flag`.
    pub fn cancellable(flag: Arc<AtomicBool>) -> Self {
        Self {
            cancel: Some(flag),
            deadline: None,
        }
    }

    /// Adds a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return true;
            }
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Fails with [`DbError::Cancelled`] once the flag is set or the
    /// deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DbError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_context_never_cancels() {
        assert!(ExecutionContext::internal().check().is_ok());
    }

    #[test]
    fn flag_cancels() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = ExecutionContext::cancellable(flag.clone());
        assert!(ctx.check().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(ctx.check(), Err(DbError::Cancelled)));
    }

    #[test]
    fn deadline_cancels() {
        let ctx = ExecutionContext::internal().with_timeout(Duration::ZERO);
        assert!(matches!(ctx.check(), Err(DbError::Cancelled)));
    }
}
