use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelCause, EngineError, Result};

/// Cancellation scope for one queued job.
///
/// Clones share the same token and cause; the first `cancel` wins.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
    deadline: Option<Instant>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            cause: Arc::new(OnceLock::new()),
            deadline: None,
        }
    }

    /// Returns a clone that additionally expires `timeout` from now.
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    /// Must be called from within a tokio runtime.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(existing), Some(deadline)) => Some(existing.min(deadline)),
            (existing, deadline) => existing.or(deadline),
        };
        Self {
            token: self.token.clone(),
            cause: Arc::clone(&self.cause),
            deadline,
        }
    }

    pub fn cancel(&self, cause: CancelCause) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cause recorded by the first `cancel` call, if any.
    pub fn cause(&self) -> Option<CancelCause> {
        self.cause.get().copied()
    }

    /// Errors with `Cancelled` if the context is already done.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(EngineError::Cancelled(
                self.cause().unwrap_or(CancelCause::Requested),
            ));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::Cancelled(CancelCause::DeadlineExceeded));
            }
        }
        Ok(())
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> CancelCause {
        let cancelled = async {
            self.token.cancelled().await;
            self.cause().unwrap_or(CancelCause::Requested)
        };
        match self.deadline {
            Some(deadline) => tokio::select! {
                cause = cancelled => cause,
                _ = tokio::time::sleep_until(deadline) => CancelCause::DeadlineExceeded,
            },
            None => cancelled.await,
        }
    }
}
