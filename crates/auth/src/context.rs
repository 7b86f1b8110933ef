//! Caller-supplied cancellation scope for ledger and resolver operations.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The operation was cancelled or its deadline elapsed before completing.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled or deadline exceeded")]
pub struct Cancelled;

/// Cancellation token plus optional deadline.
///
/// Cloning shares the same token; cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Set the deadline to `timeout` from now (keeps an earlier existing deadline).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        // A timeout past the end of the clock's range adds no deadline.
        let Some(candidate) = Instant::now().checked_add(timeout) else {
            return self;
        };
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the context is already done. [`OpContext::run`] calls
    /// this before polling, so a cancelled caller never starts a write.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_done() { Err(Cancelled) } else { Ok(()) }
    }

    /// Drive `fut` to completion unless the context is cancelled or the
    /// deadline passes first, in which case `fut` is dropped.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Cancelled>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            _ = expired => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}
