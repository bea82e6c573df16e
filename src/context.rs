//! Per-operation cancellation and deadline.
//!
//! Every external call (fetch tool, `systemctl`, container runtime) runs under an
//! [`OpContext`]. Ctrl-C trips the token; `--timeout` sets the deadline. Futures
//! driven through [`OpContext::run`] are dropped on interruption, which kills any
//! child spawned with `kill_on_drop(true)`.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::Interrupted;

#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that gives up `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Derive a context whose deadline is the earlier of this one and `now + timeout`.
    ///
    /// Cancelling the parent cancels the child.
    pub fn child_with_timeout(&self, timeout: Option<Duration>) -> OpContext {
        let local = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, local) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        OpContext {
            cancel: self.cancel.child_token(),
            deadline,
        }
    }

    /// Fail fast if the operation was already cancelled or is past its deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if let Some(at) = self.deadline
            && Instant::now() >= at
        {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless cancellation or the deadline fires first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        let expiry = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = expiry => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    /// Interruptible sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}
