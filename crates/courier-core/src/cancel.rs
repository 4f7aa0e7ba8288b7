//! Cancellation token shared between a request handle and its worker.
//!
//! Cancellation is cooperative: the worker races its transport call against
//! [`CancellationToken::cancelled`] and drops the call when the token fires.
//! A worker that already finished is unaffected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared flag that tells an in-flight send to give up.
///
/// Clones share one flag; cancelling any clone cancels them all.
///
/// # Example
///
/// ```
/// use courier_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_side = token.clone();
///
/// token.cancel();
/// assert!(worker_side.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task waiting on [`Self::cancelled`].
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is requested.
    ///
    /// Returns immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Must be enabled before the flag check
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// `Err(CancelledError)` once the token has fired.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }
}

/// The send was cancelled before it finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("request cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::CourierError {
    fn from(_: CancelledError) -> Self {
        crate::error::CourierError::Cancelled
    }
}
