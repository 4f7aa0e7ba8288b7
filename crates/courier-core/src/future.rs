//! Cancellable handle over one send.
//!
//! A [`RequestFuture`] is completed exactly once by the executor's delivery
//! context. Callers may block on it from a plain thread with
//! [`RequestFuture::get`] or [`RequestFuture::get_timeout`], or await it
//! from async code with [`RequestFuture::wait`].
//!
//! Blocking calls park the thread. Do not call them from a runtime worker
//! thread or from inside a delivery callback; use `wait` there instead.

use crate::cancel::CancellationToken;
use crate::error::{CourierError, Result};
use crate::executor::Response;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

enum State<T> {
    Pending,
    Completed(Result<Response<T>>),
    Cancelled,
    /// The value has been handed out by `get` or `wait`.
    Retrieved,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
    notify: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wake_all(&self) {
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }
}

/// Handle to the eventual result of a send.
pub struct RequestFuture<T> {
    shared: Arc<Shared<T>>,
    token: CancellationToken,
}

impl<T> RequestFuture<T> {
    /// Create a pending handle and the completer that resolves it.
    pub(crate) fn pending(token: CancellationToken) -> (Self, Completer<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending),
            condvar: Condvar::new(),
            notify: Notify::new(),
        });
        let completer = Completer {
            shared: Some(Arc::clone(&shared)),
        };
        (Self { shared, token }, completer)
    }

    /// A handle that is already resolved.
    pub(crate) fn ready(result: Result<Response<T>>) -> Self {
        let (future, completer) = Self::pending(CancellationToken::new());
        completer.complete(result);
        future
    }

    /// Block until the send finishes and take its result.
    ///
    /// Fails with `Cancelled` if the handle was cancelled and with
    /// `AlreadyRetrieved` if the result was taken before.
    pub fn get(&self) -> Result<Response<T>> {
        let guard = self.shared.lock();
        let mut guard = self
            .shared
            .condvar
            .wait_while(guard, |state| matches!(state, State::Pending))
            .unwrap_or_else(|e| e.into_inner());
        take(&mut guard)
    }

    /// Like [`Self::get`], but gives up after `timeout`.
    ///
    /// A timeout does not cancel the send; a later `get` may still succeed.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Response<T>> {
        let guard = self.shared.lock();
        let (mut guard, result) = self
            .shared
            .condvar
            .wait_timeout_while(guard, timeout, |state| matches!(state, State::Pending))
            .unwrap_or_else(|e| e.into_inner());
        if result.timed_out() && matches!(*guard, State::Pending) {
            return Err(CourierError::Timeout(timeout));
        }
        take(&mut guard)
    }

    /// Await the result without blocking the thread.
    pub async fn wait(&self) -> Result<Response<T>> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guard = self.shared.lock();
                if !matches!(*guard, State::Pending) {
                    return take(&mut guard);
                }
            }
            notified.await;
        }
    }

    /// Cancel the handle and ask the send to stop.
    ///
    /// Returns false if the handle had already finished. A result that
    /// arrives after cancellation is discarded.
    pub fn cancel(&self) -> bool {
        {
            let mut guard = self.shared.lock();
            if !matches!(*guard, State::Pending) {
                return false;
            }
            *guard = State::Cancelled;
        }
        self.token.cancel();
        self.shared.wake_all();
        debug!("Request handle cancelled");
        true
    }

    /// True once the handle completed, failed or was cancelled.
    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.lock(), State::Pending)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.shared.lock(), State::Cancelled)
    }
}

impl<T> std::fmt::Debug for RequestFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.shared.lock() {
            State::Pending => "pending",
            State::Completed(Ok(_)) => "succeeded",
            State::Completed(Err(_)) => "failed",
            State::Cancelled => "cancelled",
            State::Retrieved => "retrieved",
        };
        f.debug_struct("RequestFuture").field("state", &state).finish()
    }
}

fn take<T>(state: &mut State<T>) -> Result<Response<T>> {
    match std::mem::replace(state, State::Retrieved) {
        State::Completed(result) => result,
        State::Cancelled => {
            *state = State::Cancelled;
            Err(CourierError::Cancelled)
        }
        State::Retrieved => Err(CourierError::AlreadyRetrieved),
        State::Pending => {
            *state = State::Pending;
            Err(CourierError::transport("Request is still pending"))
        }
    }
}

/// Write side of a [`RequestFuture`].
///
/// Dropping a completer that never ran resolves the handle with a transport
/// error so waiters are not stranded.
pub(crate) struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    /// Resolve the handle. Returns false if it was cancelled first, in which
    /// case `result` is dropped.
    pub(crate) fn complete(mut self, result: Result<Response<T>>) -> bool {
        match self.shared.take() {
            Some(shared) => resolve(&shared, result),
            None => false,
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            resolve(
                &shared,
                Err(CourierError::transport("Request worker stopped before completing")),
            );
        }
    }
}

fn resolve<T>(shared: &Shared<T>, result: Result<Response<T>>) -> bool {
    {
        let mut guard = shared.lock();
        if !matches!(*guard, State::Pending) {
            debug!("Discarding result delivered after cancellation");
            return false;
        }
        *guard = State::Completed(result);
    }
    shared.wake_all();
    true
}
