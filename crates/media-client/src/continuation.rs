//! Completion contract for non-blocking operations
//!
//! A [`Continuation`] is resolved exactly once with either the operation's
//! value or its error. If it is dropped before anyone resolves it (for
//! example when the runtime shuts down with the call still in flight) it
//! resolves itself with `Error::Cancelled`.
//!
//! # Example
//!
//! ```ignore
//! // Callback style
//! object.keep_alive_async(Continuation::new(|result| {
//!     if let Err(e) = result {
//!         tracing::warn!("keepalive failed: {}", e);
//!     }
//! }));
//!
//! // Await the outcome through a channel
//! let (cont, rx) = Continuation::channel();
//! object.release_async(cont);
//! rx.await??;
//! ```

use crate::{Error, Result};
use std::fmt;
use tokio::sync::oneshot;

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// One-shot completion callback over `Result<T>`
pub struct Continuation<T> {
    callback: Option<Callback<T>>,
}

impl<T: Send + 'static> Continuation<T> {
    /// Wrap a callback receiving the outcome
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Build from separate success and error handlers
    pub fn from_parts<S, E>(on_success: S, on_error: E) -> Self
    where
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        Self::new(move |result| match result {
            Ok(value) => on_success(value),
            Err(e) => on_error(e),
        })
    }

    /// Continuation that forwards the outcome to a oneshot receiver
    pub fn channel() -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        let cont = Self::new(move |result| {
            // Receiver may be gone; the outcome is then unobserved
            let _ = tx.send(result);
        });
        (cont, rx)
    }

    /// Resolve with the operation outcome
    pub fn resolve(mut self, result: Result<T>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }

    /// Resolve successfully
    pub fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolve with an error
    pub fn fail(self, error: Error) {
        self.resolve(Err(error));
    }
}

impl<T> Drop for Continuation<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            tracing::debug!("Continuation dropped unresolved, resolving as cancelled");
            callback(Err(Error::Cancelled(
                "operation dropped before completion".to_string(),
            )));
        }
    }
}

impl<T> fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("resolved", &self.callback.is_none())
            .finish()
    }
}
