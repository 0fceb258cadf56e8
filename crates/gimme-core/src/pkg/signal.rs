//! Run-wide abort signal.
//!
//! One `AbortSignal` is created per install run and cloned into every task.
//! It trips when the whole-run deadline passes or when someone calls
//! [`AbortSignal::abort`] (strict mode, Ctrl-C). In-flight network operations
//! wrapped with [`AbortSignal::run`] are dropped at that point and report
//! `PKG_RUN_CANCELLED`.

use super::error::PkgError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct Inner {
    aborted: AtomicBool,
    notify: Notify,
    deadline: Option<Instant>,
}

/// Shared cancellation flag with an optional deadline.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AbortSignal {
    /// Create a signal that trips after `budget` (if any) has elapsed.
    #[must_use]
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                notify: Notify::new(),
                deadline: budget.map(|b| Instant::now() + b),
            }),
        }
    }

    /// Trip the signal. Idempotent.
    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the signal has tripped (explicitly or by deadline).
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        if self.inner.aborted.load(Ordering::SeqCst) {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.abort();
                true
            }
            _ => false,
        }
    }

    /// Resolves once the signal trips.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent abort is not missed
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }

            match self.inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = notified => {}
                        () = tokio::time::sleep_until(deadline) => {
                            self.abort();
                            return;
                        }
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Run `fut` unless the signal trips first.
    ///
    /// # Errors
    /// Returns `PKG_RUN_CANCELLED` if the signal was already tripped or trips
    /// while `fut` is pending, otherwise whatever `fut` returns.
    pub async fn run<T, F>(&self, what: &str, fut: F) -> Result<T, PkgError>
    where
        F: Future<Output = Result<T, PkgError>>,
    {
        if self.is_aborted() {
            return Err(PkgError::cancelled(format!("Run aborted before {what}")));
        }

        tokio::select! {
            result = fut => result,
            () = self.cancelled() => Err(PkgError::cancelled(format!("Run aborted during {what}"))),
        }
    }
}
