//! Retry with exponential backoff for transient network failures.

use super::error::PkgError;
use super::signal::AbortSignal;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default number of attempts per network operation (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;

/// Upper bound on a single backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 4_000;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every following retry.
    pub base_delay: Duration,
    /// Cap applied to every delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, the
    /// attempt budget is spent, or `signal` trips.
    ///
    /// Each attempt is raced against `signal`; the backoff sleep is too.
    ///
    /// # Errors
    /// Returns the last error produced by `op`, or `PKG_RUN_CANCELLED`.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        signal: &AbortSignal,
        mut op: F,
    ) -> Result<T, PkgError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PkgError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match signal.run(what, op()).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                    if e.is_retryable() {
                        return Err(PkgError::new(
                            e.code(),
                            format!("{} (after {attempt} attempts)", e.message()),
                        ));
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    signal
                        .run(what, async {
                            tokio::time::sleep(delay).await;
                            Ok(())
                        })
                        .await?;
                }
            }
        }
    }
}
