//! Conflict retries with exponential backoff.
//!
//! Admission transactions are read-decide-commit. When another transaction
//! commits first, the ledger reports a conflict and the whole transaction is
//! re-run from a fresh snapshot after a short, jittered pause.
//!
//! ```rust
//! use admission_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::default()
//!     .with_attempts(3)
//!     .with_backoff(Duration::from_millis(5), Duration::from_millis(50));
//!
//! let value = policy
//!     .run(|| async { Ok::<_, String>(42) }, |err| err.contains("conflict"))
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How often, and how patiently, a conflicting transaction is re-run.
///
/// Defaults: 5 attempts, 10 ms first pause, doubling, capped at 500 ms.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Never below 1.
    pub attempts: u32,
    /// Pause before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single pause
    pub max_delay: Duration,
    /// Growth factor between consecutive pauses
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run every transaction exactly once.
    #[must_use]
    pub fn once() -> Self {
        Self::default().with_attempts(1)
    }

    /// Change the number of attempts (clamped to at least one).
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// Change the first pause and the cap.
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Pause after the `retry`-th failed attempt (0-based), before jitter.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// [`backoff`](Self::backoff) scaled by a random factor in `[0.5, 1.0]`,
    /// so transactions that collided do not collide again in lock-step.
    #[must_use]
    pub fn jittered(&self, retry: u32) -> Duration {
        self.backoff(retry)
            .mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the attempts run out.
    ///
    /// # Errors
    ///
    /// The last error returned by `operation`.
    pub async fn run<F, Fut, T, E, P>(&self, mut operation: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut retry = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retry > 0 {
                        tracing::debug!(attempt = retry + 1, "Transaction committed after retry");
                    }
                    return Ok(value);
                },
                Err(err) => err,
            };

            if !is_retryable(&err) {
                return Err(err);
            }
            if retry + 1 >= self.attempts {
                tracing::warn!(
                    attempts = self.attempts,
                    error = %err,
                    "Giving up on conflicting transaction"
                );
                return Err(err);
            }

            let pause = self.jittered(retry);
            tracing::debug!(
                attempt = retry + 1,
                pause_ms = pause.as_millis(),
                error = %err,
                "Transaction conflicted, retrying"
            );
            tokio::time::sleep(pause).await;
            retry += 1;
        }
    }
}
