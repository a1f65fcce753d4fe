//! Exponential backoff retry logic for external calls.
//!
//! - Default: 3 retries with 2s, 4s, 8s delays
//!
//! Which errors are retried depends on the [`RetryPolicy`]. Insufficient
//! funds is never retried.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::{ErrorKind, ServiceError};

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential growth).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0).
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Default retry configuration for external calls.
    ///
    /// - 3 retries with 2s, 4s, 8s delays
    /// - Total max wait: ~14 seconds
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
    };

    /// Creates a new retry configuration.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Delay before retry number `attempt` (0-indexed):
    /// `initial_delay * backoff_multiplier^attempt`, at most `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let scaled = self.initial_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Returns an iterator over all retry delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    /// Computes the total maximum wait time for all retries.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which failures a call site retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry transient errors with exponential backoff.
    #[default]
    RetryTransient,

    /// Retry everything except terminal business errors.
    RetryUnlessTerminal,

    /// Do not retry - return errors immediately.
    NoRetry,
}

impl RetryPolicy {
    fn retries(self, kind: ErrorKind) -> bool {
        match self {
            RetryPolicy::RetryTransient => kind.is_retriable(),
            RetryPolicy::RetryUnlessTerminal => !kind.is_terminal(),
            RetryPolicy::NoRetry => false,
        }
    }
}

/// Result of a retry attempt.
#[derive(Debug)]
pub enum RetryResult<T> {
    /// The operation succeeded.
    Success(T),

    /// A retriable error occurred on every attempt.
    ExhaustedRetries {
        /// The last error encountered.
        last_error: ServiceError,
        /// Number of attempts made (including the initial attempt).
        attempts: u32,
    },

    /// An error the policy does not retry.
    NotRetried(ServiceError),
}

impl<T> RetryResult<T> {
    /// Converts to a Result, treating exhausted retries and unretried errors as Err.
    pub fn into_result(self) -> Result<T, ServiceError> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::NotRetried(e) => Err(e),
        }
    }

    /// Returns true if the result is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }
}

/// Executes an async operation with retry logic.
///
/// The operation is re-run after a backoff delay whenever it fails with an
/// error `policy` retries, until it succeeds or the attempts run out.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    policy: RetryPolicy,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0;
    let max_attempts = if policy == RetryPolicy::NoRetry {
        1
    } else {
        config.max_retries + 1
    };

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => {
                attempt += 1;

                if !policy.retries(e.kind) {
                    return RetryResult::NotRetried(e);
                }
                if attempt >= max_attempts {
                    return RetryResult::ExhaustedRetries {
                        last_error: e,
                        attempts: attempt,
                    };
                }

                let delay = config.delay_for_attempt(attempt - 1);
                debug!(attempt, ?delay, error = %e, "Retrying external call");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
