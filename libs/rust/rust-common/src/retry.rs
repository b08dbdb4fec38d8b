//! Retry policy for refresh operations.
//!
//! Supports both a fixed delay between attempts (what the loaders use for
//! their refresh cycles) and exponential backoff with optional jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt (1.0 gives a fixed delay)
    pub multiplier: f64,
    /// Whether to add up to 25% jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fixed-delay configuration: `max_retries` retries spaced by `delay`.
    #[must_use]
    pub const fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Set max retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set max delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Disable jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Failure returned once a retried operation gives up.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Total attempts made, including the first one
    pub attempts: u32,
    /// Error from the last attempt
    pub error: E,
}

impl<E> RetryError<E> {
    /// Unwrap the last error.
    pub fn into_inner(self) -> E {
        self.error
    }
}

/// Retry policy for executing operations with automatic retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Fixed-delay policy.
    #[must_use]
    pub const fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::new(RetryConfig::fixed(max_retries, delay))
    }

    /// Calculate the delay before retry number `attempt` (zero based).
    ///
    /// Keeps full `Duration` precision; a fixed policy returns its delay
    /// unchanged.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.powi(exponent);

        let base_delay = if (factor - 1.0).abs() < f64::EPSILON {
            self.config.initial_delay
        } else {
            scale(self.config.initial_delay, factor).unwrap_or(self.config.max_delay)
        };
        let delay = base_delay.min(self.config.max_delay);

        if self.config.jitter {
            let jitter_factor = 1.0 + (rand::random::<f64>() * 0.25);
            scale(delay, jitter_factor).unwrap_or(delay)
        } else {
            delay
        }
    }

    /// Whether another attempt is allowed after `attempt` retries.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_retries
    }

    /// Execute an async operation, retrying every failure.
    ///
    /// # Errors
    ///
    /// Returns the last error and the number of attempts once retries are
    /// exhausted.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_when(operation, |_| true).await
    }

    /// Execute an async operation, retrying only failures accepted by
    /// `retryable`.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted or a failure is not
    /// retryable.
    pub async fn execute_when<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !self.should_retry(attempt) || !retryable(&error) {
                        return Err(RetryError {
                            attempts: attempt + 1,
                            error,
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Get the maximum number of retries.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

/// `delay * factor`, or `None` when the product is not a valid duration.
fn scale(delay: Duration, factor: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).ok()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
