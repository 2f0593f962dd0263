//! Backoff policy for provider calls
//!
//! The executor wraps every backend call in [`retry_with_backoff_if`]. Only
//! errors the caller classifies as transient are retried; a permanent error
//! is returned after the first attempt.
//!
//! ```ignore
//! let outputs = retry_with_backoff_if(
//!     &RetryConfig::with_max_attempts(3),
//!     "apply Bucket/lokilogs",
//!     || async { cloud.create(&id, &desired).await },
//!     |e| e.retryable,
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Attempt budget and delay curve
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Attempts per operation, first call included (0 = until success)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default curve with the given attempt budget
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A single attempt, no retries
    pub fn once() -> Self {
        Self::with_max_attempts(1)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_retry_after(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }

    /// Un-jittered delay before attempt `attempts + 1`
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Scale `delay` by a jitter factor in `[0.5, 1.5)`
fn jittered(delay: Duration, factor: f64) -> Duration {
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Retry `operation` on every error
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(config, operation_name, operation, |_| true).await
}

/// Retry `operation` while `should_retry` accepts the error and the attempt
/// budget lasts. The last error is returned unchanged.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !should_retry(&error) {
            debug!(
                operation = %operation_name,
                attempts,
                error = %error,
                "permanent error, not retrying"
            );
            return Err(error);
        }
        if !config.allows_retry_after(attempts) {
            if attempts > 1 {
                warn!(operation = %operation_name, attempts, error = %error, "giving up");
            }
            return Err(error);
        }

        let delay = jittered(
            config.delay_after(attempts),
            rand::thread_rng().gen_range(0.5..1.5),
        );
        warn!(
            operation = %operation_name,
            attempt = attempts,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "transient error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
