//! Retry policy for transient historian failures
//!
//! Retrieval tasks count consecutive timeouts against [`RetryPolicy::max_retries`]
//! and wait [`RetryPolicy::delay_for`] before replaying the same window.
//! Catalog lookups go through [`with_retry_if`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a retry policy with custom delays
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
        }
    }

    /// Retry without waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self::with_delays(max_retries, 0, 0)
    }

    /// Delay before retry number `attempt` (1-based; 0 means first try)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponential =
                self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
            (exponential as u64).min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }

    /// Whether `failures` consecutive failures still fit the budget
    pub fn allows(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }
}

/// Execute an operation with retry logic, retrying only errors accepted by
/// `should_retry`
///
/// Returns `Ok(T)` on success, or the last error if all retries fail or the
/// error is not retryable.
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !should_retry(&e) => {
                return Err(e);
            }
            Err(e) => {
                if attempt >= policy.max_retries {
                    warn!(attempt = attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                warn!(
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    error = %e,
                    "Operation failed, will retry"
                );
            }
        }
        attempt += 1;
    }
}
