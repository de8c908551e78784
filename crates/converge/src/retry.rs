//! Eventual-consistency retry policy
//!
//! Wraps calls that fail transiently because an upstream side-effect
//! (e.g. a just-granted permission) has not propagated yet. Retries are
//! bounded by wall-clock timeout, not attempt count, and end with
//! exactly one final unconditional attempt once the window closes.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ConvergeError, Result};

/// Predicate deciding whether a failed call is worth retrying.
///
/// An error is retryable iff it is transient and its code matches one
/// of the configured codes or its message contains one of the
/// configured fragments. Per-resource-type constant; an empty condition
/// retries nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryableCondition {
    #[serde(default)]
    pub codes: Vec<String>,
    #[serde(default)]
    pub message_fragments: Vec<String>,
}

impl RetryableCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.codes.push(code.into());
        self
    }

    pub fn message_contains(mut self, fragment: impl Into<String>) -> Self {
        self.message_fragments.push(fragment.into());
        self
    }

    pub fn matches(&self, error: &ConvergeError) -> bool {
        match error {
            ConvergeError::Transient { code, message, .. } => {
                self.codes.iter().any(|c| c == code)
                    || self.message_fragments.iter().any(|f| message.contains(f))
            }
            _ => false,
        }
    }
}

fn default_retry_timeout_ms() -> u64 {
    120_000
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_multiplier() -> f64 {
    2.0
}

/// Backoff shape and wall-clock budget for retried calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total retry window in milliseconds.
    #[serde(default = "default_retry_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Ceiling on the backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential growth factor.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_retry_timeout_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff delay for a given attempt (0-indexed), capped at the
    /// configured maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(ms.min(self.max_delay_ms as f64) as u64)
    }

    /// Invoke `op`, retrying errors `condition` accepts until the
    /// wall-clock window closes.
    ///
    /// Once the window has closed and the last result was retryable,
    /// `op` is invoked exactly once more and that result is returned
    /// verbatim, success or not. The extra attempt absorbs the race
    /// between the window expiring and a final propagation-delayed
    /// success; it is never itself retried. Non-retryable errors return
    /// immediately.
    pub async fn run<T, F, Fut>(&self, condition: &RetryableCondition, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + self.timeout();
        let mut attempt: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if condition.matches(&e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(error = %e, "Retry window closed; one final attempt");
                        return op().await;
                    }

                    let delay = self.delay_for_attempt(attempt).min(deadline - now);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
