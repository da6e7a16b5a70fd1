//! Generic retry driver with exponential backoff.
//!
//! Runs an operation up to a configured attempt ceiling, sleeping between
//! attempts per the backoff calculator and stopping early on non-retryable
//! failures. Records per-attempt diagnostics either way. Two flavors:
//! [`RetryExecutor::run`] propagates the final error, while
//! [`RetryExecutor::run_collect`] returns a structured outcome for callers
//! that prefer value-based error handling.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookrelay_core::Clock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    backoff::{self, Jitter},
    error::{DeliveryError, Result},
};

/// Typed allow-list entry for retryable failures.
///
/// Matching on error structure rather than message strings keeps retry
/// classification stable across error wording changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryOn {
    /// An HTTP response with this exact status code.
    Status(u16),
    /// Transport-level connection failures.
    Network,
    /// Request timeouts.
    Timeout,
}

impl RetryOn {
    fn matches(self, error: &DeliveryError) -> bool {
        match self {
            Self::Status(code) => error.status_code() == Some(code),
            Self::Network => matches!(error, DeliveryError::Network { .. }),
            Self::Timeout => matches!(error, DeliveryError::Timeout { .. }),
        }
    }
}

/// HTTP-oriented allow-list: transient statuses plus transport failures.
pub fn http_retryable() -> Vec<RetryOn> {
    vec![
        RetryOn::Status(408),
        RetryOn::Status(429),
        RetryOn::Status(500),
        RetryOn::Status(502),
        RetryOn::Status(503),
        RetryOn::Status(504),
        RetryOn::Network,
        RetryOn::Timeout,
    ]
}

/// Classifies an error against a retryable allow-list.
///
/// An empty list retries everything. A circuit-open short-circuit is never
/// retried: it is a local decision, and looping on it would defeat the
/// breaker.
pub fn is_retryable_error(error: &DeliveryError, retry_on: &[RetryOn]) -> bool {
    if matches!(error, DeliveryError::CircuitOpen { .. }) {
        return false;
    }
    retry_on.is_empty() || retry_on.iter().any(|class| class.matches(error))
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, the initial one included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff.
    pub base_delay: Duration,

    /// Ceiling on any single backoff delay.
    pub max_delay: Duration,

    /// Exponential growth factor.
    pub multiplier: f64,

    /// Allow-list of retryable failures; empty retries everything.
    pub retry_on: Vec<RetryOn>,

    /// Jitter settings applied to computed delays.
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            retry_on: Vec::new(),
            jitter: Jitter::default(),
        }
    }
}

/// Diagnostic record for one failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Backoff delay slept after this failure (zero for the final one).
    pub delay: Duration,
    /// The failure itself.
    pub error: DeliveryError,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
}

/// Structured result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result after all attempts.
    pub result: Result<T>,
    /// One record per failed attempt, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Total time spent sleeping between attempts.
    pub total_delay: Duration,
}

impl<T> RetryOutcome<T> {
    /// Whether the operation eventually succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Drives an operation through the configured retry policy.
pub struct RetryExecutor {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl RetryExecutor {
    /// Creates an executor with the given policy.
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Runs the operation, surfacing the final error after exhaustion or a
    /// non-retryable failure.
    ///
    /// The operation receives the 1-based attempt number. Sleeps between
    /// attempts are non-blocking and cancelled by dropping the future.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_collect(operation).await.result
    }

    /// Runs the operation, returning the structured outcome instead of
    /// propagating the failure.
    pub async fn run_collect<F, Fut, T>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut total_delay = Duration::ZERO;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome { result: Ok(value), attempts, total_delay };
                },
                Err(error) => {
                    let exhausted = attempt >= max_attempts;
                    let retryable = is_retryable_error(&error, &self.config.retry_on);

                    if exhausted || !retryable {
                        warn!(
                            attempt,
                            max_attempts,
                            retryable,
                            error = %error,
                            "giving up on retried operation"
                        );
                        attempts.push(AttemptRecord {
                            attempt_number: attempt,
                            delay: Duration::ZERO,
                            error: error.clone(),
                            at: self.clock.now_utc(),
                        });
                        return RetryOutcome { result: Err(error), attempts, total_delay };
                    }

                    // A Retry-After hint from the destination overrides the
                    // computed backoff.
                    let delay = error.retry_after_seconds().map_or_else(
                        || {
                            backoff::delay_for_attempt(
                                attempt - 1,
                                self.config.base_delay,
                                self.config.max_delay,
                                self.config.multiplier,
                                self.config.jitter,
                            )
                        },
                        Duration::from_secs,
                    );

                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "operation failed, retrying after backoff"
                    );

                    attempts.push(AttemptRecord {
                        attempt_number: attempt,
                        delay,
                        error,
                        at: self.clock.now_utc(),
                    });
                    total_delay += delay;
                    self.clock.sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}
