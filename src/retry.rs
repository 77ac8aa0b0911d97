// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Retry Logic with Exponential Backoff
 * Row and calibration retries with capped, jittered backoff
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::config::ExtractionOptions;
use crate::errors::{EngineError, EngineResult, OracleError};
use crate::probe::CancelSignal;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential)
    pub backoff_multiplier: f64,

    /// Enable jitter to prevent thundering herd
    pub enable_jitter: bool,

    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl RetryConfig {
    /// Row retry policy: one initial attempt plus the configured retries
    pub fn from_options(options: &ExtractionOptions) -> Self {
        Self {
            max_attempts: options.per_row_retry_limit + 1,
            initial_backoff: options.backoff_base(),
            max_backoff: options.backoff_cap(),
            backoff_multiplier: 2.0,
            enable_jitter: options.backoff_jitter > 0.0,
            jitter_factor: options.backoff_jitter,
        }
    }

    /// Calculate backoff duration for a given attempt
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        let base_backoff = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped_backoff = base_backoff.min(self.max_backoff.as_millis() as f64);

        let backoff_with_jitter = if self.enable_jitter {
            let mut rng = rand::rng();
            let jitter_range = capped_backoff * self.jitter_factor;
            let jitter = if jitter_range > 0.0 {
                rng.random_range(-jitter_range..jitter_range)
            } else {
                0.0
            };
            (capped_backoff + jitter).max(0.0)
        } else {
            capped_backoff
        };

        Duration::from_millis(backoff_with_jitter as u64)
    }

    /// Delay before the next attempt. A delay suggested by the error
    /// replaces the computed one but is held to the same cap.
    pub fn delay_for(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        match suggested {
            Some(delay) => delay.min(self.max_backoff),
            None => self.calculate_backoff(attempt),
        }
    }
}

/// Retry an operation with exponential backoff while `should_retry`
/// accepts the error. Cancellation cuts a pending backoff short and
/// returns [`OracleError::Cancelled`].
pub async fn retry_with_predicate<F, Fut, T, P>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: &CancelSignal,
    mut operation: F,
    mut should_retry: P,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
    P: FnMut(&EngineError) -> bool,
{
    let mut attempt = 0;
    let mut last_error: Option<EngineError> = None;

    while attempt < config.max_attempts {
        attempt += 1;

        debug!(
            attempt = attempt,
            max_attempts = config.max_attempts,
            operation = operation_name,
            "Executing operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        attempt = attempt,
                        operation = operation_name,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let retryable = should_retry(&err);

                warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    operation = operation_name,
                    error = %err,
                    retryable = retryable,
                    "Operation failed"
                );

                if !retryable {
                    debug!(
                        operation = operation_name,
                        "Error is not retryable, aborting"
                    );
                    return Err(err);
                }

                let custom_delay = err.retry_delay();
                last_error = Some(err);

                if attempt < config.max_attempts {
                    let backoff = config.delay_for(attempt, custom_delay);

                    debug!(
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        operation = operation_name,
                        "Backing off before retry"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(operation = operation_name, "Cancelled during backoff");
                            return Err(OracleError::Cancelled.into());
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                } else {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        "Max retry attempts reached"
                    );
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        EngineError::Oracle(OracleError::Network(format!(
            "operation '{}' made no attempts",
            operation_name
        )))
    }))
}
