//! Retry with exponential backoff for conflicting reconciler attempts

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ReconcilerConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ReconcilerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of retries
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retry > 0 {
                    debug!(operation = operation_name, retries = retry, "Operation succeeded after retrying");
                }
                return Ok(result);
            }
            Err(error) if error.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.delay_for(retry);
                warn!(
                    operation = operation_name,
                    retry,
                    ?delay,
                    "Attempt failed: {}. Retrying",
                    error
                );
                sleep(delay).await;
            }
            Err(error) => {
                if error.is_retryable() {
                    warn!(operation = operation_name, retries = retry, "Giving up: {}", error);
                }
                return Err(error);
            }
        }
    }
}

/// Convert an elapsed deadline into a timeout error
pub fn timed_out(operation_name: &str, limit: Duration) -> AppError {
    AppError::Timeout(format!("{} exceeded {:?}", operation_name, limit))
}
