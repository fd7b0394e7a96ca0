//! Exponential backoff with jitter for transactions aborted by a concurrent writer

use crate::{config::RetryConfig, Result};
use prometheus::IntCounter;
use std::time::Duration;
use tracing::{debug, warn};

/// Retries an operation while it fails with a retryable error
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    retries: Option<IntCounter>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retries: None,
        }
    }

    /// Count every retry on `counter`
    pub fn with_counter(mut self, counter: IntCounter) -> Self {
        self.retries = Some(counter);
        self
    }

    /// Delay before the retry following failed attempt `attempt` (0-based)
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Run `operation`, retrying only errors for which
    /// [`crate::Error::is_retryable`] holds. Anything else returns at once.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt, "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.calculate_delay(attempt);
                    attempt += 1;
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after conflict"
                    );
                    if let Some(counter) = &self.retries {
                        counter.inc();
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Retries exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}
