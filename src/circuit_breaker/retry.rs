use super::types::RetryConfig;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::{debug, warn};

/// Retry executor with exponential backoff.
///
/// The wait before retry `n` (0-based) is `base_backoff * multiplier^n`, capped
/// at `max_backoff` and randomized by `jitter`.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Copy of this executor with per-call overrides applied
    pub fn with_overrides(&self, max_retries: Option<u32>, base_backoff_ms: Option<u64>) -> Self {
        let mut config = self.config.clone();
        if let Some(max_retries) = max_retries {
            config.max_retries = max_retries;
        }
        if let Some(base) = base_backoff_ms {
            config.base_backoff_ms = base;
            config.max_backoff_ms = config.max_backoff_ms.max(base);
        }
        Self { config }
    }

    /// Execute `f` until it succeeds, fails with an error `should_retry`
    /// rejects, or `max_retries` retries have been spent.
    ///
    /// `f` receives the 0-based attempt number. The error of the last attempt
    /// is returned.
    pub async fn execute<F, Fut, T, E, P>(&self, mut f: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            debug!(
                attempt,
                max_retries = self.config.max_retries,
                "Executing request"
            );

            match f(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt, "Request succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        debug!(attempt, error = %e, "Error not retryable");
                        return Err(e);
                    }

                    if attempt >= self.config.max_retries {
                        warn!(
                            attempt,
                            max_retries = self.config.max_retries,
                            error = %e,
                            "Request failed after max retries"
                        );
                        return Err(e);
                    }

                    let wait = backoff.next_backoff().unwrap_or(self.config.max_backoff());
                    debug!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying after backoff"
                    );
                    crate::metrics::record_client_retry();
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.base_backoff())
            .with_max_interval(self.config.max_backoff())
            .with_multiplier(self.config.backoff_multiplier)
            .with_randomization_factor(self.config.jitter)
            .with_max_elapsed_time(None) // Bounded by max_retries instead
            .build()
    }
}
