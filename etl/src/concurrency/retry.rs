//! Exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use etl_config::shared::RetryConfig;
use rand::Rng;
use tracing::{error, info, warn};

use crate::error::EtlResult;

/// Upper bound of the random extra delay, as a fraction of the computed delay.
const MAX_JITTER_FACTOR: f64 = 0.3;

/// Tracks consecutive failures of one operation and derives the delay before the next attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Returns `true` once `max_attempts` attempts have failed.
    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.config.max_attempts
    }

    /// Delay before the next attempt: `initial * multiplier^(failures - 1)`, capped, plus jitter.
    pub fn delay(&self) -> Duration {
        let exponent = self.failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay_ms = self.config.initial_retry_delay_ms as f64
            * self.config.backoff_multiplier.powi(exponent);
        let capped_delay_ms = base_delay_ms.min(self.config.max_retry_delay_ms as f64);

        let jitter_factor = rand::rng().random::<f64>() * MAX_JITTER_FACTOR;

        Duration::from_millis((capped_delay_ms * (1.0 + jitter_factor)) as u64)
    }
}

/// Runs `operation` until it succeeds, fails with a non transient error or exhausts the attempts.
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &'static str,
    mut operation: F,
) -> EtlResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EtlResult<T>>,
{
    let mut backoff = Backoff::new(config.clone());

    loop {
        match operation().await {
            Ok(value) => {
                if backoff.failures() > 0 {
                    info!(
                        operation = operation_name,
                        failures = backoff.failures(),
                        "operation succeeded after retrying"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                backoff.record_failure();

                if !err.is_transient() || backoff.is_exhausted() {
                    error!(
                        operation = operation_name,
                        failures = backoff.failures(),
                        error = %err,
                        "operation failed, giving up"
                    );
                    return Err(err);
                }

                let delay = backoff.delay();
                warn!(
                    operation = operation_name,
                    failures = backoff.failures(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::etl_error;

    fn config() -> RetryConfig {
        RetryConfig {
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_attempts: 3,
        }
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let mut backoff = Backoff::new(config());

        backoff.record_failure();
        let first = backoff.delay();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(130));

        backoff.record_failure();
        let second = backoff.delay();
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(260));

        for _ in 0..10 {
            backoff.record_failure();
        }
        assert!(backoff.delay() <= Duration::from_millis(1300));
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert!(!backoff.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry_transient(&config(), "connect", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(etl_error!(ErrorKind::IndexConnectionFailed, "Unreachable"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: EtlResult<()> = retry_transient(&config(), "write", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(etl_error!(ErrorKind::AnalyticsWriteFailed, "Rejected"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::AnalyticsWriteFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: EtlResult<()> = retry_transient(&config(), "connect", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(etl_error!(ErrorKind::SourceConnectionFailed, "Refused"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
