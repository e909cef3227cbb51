//! Retry-with-backoff wrapper around a [`Supplier`].

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use pr_common::{metrics, FetcherError, SupplyError, Update};
use pr_config::{FetcherConfig, RetryInterval};

use crate::Supplier;

enum Classification {
    NonRecoverable,
    RateLimited(u64),
    Retriable,
}

fn classify(err: &SupplyError) -> Classification {
    match err {
        SupplyError::NonRecoverable { status, .. } if *status == 401 || *status == 409 => {
            Classification::NonRecoverable
        }
        SupplyError::NonRecoverable { .. } => Classification::Retriable,
        SupplyError::RateLimited { retry_after_secs } => {
            Classification::RateLimited(*retry_after_secs)
        }
        SupplyError::Transport(_) => Classification::Retriable,
        SupplyError::Cancelled => Classification::NonRecoverable,
    }
}

fn backoff_delay(interval: RetryInterval, attempt: u32) -> Duration {
    match interval {
        RetryInterval::Exponential => {
            let pow = attempt.saturating_sub(1).min(20);
            Duration::from_millis(100u64.saturating_mul(1u64 << pow).min(60_000))
        }
        RetryInterval::Quadratic => Duration::from_millis((100u64 * u64::from(attempt)).min(60_000)),
        RetryInterval::Fixed(ms) => Duration::from_millis(ms),
    }
}

async fn sleep_with_cancellation(
    token: &CancellationToken,
    delay: Duration,
) -> Result<(), SupplyError> {
    tokio::select! {
        () = token.cancelled() => Err(SupplyError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Wraps a [`Supplier`] with the retry policy from §6: exponential/quadratic/
/// fixed backoff, a total retry budget, and status-code-aware short-circuits
/// for non-recoverable (401/409) and rate-limited (429) responses.
pub struct Fetcher<S> {
    supplier: S,
    config: FetcherConfig,
}

impl<S: Supplier> Fetcher<S> {
    pub fn new(supplier: S, config: FetcherConfig) -> Self {
        Self { supplier, config }
    }

    pub async fn fetch(
        &self,
        batch_size: usize,
        token: CancellationToken,
    ) -> Result<Vec<Update>, FetcherError> {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        let budget = Duration::from_millis(self.config.max_retry_time_ms);

        loop {
            attempt += 1;
            match self
                .supplier
                .supply(batch_size, &self.config.fetch, token.clone())
                .await
            {
                Ok(updates) => {
                    metrics::record_updates_polled(updates.len() as u64);
                    return Ok(updates);
                }
                Err(err) => match classify(&err) {
                    Classification::NonRecoverable => return Err(FetcherError::Supply(err)),
                    Classification::RateLimited(secs) => {
                        metrics::record_retry();
                        sleep_with_cancellation(&token, Duration::from_secs(secs))
                            .await
                            .map_err(FetcherError::Supply)?;
                    }
                    Classification::Retriable => {
                        let elapsed = start.elapsed();
                        let delay = backoff_delay(self.config.retry_interval, attempt);
                        if elapsed + delay >= budget {
                            return Err(FetcherError::RetryBudgetExhausted {
                                elapsed_ms: elapsed.as_millis() as u64,
                            });
                        }
                        if !self.config.silent {
                            warn!(attempt, error = %err, "supply failed, retrying");
                        }
                        metrics::record_retry();
                        sleep_with_cancellation(&token, delay)
                            .await
                            .map_err(FetcherError::Supply)?;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakySupplier {
        attempts: Arc<AtomicU32>,
        fail_until: u32,
    }

    #[async_trait]
    impl Supplier for FlakySupplier {
        async fn supply(
            &self,
            _batch_size: usize,
            _extras: &serde_json::Value,
            _token: CancellationToken,
        ) -> Result<Vec<Update>, SupplyError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < self.fail_until {
                Err(SupplyError::Transport("connection reset".into()))
            } else {
                Ok(vec![Update::new(1, serde_json::json!({}))])
            }
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let supplier = FlakySupplier {
            attempts: attempts.clone(),
            fail_until: 3,
        };
        let config = FetcherConfig {
            retry_interval: RetryInterval::Fixed(1),
            ..FetcherConfig::default()
        };
        let fetcher = Fetcher::new(supplier, config);

        let result = fetcher.fetch(10, CancellationToken::new()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    struct AlwaysNonRecoverable;

    #[async_trait]
    impl Supplier for AlwaysNonRecoverable {
        async fn supply(
            &self,
            _batch_size: usize,
            _extras: &serde_json::Value,
            _token: CancellationToken,
        ) -> Result<Vec<Update>, SupplyError> {
            Err(SupplyError::NonRecoverable {
                status: 409,
                message: "conflict".into(),
            })
        }
    }

    #[tokio::test]
    async fn non_recoverable_error_bypasses_retry() {
        let fetcher = Fetcher::new(AlwaysNonRecoverable, FetcherConfig::default());
        let result = fetcher.fetch(10, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(FetcherError::Supply(SupplyError::NonRecoverable { status: 409, .. }))
        ));
    }
}
