//! Adaptive pull loop over a [`Fetcher`].

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use pr_common::{Batch, Capacity, SourceError};
use pr_config::SourceConfig;

use crate::{Fetcher, Supplier};

const STATS_RING_LEN: usize = 16;
const MAX_BATCH_SIZE: usize = 100;

struct StatsRing {
    counts: [u64; STATS_RING_LEN],
    durations: [u64; STATS_RING_LEN],
    index: usize,
    sum_counts: u64,
    sum_durations: u64,
}

impl StatsRing {
    fn new() -> Self {
        Self {
            counts: [0; STATS_RING_LEN],
            durations: [0; STATS_RING_LEN],
            index: 0,
            sum_counts: 0,
            sum_durations: 0,
        }
    }

    fn record(&mut self, count: usize, elapsed_ms: u64) {
        self.sum_counts -= self.counts[self.index];
        self.sum_durations -= self.durations[self.index];

        self.counts[self.index] = count as u64;
        self.durations[self.index] = elapsed_ms;

        self.sum_counts += count as u64;
        self.sum_durations += elapsed_ms;

        self.index = (self.index + 1) % STATS_RING_LEN;
    }
}

/// Presents an adaptive sequence of update batches, feeding pacing decisions
/// from downstream capacity and recent fetch latency back into itself.
pub struct Source<S: Supplier> {
    fetcher: Fetcher<S>,
    config: SourceConfig,
    offset: AtomicI64,
    pace: Mutex<Option<usize>>,
    active: AtomicBool,
    token: Mutex<CancellationToken>,
    stats: Mutex<StatsRing>,
}

impl<S: Supplier> Source<S> {
    pub fn new(supplier: S, fetcher_config: pr_config::FetcherConfig, config: SourceConfig) -> Self {
        Self {
            fetcher: Fetcher::new(supplier, fetcher_config),
            config,
            offset: AtomicI64::new(0),
            pace: Mutex::new(None),
            active: AtomicBool::new(true),
            token: Mutex::new(CancellationToken::new()),
            stats: Mutex::new(StatsRing::new()),
        }
    }

    /// Pull and return the next batch, applying pacing before returning.
    pub async fn next_batch(&self) -> Result<Batch, SourceError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(SourceError::Closed);
        }

        let token = self.token.lock().await.clone();
        let pace = self.pace.lock().await.unwrap_or(MAX_BATCH_SIZE);
        let batch_size = pace.clamp(1, MAX_BATCH_SIZE);

        let start = Instant::now();
        let updates = match self.fetcher.fetch(batch_size, token.clone()).await {
            Ok(updates) => updates,
            Err(err) => {
                if token.is_cancelled() {
                    return Err(SourceError::Closed);
                }
                self.active.store(false, Ordering::SeqCst);
                return Err(SourceError::Fetch(err));
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if let Some(max_id) = updates.iter().map(|u| u.update_id).max() {
            self.offset
                .store(max_id as i64 + 1, Ordering::SeqCst);
        }

        let wait_ms = {
            let mut stats = self.stats.lock().await;
            stats.record(updates.len(), elapsed_ms);
            self.compute_wait(&stats)
        };

        if wait_ms > 0 && updates.len() < MAX_BATCH_SIZE {
            tokio::select! {
                () = token.cancelled() => return Err(SourceError::Closed),
                () = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
            }
        }

        Ok(updates)
    }

    fn compute_wait(&self, stats: &StatsRing) -> u64 {
        let max_delay = self.config.max_delay_milliseconds;
        if max_delay == 0 {
            return 0;
        }
        let balance = 100.0 * self.config.speed_traffic_balance / (max_delay as f64).max(1.0);
        let estimate =
            balance * stats.sum_durations as f64 / (stats.sum_counts as f64).max(1.0);
        (max_delay as f64 * estimate.tanh()) as u64
    }

    /// Request that the next batch ask for at most `capacity` updates.
    pub async fn set_generator_pace(&self, capacity: Capacity) {
        *self.pace.lock().await = capacity.as_pace();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Cancel in-flight work and any pacing wait, and mark the source closed.
    /// A fresh cancellation token is installed so a later `reopen` can resume
    /// iteration without carrying over a token that's already cancelled.
    pub async fn close(&self) {
        let mut token_guard = self.token.lock().await;
        token_guard.cancel();
        self.active.store(false, Ordering::SeqCst);
        *token_guard = CancellationToken::new();
        *self.pace.lock().await = None;
    }

    pub fn reopen(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pr_common::{SupplyError, Update};
    use std::sync::Arc;
    use tokio::sync::Mutex as TokioMutex;

    struct FixedSupplier {
        batches: Arc<TokioMutex<Vec<Vec<Update>>>>,
    }

    #[async_trait]
    impl Supplier for FixedSupplier {
        async fn supply(
            &self,
            _batch_size: usize,
            _extras: &serde_json::Value,
            _token: CancellationToken,
        ) -> Result<Vec<Update>, SupplyError> {
            let mut batches = self.batches.lock().await;
            Ok(batches.pop().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn offset_advances_to_max_update_id_plus_one() {
        let supplier = FixedSupplier {
            batches: Arc::new(TokioMutex::new(vec![vec![
                Update::new(7, serde_json::json!({})),
            ]])),
        };
        let source = Source::new(
            supplier,
            pr_config::FetcherConfig::default(),
            SourceConfig::default(),
        );

        let batch = source.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(source.offset(), 8);
    }

    #[tokio::test]
    async fn close_marks_inactive_and_rejects_further_batches() {
        let supplier = FixedSupplier {
            batches: Arc::new(TokioMutex::new(vec![vec![]])),
        };
        let source = Source::new(
            supplier,
            pr_config::FetcherConfig::default(),
            SourceConfig::default(),
        );

        source.close().await;
        assert!(!source.is_active());
        assert!(matches!(
            source.next_batch().await,
            Err(SourceError::Closed)
        ));
    }
}
