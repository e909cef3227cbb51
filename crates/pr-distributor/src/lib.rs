//! Round-robin distribution of updates to a fixed pool of isolated workers.
//!
//! Workers are modeled as a channel pair rather than a real thread/process/
//! socket boundary. Only the message shape matters here: the parent sends a
//! one-time seed message (bot identity) followed by a stream of updates,
//! each worker echoes back the `update_id` it finished, and the parent
//! correlates that echo with whichever caller is waiting on it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use pr_common::Update;

/// Per-worker processing logic. A real deployment would run this inside an
/// isolated thread, process, or remote socket; here it runs inside the
/// worker's own single-consumer task, which already gives in-order
/// processing per worker.
#[async_trait]
pub trait WorkerLogic: Send + Sync + 'static {
    /// Called once, before the worker's first `process` call, with the bot
    /// identity the parent was constructed with. Default is a no-op for
    /// logic that doesn't need it.
    async fn seed(&self, _bot_identity: &str) {}

    async fn process(&self, update: Update);
}

const WORKER_CHANNEL_CAPACITY: usize = 128;

pub struct Distributor {
    workers: Vec<mpsc::Sender<Update>>,
    pending: Arc<Mutex<HashMap<u64, Vec<oneshot::Sender<()>>>>>,
    ack_task: JoinHandle<()>,
    worker_tasks: Vec<JoinHandle<()>>,
}

impl Distributor {
    pub fn new<F, L>(worker_count: usize, bot_identity: impl Into<String>, logic_factory: F) -> Self
    where
        F: Fn(usize) -> L,
        L: WorkerLogic,
    {
        let bot_identity = bot_identity.into();
        let pending: Arc<Mutex<HashMap<u64, Vec<oneshot::Sender<()>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<u64>();

        let mut workers = Vec::with_capacity(worker_count);
        let mut worker_tasks = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (tx, mut rx) = mpsc::channel::<Update>(WORKER_CHANNEL_CAPACITY);
            let logic = Arc::new(logic_factory(index));
            let ack_tx = ack_tx.clone();
            let bot_identity = bot_identity.clone();

            let task = tokio::spawn(async move {
                logic.seed(&bot_identity).await;
                while let Some(update) = rx.recv().await {
                    let update_id = update.update_id;
                    logic.process(update).await;
                    let _ = ack_tx.send(update_id);
                }
            });

            workers.push(tx);
            worker_tasks.push(task);
        }

        let pending_for_ack = pending.clone();
        let ack_task = tokio::spawn(async move {
            while let Some(update_id) = ack_rx.recv().await {
                let mut pending = pending_for_ack.lock().await;
                if let Some(mut resolvers) = pending.remove(&update_id) {
                    if let Some(resolver) = resolvers.pop() {
                        let _ = resolver.send(());
                    }
                    if !resolvers.is_empty() {
                        // Defensive fallback for a hypothetical update_id
                        // collision; normal operation never hits this since
                        // update_id is strictly monotonic.
                        pending.insert(update_id, resolvers);
                    }
                }
            }
        });

        Self {
            workers,
            pending,
            ack_task,
            worker_tasks,
        }
    }

    /// Dispatch `update` to `update_id % worker_count` and await that
    /// worker's completion echo.
    pub async fn process(&self, update: Update) {
        let worker_index = update.update_id as usize % self.workers.len();
        let (resolve_tx, resolve_rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            pending.entry(update.update_id).or_default().push(resolve_tx);
        }

        if self.workers[worker_index].send(update).await.is_err() {
            debug!("worker channel closed before dispatch");
            return;
        }

        let _ = resolve_rx.await;
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting new work and let in-flight updates drain.
    pub async fn shutdown(self) {
        drop(self.workers);
        for task in self.worker_tasks {
            let _ = task.await;
        }
        self.ack_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RoutingLogic {
        worker_index: usize,
        seen: Arc<Mutex<Vec<(usize, u64)>>>,
    }

    #[async_trait]
    impl WorkerLogic for RoutingLogic {
        async fn process(&self, update: Update) {
            self.seen.lock().await.push((self.worker_index, update.update_id));
        }
    }

    #[tokio::test]
    async fn round_robins_by_update_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let distributor = Distributor::new(4, "test-bot", move |index| RoutingLogic {
            worker_index: index,
            seen: seen_clone.clone(),
        });

        for id in 0..8u64 {
            distributor
                .process(Update::new(id, serde_json::json!({})))
                .await;
        }

        let mut recorded = seen.lock().await.clone();
        recorded.sort_by_key(|(_, id)| *id);
        for (expected_id, (worker, actual_id)) in recorded.into_iter().enumerate() {
            assert_eq!(actual_id, expected_id as u64);
            assert_eq!(worker, expected_id % 4);
        }
    }

    struct CountingLogic {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkerLogic for CountingLogic {
        async fn process(&self, _update: Update) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn process_resolves_only_after_worker_completion() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let distributor = Distributor::new(2, "test-bot", move |_| CountingLogic {
            count: count_clone.clone(),
        });

        distributor
            .process(Update::new(1, serde_json::json!({})))
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    struct SeedRecordingLogic {
        seeds: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl WorkerLogic for SeedRecordingLogic {
        async fn seed(&self, bot_identity: &str) {
            self.seeds.lock().await.push(bot_identity.to_string());
        }

        async fn process(&self, _update: Update) {}
    }

    #[tokio::test]
    async fn each_worker_is_seeded_once_before_processing() {
        let seeds = Arc::new(Mutex::new(Vec::new()));
        let seeds_clone = seeds.clone();
        let distributor = Distributor::new(3, "my-bot", move |_| SeedRecordingLogic {
            seeds: seeds_clone.clone(),
        });

        distributor
            .process(Update::new(1, serde_json::json!({})))
            .await;
        // give the other, idle workers a chance to run their seed step
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let recorded = seeds.lock().await.clone();
        assert_eq!(recorded.len(), 3);
        assert!(recorded.iter().all(|id| id == "my-bot"));
    }
}
