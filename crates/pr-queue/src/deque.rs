use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pr_common::{metrics, Capacity, HandlerError};

pub type ConsumeFn<U> = Arc<dyn Fn(U) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;
pub type ErrorHandlerFn<U> = Arc<dyn Fn(HandlerError, U) -> BoxFuture<'static, ()> + Send + Sync>;
pub type TimeoutHandlerFn<U> = Arc<dyn Fn(U, JoinHandle<Result<(), HandlerError>>) + Send + Sync>;

/// Concurrency bound for a `DecayingDeque`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(usize),
    Unbounded,
}

struct Inner<U> {
    timeout: Option<Duration>,
    semaphore: Option<Arc<Semaphore>>,
    consume: ConsumeFn<U>,
    error_handler: ErrorHandlerFn<U>,
    timeout_handler: TimeoutHandlerFn<U>,
    nodes: Mutex<IndexMap<u64, U>>,
    next_seq: AtomicU64,
    capacity_notify: Notify,
}

/// A bounded-concurrency task queue with per-task timeout expiry.
pub struct DecayingDeque<U> {
    inner: Arc<Inner<U>>,
}

impl<U> Clone for DecayingDeque<U> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<U> DecayingDeque<U>
where
    U: Clone + Send + Sync + 'static,
{
    pub fn new(
        timeout: Option<Duration>,
        limit: Limit,
        consume: ConsumeFn<U>,
        error_handler: ErrorHandlerFn<U>,
        timeout_handler: TimeoutHandlerFn<U>,
    ) -> Self {
        let semaphore = match limit {
            Limit::Bounded(n) => Some(Arc::new(Semaphore::new(n))),
            Limit::Unbounded => None,
        };

        Self {
            inner: Arc::new(Inner {
                timeout,
                semaphore,
                consume,
                error_handler,
                timeout_handler,
                nodes: Mutex::new(IndexMap::new()),
                next_seq: AtomicU64::new(0),
                capacity_notify: Notify::new(),
            }),
        }
    }

    /// Admit a batch of updates and resolve once at least one slot has freed
    /// up again (or immediately, for an unbounded queue).
    pub async fn add(&self, updates: Vec<U>) -> Capacity {
        for update in updates {
            self.admit_one(update).await;
        }
        self.wait_for_capacity().await
    }

    async fn admit_one(&self, update: U) {
        let permit = match &self.inner.semaphore {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .expect("decaying deque semaphore is never closed"),
            ),
            None => None,
        };

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let size = {
            let mut nodes = self.inner.nodes.lock().await;
            nodes.insert(seq, update.clone());
            nodes.len()
        };
        metrics::set_in_flight(size);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_node(inner, seq, update, permit).await;
        });
    }

    async fn wait_for_capacity(&self) -> Capacity {
        let Some(sem) = &self.inner.semaphore else {
            return Capacity::Unbounded;
        };

        loop {
            let notified = self.inner.capacity_notify.notified();
            let available = sem.available_permits();
            if available > 0 {
                return Capacity::Bounded(available);
            }
            notified.await;
        }
    }

    /// Current number of live (not yet completed/errored/timed-out) nodes.
    pub async fn len(&self) -> usize {
        self.inner.nodes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of updates currently enqueued, in insertion order.
    pub async fn pending_tasks(&self) -> Vec<U> {
        self.inner.nodes.lock().await.values().cloned().collect()
    }

    /// Wait until every currently- and subsequently-admitted node has
    /// drained. Used by sink modes that must await a whole batch rather than
    /// just the next freed slot.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.inner.capacity_notify.notified();
            if self.len().await == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn run_node<U>(
    inner: Arc<Inner<U>>,
    seq: u64,
    update: U,
    permit: Option<OwnedSemaphorePermit>,
) where
    U: Clone + Send + Sync + 'static,
{
    let consume_update = update.clone();
    let consume = inner.consume.clone();
    let mut handle: JoinHandle<Result<(), HandlerError>> =
        tokio::spawn(async move { consume(consume_update).await });

    let outcome = match inner.timeout {
        Some(timeout) => {
            tokio::select! {
                res = &mut handle => Some(res),
                _ = tokio::time::sleep(timeout) => None,
            }
        }
        None => Some((&mut handle).await),
    };

    match outcome {
        Some(Ok(Ok(()))) => {
            debug!(seq, "update consumed");
            metrics::record_updates_processed(1);
        }
        Some(Ok(Err(err))) => {
            metrics::record_updates_errored();
            (inner.error_handler)(err, update.clone()).await;
        }
        Some(Err(join_err)) => {
            warn!(seq, error = %join_err, "consume task panicked");
            metrics::record_updates_errored();
        }
        None => {
            metrics::record_updates_timed_out();
            (inner.timeout_handler)(update.clone(), handle);
        }
    }

    let remaining = {
        let mut nodes = inner.nodes.lock().await;
        nodes.shift_remove(&seq);
        nodes.len()
    };
    metrics::set_in_flight(remaining);
    drop(permit);
    inner.capacity_notify.notify_waiters();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn noop_error_handler<U: Send + 'static>() -> ErrorHandlerFn<U> {
        Arc::new(|_err, _update| Box::pin(async {}))
    }

    fn noop_timeout_handler<U: Send + 'static>() -> TimeoutHandlerFn<U> {
        Arc::new(|_update, _handle| {})
    }

    #[tokio::test]
    async fn single_update_resolves_with_remaining_capacity() {
        let queue: DecayingDeque<u64> = DecayingDeque::new(
            None,
            Limit::Bounded(12),
            Arc::new(|_u| Box::pin(async { Ok(()) })),
            noop_error_handler(),
            noop_timeout_handler(),
        );

        let capacity = queue.add(vec![7]).await;
        assert_eq!(capacity, Capacity::Bounded(11));
    }

    #[tokio::test]
    async fn capacity_backpressure_resolves_with_scenario_capacity_of_one() {
        use std::collections::HashMap;
        use tokio::sync::oneshot;

        // Gate every consume call behind its own oneshot so the test controls
        // exactly when each of the 6 updates drains, instead of racing real
        // scheduling. `#[tokio::test]` defaults to the current-thread
        // runtime, so cooperative `yield_now` calls deterministically drive
        // each step to completion before the test moves on.
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for id in 1..=6u64 {
            let (tx, rx) = oneshot::channel::<()>();
            senders.insert(id, tx);
            receivers.insert(id, rx);
        }
        let receivers = Arc::new(Mutex::new(receivers));

        let receivers_for_consume = receivers.clone();
        let consume: ConsumeFn<u64> = Arc::new(move |id| {
            let receivers = receivers_for_consume.clone();
            Box::pin(async move {
                let rx = receivers
                    .lock()
                    .await
                    .remove(&id)
                    .expect("gate exists for every admitted id");
                let _ = rx.await;
                Ok(())
            })
        });

        let queue: DecayingDeque<u64> = DecayingDeque::new(
            None,
            Limit::Bounded(3),
            consume,
            noop_error_handler(),
            noop_timeout_handler(),
        );

        let queue_for_add = queue.clone();
        let add_task = tokio::spawn(async move { queue_for_add.add(vec![1, 2, 3, 4, 5, 6]).await });

        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.len().await, 3);

        // Release items 1..3 one at a time. Each freed slot immediately
        // admits the next queued item (4, 5, 6), which blocks on its own
        // gate in turn, so queue length stays at 3 throughout.
        for id in 1..=3u64 {
            senders.remove(&id).unwrap().send(()).unwrap();
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
        }
        assert_eq!(queue.len().await, 3);

        // Release item 4: exactly one slot frees, matching the scenario's
        // "limit=3, add 6, final resolution capacity 1."
        senders.remove(&4).unwrap().send(()).unwrap();

        let capacity = add_task.await.unwrap();
        assert_eq!(capacity, Capacity::Bounded(1));

        for (_, tx) in senders {
            let _ = tx.send(());
        }
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_tasks_release_their_slot_and_invoke_handler() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations_clone = invocations.clone();

        let consume: ConsumeFn<u64> = Arc::new(|_u| {
            Box::pin(async {
                // never resolves within the timeout
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        });

        let timeout_handler: TimeoutHandlerFn<u64> = Arc::new(move |_update, handle| {
            invocations_clone.fetch_add(1, Ordering::SeqCst);
            handle.abort();
        });

        let queue: DecayingDeque<u64> = DecayingDeque::new(
            Some(Duration::from_millis(5)),
            Limit::Unbounded,
            consume,
            noop_error_handler(),
            timeout_handler,
        );

        let updates: Vec<u64> = (0..100).collect();
        queue.add(updates).await;

        tokio::time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        assert_eq!(queue.len().await, 0);
        assert_eq!(invocations.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn failing_consume_routes_to_error_handler_and_releases_slot() {
        let error_seen = Arc::new(AtomicUsize::new(0));
        let error_seen_clone = error_seen.clone();

        let consume: ConsumeFn<u64> =
            Arc::new(|_u| Box::pin(async { Err(HandlerError::Failed("boom".into())) }));
        let error_handler: ErrorHandlerFn<u64> = Arc::new(move |_err, _update| {
            error_seen_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        });

        let queue: DecayingDeque<u64> = DecayingDeque::new(
            None,
            Limit::Bounded(1),
            consume,
            error_handler,
            noop_timeout_handler(),
        );

        queue.add(vec![1]).await;
        // give the spawned task a chance to run to completion
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(error_seen.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn pending_tasks_snapshot_preserves_insertion_order() {
        let (tx, _rx) = mpsc::unbounded_channel::<()>();
        let consume: ConsumeFn<u64> = Arc::new(move |_u| {
            let _tx = tx.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        });

        let queue: DecayingDeque<u64> = DecayingDeque::new(
            None,
            Limit::Unbounded,
            consume,
            noop_error_handler(),
            noop_timeout_handler(),
        );

        queue.add(vec![1, 2, 3]).await;
        assert_eq!(queue.pending_tasks().await, vec![1, 2, 3]);
    }
}
