//! Per-key FIFO middleware.
//!
//! Invocations whose key sets intersect run strictly in arrival order
//! against one another; invocations with disjoint key sets run concurrently.
//! Chains are built on *settlement*, not success, so a failing invocation
//! never poisons the ones queued behind it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

struct ChainEntry {
    tail: Shared<BoxFuture<'static, ()>>,
    refcount: usize,
}

/// The per-key chain map. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Sequentializer {
    chains: Arc<Mutex<HashMap<String, ChainEntry>>>,
}

impl Sequentializer {
    pub fn new() -> Self {
        Self {
            chains: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of keys currently holding a live chain. Used to assert the map
    /// drains back to empty once all referencing tasks settle.
    pub async fn active_key_count(&self) -> usize {
        self.chains.lock().await.len()
    }

    /// Run `next` serialized against every prior invocation that shared a
    /// key with `keys`. An empty key set runs immediately, unserialized.
    pub async fn run<F, Fut, T>(&self, keys: Vec<String>, next: F) -> T
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let keys = normalize(keys);
        if keys.is_empty() {
            return next().await;
        }

        let (result_tx, result_rx) = oneshot::channel::<T>();

        // The read-prior-tails and write-new-tail steps must happen under one
        // lock acquisition. Splitting them lets a second `run` sharing a key
        // observe the same stale prior tail in the gap between our read and
        // our write, which would let both invocations' `next()` run
        // concurrently instead of serialized.
        let settled: Shared<BoxFuture<'static, ()>> = {
            let mut chains = self.chains.lock().await;
            let mut barrier_tails = Vec::with_capacity(keys.len());
            for key in &keys {
                let entry = chains.entry(key.clone()).or_insert_with(|| ChainEntry {
                    tail: futures::future::ready(()).boxed().shared(),
                    refcount: 0,
                });
                barrier_tails.push(entry.tail.clone());
                entry.refcount += 1;
            }

            let settled: Shared<BoxFuture<'static, ()>> = async move {
                futures::future::join_all(barrier_tails).await;
                let output = next().await;
                let _ = result_tx.send(output);
            }
            .boxed()
            .shared();

            for key in &keys {
                if let Some(entry) = chains.get_mut(key) {
                    entry.tail = settled.clone();
                }
            }

            settled
        };

        settled.await;
        let output = result_rx
            .await
            .expect("sequentializer task always produces a result");

        self.release(&keys).await;
        output
    }

    async fn release(&self, keys: &[String]) {
        let mut chains = self.chains.lock().await;
        for key in keys {
            if let Some(entry) = chains.get_mut(key) {
                entry.refcount -= 1;
                if entry.refcount == 0 {
                    chains.remove(key);
                    debug!(key, "sequentializer chain drained");
                }
            }
        }
    }
}

impl Default for Sequentializer {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(keys: Vec<String>) -> Vec<String> {
    let mut keys: Vec<String> = keys.into_iter().filter(|k| !k.is_empty()).collect();
    keys.sort();
    keys.dedup();
    keys
}
