use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pr_common::{Batch, Capacity, SinkError, Update};
use pr_queue::{ConsumeFn, DecayingDeque, ErrorHandlerFn, Limit, TimeoutHandlerFn};

use crate::Handler;

/// Shared options across all sink modes.
#[derive(Clone)]
pub struct SinkOptions {
    /// Per-task timeout. `None` disables timeouts entirely.
    pub timeout: Option<Duration>,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self { timeout: None }
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn handle(&self, batch: Batch) -> Result<Capacity, SinkError>;
    async fn snapshot(&self) -> Vec<Update>;
}

fn build_callbacks<H>(handler: Arc<H>) -> (ConsumeFn<Update>, ErrorHandlerFn<Update>, TimeoutHandlerFn<Update>)
where
    H: Handler + 'static,
{
    let consume_handler = handler.clone();
    let consume: ConsumeFn<Update> = Arc::new(move |update| {
        let handler = consume_handler.clone();
        Box::pin(async move { handler.consume(update).await })
    });

    let error_handler_ref = handler.clone();
    let error_handler: ErrorHandlerFn<Update> = Arc::new(move |err, update| {
        let handler = error_handler_ref.clone();
        Box::pin(async move { handler.handle_error(err, update).await })
    });

    let timeout_handler_ref = handler;
    let timeout_handler: TimeoutHandlerFn<Update> = Arc::new(move |update, pending| {
        timeout_handler_ref.handle_timeout(update, pending);
    });

    (consume, error_handler, timeout_handler)
}

/// Processes updates one at a time, preserving input order. Returns
/// unbounded capacity; it never applies backpressure to the source.
pub struct SequentialSink {
    queue: DecayingDeque<Update>,
}

impl SequentialSink {
    pub fn new<H: Handler + 'static>(handler: Arc<H>, options: SinkOptions) -> Self {
        let (consume, error_handler, timeout_handler) = build_callbacks(handler);
        Self {
            queue: DecayingDeque::new(options.timeout, Limit::Bounded(1), consume, error_handler, timeout_handler),
        }
    }
}

#[async_trait]
impl Sink for SequentialSink {
    async fn handle(&self, batch: Batch) -> Result<Capacity, SinkError> {
        for update in batch {
            self.queue.add(vec![update]).await;
        }
        Ok(Capacity::Unbounded)
    }

    async fn snapshot(&self) -> Vec<Update> {
        self.queue.pending_tasks().await
    }
}

/// Processes a whole batch concurrently, but only returns once every update
/// in it has drained. Returns unbounded capacity.
pub struct BatchSink {
    queue: DecayingDeque<Update>,
}

impl BatchSink {
    pub fn new<H: Handler + 'static>(handler: Arc<H>, options: SinkOptions) -> Self {
        let (consume, error_handler, timeout_handler) = build_callbacks(handler);
        Self {
            queue: DecayingDeque::new(options.timeout, Limit::Unbounded, consume, error_handler, timeout_handler),
        }
    }
}

#[async_trait]
impl Sink for BatchSink {
    async fn handle(&self, batch: Batch) -> Result<Capacity, SinkError> {
        self.queue.add(batch).await;
        self.queue.wait_until_empty().await;
        Ok(Capacity::Unbounded)
    }

    async fn snapshot(&self) -> Vec<Update> {
        self.queue.pending_tasks().await
    }
}

/// Feeds the batch into a bounded-concurrency queue and returns its live
/// capacity. This is the sink mode that actually drives backpressure.
pub struct ConcurrentSink {
    queue: DecayingDeque<Update>,
}

const DEFAULT_CONCURRENCY: usize = 500;

impl ConcurrentSink {
    pub fn new<H: Handler + 'static>(handler: Arc<H>, concurrency: usize, options: SinkOptions) -> Self {
        let (consume, error_handler, timeout_handler) = build_callbacks(handler);
        Self {
            queue: DecayingDeque::new(
                options.timeout,
                Limit::Bounded(concurrency),
                consume,
                error_handler,
                timeout_handler,
            ),
        }
    }

    pub fn with_defaults<H: Handler + 'static>(handler: Arc<H>) -> Self {
        Self::new(handler, DEFAULT_CONCURRENCY, SinkOptions::default())
    }
}

#[async_trait]
impl Sink for ConcurrentSink {
    async fn handle(&self, batch: Batch) -> Result<Capacity, SinkError> {
        Ok(self.queue.add(batch).await)
    }

    async fn snapshot(&self) -> Vec<Update> {
        self.queue.pending_tasks().await
    }
}
