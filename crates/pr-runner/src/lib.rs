//! The runner: drives the `source -> sink -> pace back to source` loop and
//! exposes start/stop lifecycle control.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use pr_common::{RunnerError, SourceError};
use pr_sink::Sink;
use pr_source::{Source, Supplier};

pub struct Runner<S: Supplier> {
    source: Arc<Source<S>>,
    sink: Arc<dyn Sink>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<Result<(), RunnerError>>>>,
}

impl<S: Supplier + 'static> Runner<S> {
    pub fn new(source: Source<S>, sink: Arc<dyn Sink>) -> Self {
        Self {
            source: Arc::new(source),
            sink,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the pull/dispatch loop in the background. A no-op if already
    /// running.
    pub async fn start(&self) {
        let mut task_guard = self.task.lock().expect("runner task mutex poisoned");
        if task_guard.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        self.source.reopen();

        let source = self.source.clone();
        let sink = self.sink.clone();
        let running = self.running.clone();

        info!("update runner starting");
        *task_guard = Some(tokio::spawn(run_loop(source, sink, running)));
    }

    /// Stop accepting new batches, close the source, and await in-flight
    /// handler work before returning.
    pub async fn stop(&self) -> Result<(), RunnerError> {
        self.running.store(false, Ordering::SeqCst);
        self.source.close().await;

        let handle = self.task.lock().expect("runner task mutex poisoned").take();
        if let Some(handle) = handle {
            return match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    warn!(error = %join_err, "runner task panicked");
                    Ok(())
                }
            };
        }
        Ok(())
    }

    /// The current run's completion handle, or `None` if the runner has
    /// never been started or has already been taken by `stop`.
    pub fn task(&self) -> MutexGuard<'_, Option<JoinHandle<Result<(), RunnerError>>>> {
        self.task.lock().expect("runner task mutex poisoned")
    }

    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .expect("runner task mutex poisoned")
            .as_ref()
            .map_or(true, |t| t.is_finished())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.source.is_active()
    }

    /// Number of updates currently in flight in the sink.
    pub async fn size(&self) -> usize {
        self.sink.snapshot().await.len()
    }
}

async fn run_loop<S: Supplier>(
    source: Arc<Source<S>>,
    sink: Arc<dyn Sink>,
    running: Arc<AtomicBool>,
) -> Result<(), RunnerError> {
    while running.load(Ordering::SeqCst) {
        match source.next_batch().await {
            Ok(batch) => {
                let capacity = sink.handle(batch).await?;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                source.set_generator_pace(capacity).await;
            }
            Err(SourceError::Closed) => break,
            Err(err) => {
                if !running.load(Ordering::SeqCst) {
                    // An abort-induced failure racing the stop() call;
                    // expected, not fatal.
                    break;
                }
                return Err(RunnerError::Source(err));
            }
        }
    }
    info!("update runner loop exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pr_common::{Batch, Capacity, HandlerError, SinkError, SupplyError, Update};
    use std::sync::atomic::AtomicUsize;
    use tokio_util::sync::CancellationToken;

    struct CountingSupplier {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Supplier for CountingSupplier {
        async fn supply(
            &self,
            _batch_size: usize,
            _extras: &serde_json::Value,
            _token: CancellationToken,
        ) -> Result<Vec<Update>, SupplyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Update::new(n as u64, serde_json::json!({}))])
        }
    }

    struct NoopSink;

    #[async_trait]
    impl Sink for NoopSink {
        async fn handle(&self, _batch: Batch) -> Result<Capacity, SinkError> {
            Ok(Capacity::Unbounded)
        }

        async fn snapshot(&self) -> Vec<Update> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn start_then_stop_completes_cleanly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Source::new(
            CountingSupplier { calls: calls.clone() },
            pr_config::FetcherConfig::default(),
            pr_config::SourceConfig::default(),
        );
        let runner = Runner::new(source, Arc::new(NoopSink));

        runner.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        runner.stop().await.unwrap();

        assert!(calls.load(Ordering::SeqCst) > 0);
        assert!(!runner.is_running());
    }

    struct FailingSupplier;

    #[async_trait]
    impl Supplier for FailingSupplier {
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
    async fn non_recoverable_error_propagates_to_stop() {
        let source = Source::new(
            FailingSupplier,
            pr_config::FetcherConfig::default(),
            pr_config::SourceConfig::default(),
        );
        let runner = Runner::new(source, Arc::new(NoopSink));

        runner.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let result = runner.stop().await;
        assert!(result.is_err());
    }
}
