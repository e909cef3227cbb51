//! Example composition root: wires a fake long-polling supplier through the
//! source, a sequentializing handler, and the concurrent sink, into a
//! runnable update runner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use pr_common::{HandlerError, SupplyError, Update};
use pr_config::RunnerConfig;
use pr_sequentializer::Sequentializer;
use pr_sink::{ConcurrentSink, Handler, Sink, SinkOptions};
use pr_source::{Source, Supplier};

/// Stands in for a real remote long-polling endpoint: hands out a
/// monotonically increasing run of synthetic updates, one simulated "chat"
/// per update_id mod 4.
struct DemoSupplier {
    next_id: AtomicU64,
}

#[async_trait]
impl Supplier for DemoSupplier {
    async fn supply(
        &self,
        batch_size: usize,
        _extras: &serde_json::Value,
        token: CancellationToken,
    ) -> Result<Vec<Update>, SupplyError> {
        tokio::select! {
            () = token.cancelled() => Err(SupplyError::Cancelled),
            () = tokio::time::sleep(Duration::from_millis(200)) => {
                let mut updates = Vec::with_capacity(batch_size.min(5));
                for _ in 0..batch_size.min(5) {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    updates.push(Update::new(
                        id,
                        serde_json::json!({ "chat_id": id % 4 }),
                    ));
                }
                Ok(updates)
            }
        }
    }
}

/// Serializes updates that share a `chat_id` before printing them.
struct DemoHandler {
    sequentializer: Sequentializer,
}

#[async_trait]
impl Handler for DemoHandler {
    async fn consume(&self, update: Update) -> Result<(), HandlerError> {
        let chat_id = update.payload["chat_id"].as_u64().unwrap_or(0);
        let keys = vec![format!("chat:{chat_id}")];

        self.sequentializer
            .run(keys, move || async move {
                info!(update_id = update.update_id, chat_id, "processed update");
            })
            .await;

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pr_common::logging::init_logging("pr-dev");

    let config = RunnerConfig::load().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "failed to load config, using defaults");
        RunnerConfig::default()
    });

    let supplier = DemoSupplier {
        next_id: AtomicU64::new(1),
    };
    let source = Source::new(supplier, config.fetcher, config.source);

    let handler = Arc::new(DemoHandler {
        sequentializer: Sequentializer::new(),
    });
    let sink_options = SinkOptions {
        timeout: config.sink.timeout_ms.map(Duration::from_millis),
    };
    let sink: Arc<dyn Sink> = Arc::new(ConcurrentSink::new(
        handler,
        config.sink.concurrency,
        sink_options,
    ));

    let runner = pr_runner::Runner::new(source, sink);
    runner.start().await;
    info!("update runner started, press Ctrl+C to stop");

    signal::ctrl_c().await?;
    info!("shutdown signal received");

    runner.stop().await?;
    info!("update runner stopped cleanly");

    Ok(())
}
