use async_trait::async_trait;
use tokio::task::JoinHandle;

use pr_common::{HandlerError, Update};

/// The user-supplied collaborator consumed by a [`crate::Sink`].
#[async_trait]
pub trait Handler: Send + Sync {
    async fn consume(&self, update: Update) -> Result<(), HandlerError>;

    async fn handle_error(&self, _err: HandlerError, _update: Update) {}

    /// Called synchronously when an update's timeout fires. `pending` is the
    /// still-running `consume` task; its eventual outcome is the caller's to
    /// observe, not the sink's.
    fn handle_timeout(&self, update: Update, pending: JoinHandle<Result<(), HandlerError>>) {
        tokio::spawn(async move {
            match pending.await {
                Ok(Ok(())) => {
                    tracing::debug!(update_id = update.update_id, "late consume settled after timeout")
                }
                Ok(Err(err)) => {
                    tracing::warn!(update_id = update.update_id, error = %err, "late consume failed after timeout")
                }
                Err(join_err) => {
                    tracing::warn!(update_id = update.update_id, error = %join_err, "late consume task panicked")
                }
            }
        });
    }
}
