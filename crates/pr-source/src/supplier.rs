use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use pr_common::{SupplyError, Update};

/// External collaborator that performs one batch pull.
///
/// Implementations must clamp `batch_size` to whatever range their remote
/// protocol accepts, and must reject promptly with [`SupplyError::Cancelled`]
/// once `token` is cancelled rather than blocking past it. `extras` is the
/// fetcher's configured `fetch` option, forwarded verbatim so a deployment
/// can pass protocol-specific parameters without this trait knowing about
/// them.
#[async_trait]
pub trait Supplier: Send + Sync {
    async fn supply(
        &self,
        batch_size: usize,
        extras: &serde_json::Value,
        token: CancellationToken,
    ) -> Result<Vec<Update>, SupplyError>;
}
