//! An HTTP-backed [`Supplier`] for the common case where the remote protocol
//! is a JSON long-polling endpoint (offset/limit/timeout query parameters,
//! a JSON array of updates in the response body).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use pr_common::{SupplyError, Update};

use crate::Supplier;

/// An HTTP-backed [`Supplier`]. Tracks the offset of the next update to
/// request internally, the way the remote protocol's `getUpdates(offset,
/// limit, timeout)` shape requires: each request asks for `offset =
/// last_seen_update_id + 1`, and the offset advances once a response comes
/// back so the same window is never re-requested.
pub struct HttpSupplier {
    client: Client,
    endpoint: String,
    long_poll_timeout: Duration,
    offset: AtomicI64,
}

impl HttpSupplier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            long_poll_timeout: Duration::from_secs(30),
            offset: AtomicI64::new(0),
        }
    }

    pub fn with_long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }
}

#[async_trait]
impl Supplier for HttpSupplier {
    async fn supply(
        &self,
        batch_size: usize,
        extras: &serde_json::Value,
        token: CancellationToken,
    ) -> Result<Vec<Update>, SupplyError> {
        let offset = self.offset.load(Ordering::SeqCst);

        let mut query = vec![
            ("offset".to_string(), offset.to_string()),
            ("limit".to_string(), batch_size.to_string()),
            ("timeout".to_string(), self.long_poll_timeout.as_secs().to_string()),
        ];
        if let Some(extras) = extras.as_object() {
            for (key, value) in extras {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                query.push((key.clone(), value));
            }
        }

        let request = self.client.get(&self.endpoint).query(&query).send();

        let response = tokio::select! {
            () = token.cancelled() => return Err(SupplyError::Cancelled),
            result = request => result.map_err(|err| SupplyError::Transport(err.to_string()))?,
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::CONFLICT {
            return Err(SupplyError::NonRecoverable {
                status: status.as_u16(),
                message: status.to_string(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(SupplyError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(SupplyError::Transport(format!("unexpected status {status}")));
        }

        let updates = response
            .json::<Vec<Update>>()
            .await
            .map_err(|err| SupplyError::Transport(err.to_string()))?;

        if let Some(max_id) = updates.iter().map(|u| u.update_id).max() {
            self.offset.store(max_id as i64 + 1, Ordering::SeqCst);
        }

        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_starts_at_zero() {
        let supplier = HttpSupplier::new("https://example.invalid/updates");
        assert_eq!(supplier.offset.load(Ordering::SeqCst), 0);
    }
}
