//! Crate-wide error types.

use thiserror::Error;

/// Error raised by a `Supplier` implementation.
#[derive(Debug, Error)]
pub enum SupplyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("non-recoverable error (status {status}): {message}")]
    NonRecoverable { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("operation cancelled")]
    Cancelled,
}

/// Error raised by the retry-wrapped fetcher once it gives up.
#[derive(Debug, Error)]
pub enum FetcherError {
    #[error("supplier error: {0}")]
    Supply(#[from] SupplyError),

    #[error("retry budget exhausted after {elapsed_ms}ms")]
    RetryBudgetExhausted { elapsed_ms: u64 },
}

/// Error surfaced by the Source's iteration.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetcherError),

    #[error("source closed")]
    Closed,
}

/// Error raised by a consumer's `consume` callback.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Error raised by a `Sink`.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("queue is shut down")]
    ShutDown,
}

/// Top-level crate error, used at the Runner boundary.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("configuration error: {0}")]
    Config(String),
}
