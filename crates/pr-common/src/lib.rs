//! Shared data model, error types, and logging setup for the update runner.

pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;

pub use error::{FetcherError, HandlerError, RunnerError, SinkError, SourceError, SupplyError};
pub use model::{Batch, Capacity, Update};
