//! The pull source: adapts batch size and pacing to downstream feedback, and
//! retries transport failures with backoff before giving up.

mod fetcher;
mod http_supplier;
mod source;
mod supplier;

pub use fetcher::Fetcher;
pub use http_supplier::HttpSupplier;
pub use source::Source;
pub use supplier::Supplier;
