//! Ambient counters and gauges for the update runner pipeline.
//!
//! Free functions over the `metrics` facade, in the same style as a
//! Prometheus exporter layer would consume: callers just record events,
//! and whatever recorder the binary installs (or none, if nothing is
//! installed) receives them.

use metrics::{counter, gauge};

/// An update was pulled from the remote long-poll endpoint.
pub fn record_updates_polled(count: u64) {
    counter!("updates_polled_total").increment(count);
}

/// An update finished processing successfully.
pub fn record_updates_processed(count: u64) {
    counter!("updates_processed_total").increment(count);
}

/// A handler task exceeded its timeout and was aborted.
pub fn record_updates_timed_out() {
    counter!("updates_timed_out_total").increment(1);
}

/// A handler task returned an error.
pub fn record_updates_errored() {
    counter!("updates_errored_total").increment(1);
}

/// A fetch attempt was retried after a recoverable failure.
pub fn record_retry() {
    counter!("retry_total").increment(1);
}

/// Current number of updates in flight in the sink.
pub fn set_in_flight(count: usize) {
    gauge!("in_flight").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_an_installed_recorder_does_not_panic() {
        record_updates_polled(3);
        record_updates_processed(1);
        record_updates_timed_out();
        record_updates_errored();
        record_retry();
        set_in_flight(7);
    }
}
