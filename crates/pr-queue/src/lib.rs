//! The decaying deque: a bounded-concurrency task queue whose nodes
//! self-expire at a fixed deadline.
//!
//! Admission is FIFO. A node leaves the queue the instant it completes,
//! errors, or times out, whichever comes first. A timed-out node's slot is
//! freed immediately; the underlying task keeps running and its eventual
//! outcome is routed to the caller's `timeout_handler` via the `JoinHandle`
//! it was given, not back into the queue.

mod deque;

pub use deque::{ConsumeFn, DecayingDeque, ErrorHandlerFn, Limit, TimeoutHandlerFn};
