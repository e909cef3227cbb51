//! Sink adapters: the three ways a batch of updates can be fed through a
//! [`pr_queue::DecayingDeque`].

mod handler;
mod sink;

pub use handler::Handler;
pub use sink::{BatchSink, ConcurrentSink, Sink, SequentialSink, SinkOptions};
