//! Core data model: `Update`, `Batch`, and `Capacity`.

use serde::{Deserialize, Serialize};

/// An opaque record pulled from the remote source.
///
/// Identity is `update_id`, which the source treats as strictly monotonically
/// increasing. `payload` carries whatever the caller's protocol puts in it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub update_id: u64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Update {
    pub fn new(update_id: u64, payload: serde_json::Value) -> Self {
        Self { update_id, payload }
    }
}

/// An ordered batch of updates returned by one pull.
pub type Batch = Vec<Update>;

/// Remaining admission headroom a sink is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

impl Capacity {
    pub fn as_pace(self) -> Option<usize> {
        match self {
            Capacity::Bounded(n) => Some(n),
            Capacity::Unbounded => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_as_pace() {
        assert_eq!(Capacity::Bounded(4).as_pace(), Some(4));
        assert_eq!(Capacity::Unbounded.as_pace(), None);
    }
}
