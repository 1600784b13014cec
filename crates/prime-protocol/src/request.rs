//! Request correlation ids.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Correlates a response with the request that caused it.
///
/// Ids are unique per sender. A responder copies the id from the request
/// into its reply unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Monotonic source of request ids. Starts at 1.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns a fresh id.
    pub fn next_id(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_monotonic_from_one() {
        let gen = RequestIdGenerator::new();
        assert_eq!(gen.next_id(), RequestId::new(1));
        assert_eq!(gen.next_id(), RequestId::new(2));
        assert_eq!(gen.next_id().get(), 3);
    }

    #[test]
    fn test_request_id_serde_transparent() {
        let id = RequestId::new(77);
        assert_eq!(serde_json::to_string(&id).unwrap(), "77");
        assert_eq!(id.to_string(), "77");
    }
}
