//! Identifiers for graph participants.
//!
//! Every dependency node and watcher gets a unique, monotonically increasing
//! id when created. Watcher ids double as the scheduling order: a watcher
//! created earlier always sorts first, which is what makes parents run
//! before children within a flush.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier of a dependency node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepId(u64);

impl DepId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Unique identifier of a watcher, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    pub(crate) fn next() -> Self {
        // Starts at 1 so that 0 never names a live watcher.
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique identifier of an owning unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let d1 = DepId::next();
        let d2 = DepId::next();
        assert!(d1 < d2);

        let w1 = WatcherId::next();
        let w2 = WatcherId::next();
        let w3 = WatcherId::next();
        assert!(w1 < w2 && w2 < w3);
        assert_ne!(w1.raw(), 0);
    }
}
