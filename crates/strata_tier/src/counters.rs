// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-tier request counters.
//!
//! Each tier increments these on its own traffic; the stats aggregator
//! periodically drains them with [`TierCounters::take`]-style reads so
//! deltas merge into the shared snapshot exactly once. A drain that never
//! happens (the aggregation lock was contended) loses nothing; counts
//! keep accumulating until a later cycle wins the lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic request/miss/load-time counters for one tier.
#[derive(Debug, Default)]
pub struct TierCounters {
    requests: AtomicU64,
    misses: AtomicU64,
    load_time_ms: AtomicU64,
}

impl TierCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one request against this tier.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one miss (for the remote tier: one loader execution).
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds loader wall time in milliseconds.
    pub fn add_load_time_ms(&self, ms: u64) {
        self.load_time_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Current request count.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Current miss count.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Reads and resets the request count.
    pub fn take_requests(&self) -> u64 {
        self.requests.swap(0, Ordering::Relaxed)
    }

    /// Reads and resets the miss count.
    pub fn take_misses(&self) -> u64 {
        self.misses.swap(0, Ordering::Relaxed)
    }

    /// Reads and resets the accumulated load time.
    pub fn take_load_time_ms(&self) -> u64 {
        self.load_time_ms.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_without_losing_later_increments() {
        let counters = TierCounters::new();
        counters.record_request();
        counters.record_request();
        counters.record_miss();

        assert_eq!(counters.take_requests(), 2);
        assert_eq!(counters.take_misses(), 1);

        counters.record_request();
        assert_eq!(counters.requests(), 1);
        assert_eq!(counters.take_requests(), 1);
        assert_eq!(counters.take_requests(), 0);
    }

    #[test]
    fn load_time_accumulates() {
        let counters = TierCounters::new();
        counters.add_load_time_ms(12);
        counters.add_load_time_ms(30);
        assert_eq!(counters.take_load_time_ms(), 42);
        assert_eq!(counters.take_load_time_ms(), 0);
    }
}
