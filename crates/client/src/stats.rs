//! Client counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every scanner of a client
#[derive(Debug, Default)]
pub struct ClientStats {
    meta_lookups: AtomicU64,
    not_serving_region: AtomicU64,
    invalidations: AtomicU64,
    retries_scheduled: AtomicU64,
    scanners_opened: AtomicU64,
}

/// Point-in-time copy of [`ClientStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Closest-row-before requests sent to META
    pub meta_lookups: u64,
    /// NotServingRegion failures observed
    pub not_serving_region: u64,
    /// Regions evicted from the cache after a failure
    pub invalidations: u64,
    /// Retries handed to the scheduler
    pub retries_scheduled: u64,
    pub scanners_opened: u64,
}

impl ClientStats {
    pub fn record_meta_lookup(&self) {
        self.meta_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_serving_region(&self) {
        self.not_serving_region.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scanner_opened(&self) {
        self.scanners_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            meta_lookups: self.meta_lookups.load(Ordering::Relaxed),
            not_serving_region: self.not_serving_region.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            scanners_opened: self.scanners_opened.load(Ordering::Relaxed),
        }
    }
}
