//! Pending retry tracker
//!
//! Tracks the retry state of failed logical requests. A logical request is
//! one `next_batch` call of one scanner; it may span several resolutions and
//! fetches until it delivers rows, ends the scan or fails.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{FailureKind, ScanError};

/// Identity of a logical request: (scanner id, request sequence)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub scan_id: u64,
    pub seq: u64,
}

impl RequestKey {
    pub fn new(scan_id: u64, seq: u64) -> Self {
        Self { scan_id, seq }
    }
}

/// Retry state of one failed logical request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetry {
    /// Classification of the last failure
    pub kind: FailureKind,
    /// Re-resolutions forced by NotServingRegion failures
    pub attempts: u32,
    /// Consecutive transient failures against the current server
    pub transient_attempts: u32,
    /// Failed META lookups
    pub meta_attempts: u32,
    /// Earliest time the next attempt may run
    pub next_eligible: Instant,
    pub last_error: ScanError,
}

impl PendingRetry {
    fn new(error: &ScanError) -> Self {
        Self {
            kind: error.kind(),
            attempts: 0,
            transient_attempts: 0,
            meta_attempts: 0,
            next_eligible: Instant::now(),
            last_error: error.clone(),
        }
    }
}

/// Pending retry tracker, shared by every scanner of a client
#[derive(Clone, Default)]
pub struct PendingRetries {
    /// request key -> retry state
    records: Arc<Mutex<HashMap<RequestKey, PendingRetry>>>,
}

impl PendingRetries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure, creating the record on first failure, and return
    /// the updated state
    pub fn record_failure<F>(&self, key: RequestKey, error: &ScanError, update: F) -> PendingRetry
    where
        F: FnOnce(&mut PendingRetry),
    {
        let mut records = self.records.lock();
        let record = records
            .entry(key)
            .or_insert_with(|| PendingRetry::new(error));
        record.kind = error.kind();
        record.last_error = error.clone();
        update(record);
        record.clone()
    }

    /// Set when the next attempt of a request becomes eligible
    pub fn set_next_eligible(&self, key: RequestKey, at: Instant) {
        if let Some(record) = self.records.lock().get_mut(&key) {
            record.next_eligible = at;
        }
    }

    pub fn get(&self, key: RequestKey) -> Option<PendingRetry> {
        self.records.lock().get(&key).cloned()
    }

    /// Remove a finished request
    pub fn complete(&self, key: RequestKey) -> Option<PendingRetry> {
        self.records.lock().remove(&key)
    }

    /// Remove every record of a scanner, returning how many were dropped
    pub fn remove_scan(&self, scan_id: u64) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|key, _| key.scan_id != scan_id);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
