//! Retry coordination
//!
//! Classifies scan failures and decides how the scanner recovers:
//!
//! | kind             | action                                           |
//! |------------------|--------------------------------------------------|
//! | NotServingRegion | evict region, re-resolve, backoff                 |
//! | MetaUnavailable  | repeat the META lookup, `BrokenMeta` when spent   |
//! | Transient        | retry same server, then treat as NotServingRegion |
//! | Permanent        | fail                                              |
//!
//! Delays go through the injected [`Scheduler`]; nothing sleeps inline.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use region_core::{RegionCache, RegionInfo};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::{MetaConfig, RetryConfig};
use crate::error::{FailureKind, ScanError};
use crate::pending_retries::{PendingRetries, RequestKey};
use crate::scheduler::{self, Scheduler};
use crate::stats::ClientStats;

/// How a scanner should proceed after a recoverable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-issue the same request against the same server
    RetrySame,
    /// Drop the current region and resolve the cursor key again
    Reresolve,
}

/// A scheduled retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    pub action: RetryAction,
    pub delay: Duration,
    /// Attempt number of the counter that drove the delay
    pub attempt: u32,
}

/// Retry coordinator shared by every scanner of a client
pub struct RetryCoordinator {
    config: RetryConfig,
    meta_max_attempts: u32,
    cache: RegionCache,
    scheduler: Arc<dyn Scheduler>,
    pending: PendingRetries,
    stats: Arc<ClientStats>,
}

impl RetryCoordinator {
    pub fn new(
        config: RetryConfig,
        meta: &MetaConfig,
        cache: RegionCache,
        scheduler: Arc<dyn Scheduler>,
        stats: Arc<ClientStats>,
    ) -> Self {
        Self {
            config,
            meta_max_attempts: meta.max_attempts,
            cache,
            scheduler,
            pending: PendingRetries::new(),
            stats,
        }
    }

    pub fn pending(&self) -> &PendingRetries {
        &self.pending
    }

    /// Classify a failure
    pub fn classify(error: &ScanError) -> FailureKind {
        error.kind()
    }

    /// Decide how to recover from `error` raised by request `key`
    ///
    /// `region` is the region the failed request targeted, if any; it is
    /// evicted from the cache on NotServingRegion. Returns the terminal error
    /// when the failure is permanent or retries are exhausted, in which case
    /// the pending record is already discarded.
    pub fn on_failure(
        &self,
        key: RequestKey,
        error: ScanError,
        region: Option<&RegionInfo>,
    ) -> Result<RetryPlan, ScanError> {
        match Self::classify(&error) {
            FailureKind::Permanent => {
                self.pending.complete(key);
                error!(scan_id = key.scan_id, seq = key.seq, error = %error, "scan failed");
                Err(error)
            }
            FailureKind::MetaUnavailable => {
                let record = self
                    .pending
                    .record_failure(key, &error, |r| r.meta_attempts += 1);
                if record.meta_attempts >= self.meta_max_attempts {
                    self.pending.complete(key);
                    error!(
                        scan_id = key.scan_id,
                        attempts = record.meta_attempts,
                        error = %error,
                        "META lookups exhausted"
                    );
                    return Err(ScanError::BrokenMeta {
                        attempts: record.meta_attempts,
                        cause: error.to_string(),
                    });
                }
                Ok(self.plan(key, RetryAction::Reresolve, record.meta_attempts, &error))
            }
            FailureKind::Transient => {
                let record = self
                    .pending
                    .record_failure(key, &error, |r| r.transient_attempts += 1);
                if record.transient_attempts <= self.config.transient_attempts {
                    return Ok(self.plan(
                        key,
                        RetryAction::RetrySame,
                        record.transient_attempts,
                        &error,
                    ));
                }
                debug!(
                    scan_id = key.scan_id,
                    attempts = record.transient_attempts,
                    "transient retries spent, forcing re-resolution"
                );
                self.not_serving(key, error, region)
            }
            FailureKind::NotServingRegion => self.not_serving(key, error, region),
        }
    }

    fn not_serving(
        &self,
        key: RequestKey,
        error: ScanError,
        region: Option<&RegionInfo>,
    ) -> Result<RetryPlan, ScanError> {
        self.stats.record_not_serving_region();
        if let Some(region) = region {
            if self.cache.invalidate(region) {
                self.stats.record_invalidation();
            }
        }
        let record = self.pending.record_failure(key, &error, |r| {
            r.attempts += 1;
            r.transient_attempts = 0;
        });
        if record.attempts >= self.config.max_attempts {
            self.pending.complete(key);
            error!(
                scan_id = key.scan_id,
                attempts = record.attempts,
                error = %error,
                "giving up on region"
            );
            return Err(ScanError::TooManyAttempts {
                attempts: record.attempts,
                last: Box::new(error),
            });
        }
        Ok(self.plan(key, RetryAction::Reresolve, record.attempts, &error))
    }

    fn plan(&self, key: RequestKey, action: RetryAction, attempt: u32, error: &ScanError) -> RetryPlan {
        let delay = self.backoff(attempt);
        self.pending.set_next_eligible(key, Instant::now() + delay);
        warn!(
            scan_id = key.scan_id,
            seq = key.seq,
            attempt,
            delay_ms = delay.as_millis() as u64,
            ?action,
            error = %error,
            "retrying scan request"
        );
        RetryPlan {
            action,
            delay,
            attempt,
        }
    }

    /// Backoff before attempt `attempt` (1-based):
    /// `min(max_delay, base_delay * 2^(attempt-1))` plus jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let delay = self
            .config
            .base_delay()
            .saturating_mul(factor)
            .min(self.config.max_delay());
        if self.config.jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
        delay.saturating_add(Duration::from_millis(jitter))
    }

    /// Wait out a retry delay through the scheduler
    pub async fn wait(&self, plan: &RetryPlan) -> Result<(), ScanError> {
        self.stats.record_retry();
        if scheduler::sleep(self.scheduler.as_ref(), plan.delay).await {
            Ok(())
        } else {
            Err(ScanError::Permanent("retry was dropped by the scheduler".to_string()))
        }
    }

    /// Forget the record of a request that made progress
    pub fn on_success(&self, key: RequestKey) {
        self.pending.complete(key);
    }

    /// Forget every record of a closed scanner
    pub fn discard_scan(&self, scan_id: u64) -> usize {
        self.pending.remove_scan(scan_id)
    }
}
