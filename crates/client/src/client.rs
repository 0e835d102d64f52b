//! Client facade
//!
//! Wires the region cache, META resolver and retry coordinator together and
//! opens scanners on top of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use region_core::key_encoding::pretty;
use region_core::{region::validate_table, RegionCache};
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::error::ScanError;
use crate::meta_resolver::{MetaResolver, RegionLocation};
use crate::retry::RetryCoordinator;
use crate::scanner::{ScanContext, ScanCursor, ScanOptions, ScannerHandle};
use crate::scheduler::Scheduler;
use crate::stats::{ClientStats, StatsSnapshot};
use crate::transport::{Direction, RegionTransport};

/// Region-aware scan client
///
/// Cheap to clone; clones share the region cache and pending retries.
#[derive(Clone)]
pub struct Client {
    config: Arc<Config>,
    cache: RegionCache,
    ctx: ScanContext,
    stats: Arc<ClientStats>,
    next_scan_id: Arc<AtomicU64>,
}

impl Client {
    pub fn new(
        config: Config,
        transport: Arc<dyn RegionTransport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ConfigError> {
        Self::with_cache(config, RegionCache::new(), transport, scheduler)
    }

    /// Create a client on top of an existing region cache
    pub fn with_cache(
        config: Config,
        cache: RegionCache,
        transport: Arc<dyn RegionTransport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let stats = Arc::new(ClientStats::default());
        let resolver = Arc::new(MetaResolver::new(
            cache.clone(),
            transport.clone(),
            stats.clone(),
            &config.meta,
        ));
        let retry = Arc::new(RetryCoordinator::new(
            config.retry.clone(),
            &config.meta,
            cache.clone(),
            scheduler,
            stats.clone(),
        ));
        info!(
            meta_table = %config.meta.table,
            batch_size = config.scan.batch_size,
            max_attempts = config.retry.max_attempts,
            "region client created"
        );
        Ok(Self {
            config: Arc::new(config),
            cache,
            ctx: ScanContext {
                resolver,
                retry,
                transport,
            },
            stats,
            next_scan_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn region_cache(&self) -> &RegionCache {
        &self.cache
    }

    /// Open a scanner with default options
    pub fn open_scanner(
        &self,
        table: impl Into<Bytes>,
        start_key: impl Into<Bytes>,
        stop_key: impl Into<Bytes>,
        direction: Direction,
    ) -> Result<ScannerHandle, ScanError> {
        self.new_scanner(table)
            .start_key(start_key)
            .stop_key(stop_key)
            .direction(direction)
            .open()
    }

    /// Start building a scanner over `table`
    pub fn new_scanner(&self, table: impl Into<Bytes>) -> ScannerBuilder<'_> {
        ScannerBuilder {
            client: self,
            table: table.into(),
            start_key: Bytes::new(),
            stop_key: Bytes::new(),
            direction: Direction::Forward,
            options: ScanOptions {
                batch_size: self.config.scan.batch_size,
                family: None,
                qualifier: None,
            },
        }
    }

    /// Find the region holding `key`, consulting META on a cache miss
    pub async fn locate_region(
        &self,
        table: &[u8],
        key: &[u8],
    ) -> Result<RegionLocation, ScanError> {
        validate_table(table).map_err(|e| ScanError::Permanent(e.to_string()))?;
        self.ctx.resolver.resolve(table, key).await
    }

    /// Load every region of `table` into the cache
    pub async fn prefetch_meta(&self, table: &[u8]) -> Result<usize, ScanError> {
        validate_table(table).map_err(|e| ScanError::Permanent(e.to_string()))?;
        self.ctx.resolver.prefetch(table).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of logical requests currently waiting on a retry
    pub fn pending_retries(&self) -> usize {
        self.ctx.retry.pending().len()
    }
}

/// Builder for [`ScannerHandle`]
pub struct ScannerBuilder<'a> {
    client: &'a Client,
    table: Bytes,
    start_key: Bytes,
    stop_key: Bytes,
    direction: Direction,
    options: ScanOptions,
}

impl ScannerBuilder<'_> {
    /// First key of the scan; the upper (exclusive) bound in reverse
    pub fn start_key(mut self, key: impl Into<Bytes>) -> Self {
        self.start_key = key.into();
        self
    }

    /// Exclusive end of the scan; the lower bound in reverse
    pub fn stop_key(mut self, key: impl Into<Bytes>) -> Self {
        self.stop_key = key.into();
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn reversed(self) -> Self {
        self.direction(Direction::Reverse)
    }

    pub fn family(mut self, family: impl Into<Bytes>) -> Self {
        self.options.family = Some(family.into());
        self
    }

    pub fn qualifier(mut self, qualifier: impl Into<Bytes>) -> Self {
        self.options.qualifier = Some(qualifier.into());
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    pub fn open(self) -> Result<ScannerHandle, ScanError> {
        validate_table(&self.table).map_err(|e| ScanError::Permanent(e.to_string()))?;
        if self.options.batch_size == 0 {
            return Err(ScanError::Permanent("batch size must be positive".to_string()));
        }
        if self.options.qualifier.is_some() && self.options.family.is_none() {
            return Err(ScanError::Permanent(
                "a qualifier requires a column family".to_string(),
            ));
        }

        let scan_id = self.client.next_scan_id.fetch_add(1, Ordering::Relaxed);
        self.client.stats.record_scanner_opened();
        debug!(
            scan_id,
            table = %pretty(&self.table),
            start = %pretty(&self.start_key),
            stop = %pretty(&self.stop_key),
            direction = ?self.direction,
            "opening scanner"
        );
        let cursor = ScanCursor::new(self.table, self.start_key, self.stop_key, self.direction);
        Ok(ScannerHandle::new(
            self.client.ctx.clone(),
            scan_id,
            cursor,
            self.options,
        ))
    }
}
