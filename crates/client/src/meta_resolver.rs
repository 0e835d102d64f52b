//! META lookup protocol
//!
//! Translates an unresolved (table, key) into the region owning it by asking
//! the META server for the closest row at or before a search key:
//!
//! - forward: the region covering `key` ([`MetaResolver::resolve`])
//! - reverse crossing: the region ending exactly at a boundary
//!   ([`MetaResolver::resolve_before`])
//! - reverse seek: the region holding the keys just below a key
//!   ([`MetaResolver::resolve_covering_before`])
//! - the last region of a table ([`MetaResolver::resolve_last`])
//!
//! Each call performs at most one META round trip. Retrying a failed lookup
//! is up to the caller (see `retry`).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use region_core::key_encoding::{self, pretty};
use region_core::{CachedRegion, MetaEntry, RegionCache, RegionInfo};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::MetaConfig;
use crate::error::ScanError;
use crate::stats::ClientStats;
use crate::transport::{RegionTransport, RpcError};

/// Resolved region and the server believed to serve it
pub type RegionLocation = CachedRegion;

type Gate = Arc<AsyncMutex<()>>;

/// Serializes lookups of one META search key
struct InFlight<'a> {
    gates: &'a Mutex<HashMap<Vec<u8>, Gate>>,
    key: Vec<u8>,
    gate: Gate,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut gates = self.gates.lock();
        // Nobody but the map and this guard is waiting on the gate
        if Arc::strong_count(&self.gate) <= 2 {
            gates.remove(&self.key);
        }
    }
}

/// Region resolver backed by the META table
pub struct MetaResolver {
    cache: RegionCache,
    transport: Arc<dyn RegionTransport>,
    stats: Arc<ClientStats>,
    meta_table: Bytes,
    meta_family: Bytes,
    in_flight: Mutex<HashMap<Vec<u8>, Gate>>,
}

impl MetaResolver {
    pub fn new(
        cache: RegionCache,
        transport: Arc<dyn RegionTransport>,
        stats: Arc<ClientStats>,
        config: &MetaConfig,
    ) -> Self {
        Self {
            cache,
            transport,
            stats,
            meta_table: Bytes::from(config.table.clone().into_bytes()),
            meta_family: Bytes::from(config.family.clone().into_bytes()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &RegionCache {
        &self.cache
    }

    /// Find the region containing `key`
    pub async fn resolve(&self, table: &[u8], key: &[u8]) -> Result<RegionLocation, ScanError> {
        let search_key = key_encoding::region_search_key(table, key);
        self.resolve_via_meta(
            table,
            search_key,
            |cache| cache.lookup(table, key),
            |region| {
                if region.contains_key(key) {
                    Ok(())
                } else {
                    Err(inconsistent(format!(
                        "region {} does not contain key {}",
                        region,
                        pretty(key)
                    )))
                }
            },
        )
        .await?
        .ok_or_else(|| ScanError::TableNotFound(pretty(table)))
    }

    /// Find the region holding the keys just below `boundary`
    ///
    /// Used by reverse scans to step from the region starting at `boundary`
    /// to its predecessor. `None` means `boundary` is the start of the table.
    /// After a merge the predecessor may extend past `boundary`; it is accepted
    /// as long as it covers the keys below it. A META row that stops short of
    /// the boundary leaves a hole in the table and is reported as
    /// `MetaUnavailable`.
    pub async fn resolve_before(
        &self,
        table: &[u8],
        boundary: &[u8],
    ) -> Result<Option<RegionLocation>, ScanError> {
        if boundary.is_empty() {
            return Ok(None);
        }
        let search_key = key_encoding::previous_region_search_key(table, boundary);
        self.resolve_via_meta(
            table,
            search_key,
            |cache| cache.lookup_before(table, boundary),
            |region| {
                if region.covers_below(boundary) {
                    Ok(())
                } else {
                    Err(inconsistent(format!(
                        "region {} does not cover keys below {}",
                        region,
                        pretty(boundary)
                    )))
                }
            },
        )
        .await
    }

    /// Find the region holding the keys immediately below `key`
    pub async fn resolve_covering_before(
        &self,
        table: &[u8],
        key: &[u8],
    ) -> Result<RegionLocation, ScanError> {
        if key.is_empty() {
            return self.resolve_last(table).await;
        }
        let search_key = key_encoding::previous_region_search_key(table, key);
        self.resolve_via_meta(
            table,
            search_key,
            |cache| cache.lookup_before(table, key),
            |region| {
                if region.covers_below(key) {
                    Ok(())
                } else {
                    Err(inconsistent(format!(
                        "region {} does not cover keys below {}",
                        region,
                        pretty(key)
                    )))
                }
            },
        )
        .await?
        .ok_or_else(|| ScanError::TableNotFound(pretty(table)))
    }

    /// Find the last region of a table
    pub async fn resolve_last(&self, table: &[u8]) -> Result<RegionLocation, ScanError> {
        let search_key = key_encoding::last_region_search_key(table);
        self.resolve_via_meta(
            table,
            search_key,
            |cache| cache.lookup_last(table),
            |region| {
                if region.is_last() {
                    Ok(())
                } else {
                    Err(inconsistent(format!("region {} is not the last one", region)))
                }
            },
        )
        .await?
        .ok_or_else(|| ScanError::TableNotFound(pretty(table)))
    }

    /// Walk META from the first region of `table` to the last, caching
    /// every online region. Returns the number of regions cached.
    pub async fn prefetch(&self, table: &[u8]) -> Result<usize, ScanError> {
        let mut key = Bytes::new();
        let mut cached = 0;
        loop {
            let search_key = key_encoding::region_search_key(table, &key);
            let entry = self
                .read_meta(table, &search_key)
                .await?
                .ok_or_else(|| ScanError::TableNotFound(pretty(table)))?;
            if !entry.region.contains_key(&key) {
                return Err(inconsistent(format!(
                    "region {} does not contain key {}",
                    entry.region,
                    pretty(&key)
                )));
            }
            let next = (!entry.region.is_last()).then(|| entry.region.stop_key().clone());
            if entry.server.is_some() {
                self.cache_entry(entry)?;
                cached += 1;
            } else {
                debug!(region = %entry.region, "skipping offline region");
            }
            match next {
                Some(stop) => key = stop,
                None => break,
            }
        }
        info!(table = %pretty(table), regions = cached, "prefetched META");
        Ok(cached)
    }

    async fn resolve_via_meta<L, V>(
        &self,
        table: &[u8],
        search_key: Vec<u8>,
        cached: L,
        validate: V,
    ) -> Result<Option<RegionLocation>, ScanError>
    where
        L: Fn(&RegionCache) -> Option<CachedRegion>,
        V: FnOnce(&RegionInfo) -> Result<(), ScanError>,
    {
        if let Some(hit) = cached(&self.cache) {
            return Ok(Some(hit));
        }

        let in_flight = self.enter(search_key);
        let _permit = in_flight.gate.lock().await;
        if let Some(hit) = cached(&self.cache) {
            debug!(region = %hit.region, "resolved by a concurrent lookup");
            return Ok(Some(hit));
        }

        let Some(entry) = self.read_meta(table, &in_flight.key).await? else {
            return Ok(None);
        };
        validate(&entry.region)?;
        self.cache_entry(entry).map(Some)
    }

    fn enter(&self, key: Vec<u8>) -> InFlight<'_> {
        let gate = self.in_flight.lock().entry(key.clone()).or_default().clone();
        InFlight {
            gates: &self.in_flight,
            key,
            gate,
        }
    }

    /// Read the closest META row before `search_key`; `None` if it belongs to
    /// another table or there is none
    async fn read_meta(
        &self,
        table: &[u8],
        search_key: &[u8],
    ) -> Result<Option<MetaEntry>, ScanError> {
        let meta = self.locate_meta(search_key).await?;
        self.stats.record_meta_lookup();
        debug!(
            meta_region = %meta.region,
            server = %meta.server,
            search_key = %pretty(search_key),
            "looking up META"
        );

        let row = match self
            .transport
            .get_closest_row_before(&meta.server, &meta.region, search_key, &self.meta_family)
            .await
        {
            Ok(row) => row,
            Err(RpcError::NotServingRegion(_)) => {
                self.cache.invalidate(&meta.region);
                return Err(ScanError::MetaUnavailable {
                    reason: format!("META region {} is not served by {}", meta.region, meta.server),
                });
            }
            Err(e) => {
                warn!(server = %meta.server, error = %e, "META lookup failed");
                return Err(ScanError::MetaUnavailable {
                    reason: format!("lookup against {} failed: {}", meta.server, e),
                });
            }
        };

        let Some(row) = row else {
            return Ok(None);
        };
        if key_encoding::table_of_row_key(&row.key) != Some(table) {
            return Ok(None);
        }
        MetaEntry::from_row(&row, &self.meta_family)
            .map(Some)
            .map_err(|e| inconsistent(e.to_string()))
    }

    /// Find the META region holding `search_key`, asking the transport for
    /// the root location on a cache miss
    async fn locate_meta(&self, search_key: &[u8]) -> Result<RegionLocation, ScanError> {
        if let Some(hit) = self.cache.lookup(&self.meta_table, search_key) {
            return Ok(hit);
        }
        let (region, server) =
            self.transport
                .locate_meta()
                .await
                .map_err(|e| ScanError::MetaUnavailable {
                    reason: format!("cannot locate META: {}", e),
                })?;
        if region.table() != &self.meta_table || !region.contains_key(search_key) {
            return Err(inconsistent(format!(
                "META location {} does not cover {}",
                region,
                pretty(search_key)
            )));
        }
        let region = Arc::new(region);
        self.cache.insert(region.clone(), server.clone());
        Ok(RegionLocation { region, server })
    }

    fn cache_entry(&self, entry: MetaEntry) -> Result<RegionLocation, ScanError> {
        let Some(server) = entry.server else {
            return Err(ScanError::NotServingRegion {
                region: entry.region.name(),
                server: "<offline>".to_string(),
            });
        };
        let region = Arc::new(entry.region);
        let evicted = self.cache.insert(region.clone(), server.clone());
        if evicted.is_empty() {
            debug!(region = %region, server = %server, "resolved region");
        } else {
            info!(
                region = %region,
                server = %server,
                replaced = evicted.len(),
                "region layout changed since it was cached"
            );
        }
        Ok(RegionLocation { region, server })
    }
}

fn inconsistent(reason: String) -> ScanError {
    ScanError::MetaUnavailable { reason }
}
