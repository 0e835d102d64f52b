//! Region cache
//!
//! Process-wide mapping from table + row key to the region that owns it and
//! the server believed to serve it. Entries are sorted by [`RegionKey`] so the
//! owner of a key is found by a predecessor search. Inserting a region evicts
//! every cached region it overlaps, which keeps cached ranges pairwise disjoint
//! across splits and merges observed in META.
//!
//! Entries are never refreshed speculatively; they are dropped only when a
//! request against the cached server fails (see `invalidate`).

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::region::{RegionInfo, RegionKey, ServerHandle};

/// A cached region and its last known server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRegion {
    pub region: Arc<RegionInfo>,
    pub server: ServerHandle,
}

/// Region cache shared by every scanner of a client
///
/// Internally synchronized; cloning shares the same map.
#[derive(Clone, Default)]
pub struct RegionCache {
    regions: Arc<RwLock<BTreeMap<RegionKey, CachedRegion>>>,
}

impl RegionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the cached region whose range contains `key`
    ///
    /// `None` only means nothing is cached for the key, not that no region
    /// owns it.
    pub fn lookup(&self, table: &[u8], key: &[u8]) -> Option<CachedRegion> {
        let probe = RegionKey::new(
            Bytes::copy_from_slice(table),
            Bytes::copy_from_slice(key),
            u64::MAX,
        );
        let regions = self.regions.read();
        let (_, candidate) = regions.range(..=probe).next_back()?;
        if candidate.region.table().as_ref() == table && candidate.region.contains_key(key) {
            return Some(candidate.clone());
        }
        None
    }

    /// Find the cached region holding the keys immediately below `boundary`
    ///
    /// This is the region a reverse scan reads after finishing the region
    /// that starts at `boundary`.
    pub fn lookup_before(&self, table: &[u8], boundary: &[u8]) -> Option<CachedRegion> {
        let probe = RegionKey::new(
            Bytes::copy_from_slice(table),
            Bytes::copy_from_slice(boundary),
            0,
        );
        let regions = self.regions.read();
        let (_, candidate) = regions.range(..probe).next_back()?;
        if candidate.region.table().as_ref() == table && candidate.region.covers_below(boundary)
        {
            return Some(candidate.clone());
        }
        None
    }

    /// Find the cached last region (empty stop key) of a table
    pub fn lookup_last(&self, table: &[u8]) -> Option<CachedRegion> {
        // Smallest table name sorting after `table`
        let mut next_table = Vec::with_capacity(table.len() + 1);
        next_table.extend_from_slice(table);
        next_table.push(0);
        let probe = RegionKey::new(Bytes::from(next_table), Bytes::new(), 0);
        let regions = self.regions.read();
        let (_, candidate) = regions.range(..probe).next_back()?;
        if candidate.region.table().as_ref() == table && candidate.region.is_last() {
            return Some(candidate.clone());
        }
        None
    }

    /// Server currently believed to serve `region`
    pub fn lookup_server(&self, region: &RegionInfo) -> Option<ServerHandle> {
        self.regions
            .read()
            .get(&region.key())
            .filter(|cached| cached.region.as_ref() == region)
            .map(|cached| cached.server.clone())
    }

    /// Insert or replace a region
    ///
    /// Every cached region of the same table overlapping the new one is
    /// evicted and returned. Re-inserting an identical region only updates
    /// its server.
    pub fn insert(&self, region: Arc<RegionInfo>, server: ServerHandle) -> Vec<Arc<RegionInfo>> {
        let table = region.table().clone();
        let mut regions = self.regions.write();

        // The predecessor of the new start key may reach into the new range;
        // everything after it that starts before the new stop key may too.
        let probe = RegionKey::new(table.clone(), region.start_key().clone(), u64::MAX);
        let begin = regions
            .range(..=probe)
            .next_back()
            .filter(|(key, _)| *key.table() == table)
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| RegionKey::new(table.clone(), Bytes::new(), 0));

        let overlapping: Vec<RegionKey> = regions
            .range(begin..)
            .take_while(|(key, _)| {
                *key.table() == table
                    && (region.is_last() || key.start_key() < region.stop_key())
            })
            .filter(|(_, cached)| cached.region.overlaps(&region))
            .map(|(key, _)| key.clone())
            .collect();

        let mut evicted = Vec::with_capacity(overlapping.len());
        for key in overlapping {
            if let Some(old) = regions.remove(&key) {
                if old.region != region {
                    debug!(evicted = %old.region, by = %region, "evicting overlapping region");
                    evicted.push(old.region);
                }
            }
        }

        debug!(region = %region, server = %server, "caching region");
        regions.insert(region.key(), CachedRegion { region, server });
        evicted
    }

    /// Remove a region so the next lookup for its keys misses
    ///
    /// Returns false if the region was not cached, e.g. because a newer
    /// descriptor already replaced it.
    pub fn invalidate(&self, region: &RegionInfo) -> bool {
        let mut regions = self.regions.write();
        let matches = regions
            .get(&region.key())
            .is_some_and(|cached| cached.region.as_ref() == region);
        if matches {
            regions.remove(&region.key());
            debug!(region = %region, "invalidated cached region");
        }
        matches
    }

    /// All cached regions of a table in key order
    pub fn regions_of(&self, table: &[u8]) -> Vec<CachedRegion> {
        let begin = RegionKey::new(Bytes::copy_from_slice(table), Bytes::new(), 0);
        self.regions
            .read()
            .range(begin..)
            .take_while(|(key, _)| key.table().as_ref() == table)
            .map(|(_, cached)| cached.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }
}
