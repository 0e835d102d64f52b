//! Region descriptors
//!
//! A region is a contiguous `[start, stop)` slice of a table's key space,
//! served by exactly one server at a time. Regions are immutable: a split or
//! move produces new descriptors with a higher epoch.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key_encoding::{self, pretty};

/// Region descriptor errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    #[error("invalid table name: {0}")]
    InvalidTable(String),
    #[error("invalid key range: start={start} is not below stop={stop}")]
    InvalidRange { start: String, stop: String },
    #[error("invalid server address: {0}")]
    InvalidServer(String),
    #[error("META row {row} is missing column {column}")]
    MissingColumn { row: String, column: &'static str },
    #[error("META row {row} does not describe region {region}")]
    RowKeyMismatch { row: String, region: String },
    #[error("failed to encode region info: {0}")]
    Encode(String),
    #[error("failed to decode region info: {0}")]
    Decode(String),
}

/// Check that a table name can be embedded in a META row key
pub fn validate_table(table: &[u8]) -> Result<(), RegionError> {
    if table.is_empty() || table.contains(&key_encoding::separator::TERMINATOR) {
        return Err(RegionError::InvalidTable(pretty(table)));
    }
    Ok(())
}

/// Opaque handle of the server currently serving a region
///
/// Connections are owned by the transport; the handle is only an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerHandle(String);

impl ServerHandle {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Parse the `server` cell of a META row
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RegionError> {
        match std::str::from_utf8(bytes) {
            Ok(addr) if !addr.is_empty() => Ok(Self(addr.to_string())),
            _ => Err(RegionError::InvalidServer(pretty(bytes))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite sort key of a region: (table, start key, epoch)
///
/// Orders like the region's META row, so a predecessor search over a map keyed
/// by `RegionKey` finds the region that may contain a given row key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    table: Bytes,
    start_key: Bytes,
    epoch: u64,
}

impl RegionKey {
    pub fn new(table: Bytes, start_key: Bytes, epoch: u64) -> Self {
        Self {
            table,
            start_key,
            epoch,
        }
    }

    pub fn table(&self) -> &Bytes {
        &self.table
    }

    pub fn start_key(&self) -> &Bytes {
        &self.start_key
    }
}

/// Region identity and key range
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionInfo {
    table: Bytes,
    start_key: Bytes,
    /// Exclusive; empty means unbounded
    stop_key: Bytes,
    epoch: u64,
}

impl RegionInfo {
    /// Create a region descriptor, rejecting empty ranges and bad table names
    pub fn new(
        table: impl Into<Bytes>,
        start_key: impl Into<Bytes>,
        stop_key: impl Into<Bytes>,
        epoch: u64,
    ) -> Result<Self, RegionError> {
        let region = Self {
            table: table.into(),
            start_key: start_key.into(),
            stop_key: stop_key.into(),
            epoch,
        };
        region.validate()?;
        Ok(region)
    }

    /// Re-check invariants, used after decoding a descriptor read from META
    pub fn validate(&self) -> Result<(), RegionError> {
        validate_table(&self.table)?;
        if !self.stop_key.is_empty() && self.start_key >= self.stop_key {
            return Err(RegionError::InvalidRange {
                start: pretty(&self.start_key),
                stop: pretty(&self.stop_key),
            });
        }
        Ok(())
    }

    pub fn table(&self) -> &Bytes {
        &self.table
    }

    pub fn start_key(&self) -> &Bytes {
        &self.start_key
    }

    pub fn stop_key(&self) -> &Bytes {
        &self.stop_key
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn key(&self) -> RegionKey {
        RegionKey::new(self.table.clone(), self.start_key.clone(), self.epoch)
    }

    /// Human readable name: `table,start,epoch`
    pub fn name(&self) -> String {
        format!(
            "{},{},{}",
            pretty(&self.table),
            pretty(&self.start_key),
            self.epoch
        )
    }

    /// Row key of this region in META
    pub fn meta_row_key(&self) -> Vec<u8> {
        key_encoding::region_row_key(&self.table, &self.start_key, self.epoch)
    }

    /// First region of its table
    pub fn is_first(&self) -> bool {
        self.start_key.is_empty()
    }

    /// Last region of its table
    pub fn is_last(&self) -> bool {
        self.stop_key.is_empty()
    }

    /// Check if a row key belongs to this region
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_ref() && (self.is_last() || key < self.stop_key.as_ref())
    }

    /// Check if this region holds the keys immediately below `boundary`,
    /// i.e. `start < boundary <= stop`
    pub fn covers_below(&self, boundary: &[u8]) -> bool {
        self.start_key.as_ref() < boundary
            && (self.is_last() || boundary <= self.stop_key.as_ref())
    }

    /// Check if two regions of the same table share any key
    pub fn overlaps(&self, other: &RegionInfo) -> bool {
        if self.table != other.table {
            return false;
        }
        let self_ends_before = !self.is_last() && self.stop_key <= other.start_key;
        let other_ends_before = !other.is_last() && other.stop_key <= self.start_key;
        !self_ends_before && !other_ends_before
    }
}

impl fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {})",
            self.name(),
            pretty(&self.start_key),
            pretty(&self.stop_key)
        )
    }
}
