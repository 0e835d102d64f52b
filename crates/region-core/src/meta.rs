//! META table schema
//!
//! Each META row describes one region: the `regioninfo` cell holds the
//! bincode-encoded [`RegionInfo`], the `server` cell the `host:port` of the
//! server currently serving it. A row without a `server` cell describes a
//! region that is offline (being moved or split).

use bytes::Bytes;

use crate::key_encoding::pretty;
use crate::region::{RegionError, RegionInfo, ServerHandle};
use crate::row::Row;

/// Default name of the META table
pub const META_TABLE: &[u8] = b".META.";
/// Default column family holding region metadata
pub const INFO_FAMILY: &[u8] = b"info";
/// Qualifier of the encoded region descriptor
pub const REGIONINFO_QUALIFIER: &[u8] = b"regioninfo";
/// Qualifier of the serving server address
pub const SERVER_QUALIFIER: &[u8] = b"server";

/// Encode a region descriptor for the `regioninfo` cell
pub fn encode_region_info(region: &RegionInfo) -> Result<Bytes, RegionError> {
    bincode::serde::encode_to_vec(region, bincode::config::standard())
        .map(Bytes::from)
        .map_err(|e| RegionError::Encode(e.to_string()))
}

/// Decode and validate the `regioninfo` cell
pub fn decode_region_info(bytes: &[u8]) -> Result<RegionInfo, RegionError> {
    let (region, _): (RegionInfo, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| RegionError::Decode(e.to_string()))?;
    region.validate()?;
    Ok(region)
}

/// Decoded META row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    pub region: RegionInfo,
    /// None while the region is offline
    pub server: Option<ServerHandle>,
}

impl MetaEntry {
    pub fn new(region: RegionInfo, server: Option<ServerHandle>) -> Self {
        Self { region, server }
    }

    /// Decode a META row read from `family`
    pub fn from_row(row: &Row, family: &[u8]) -> Result<Self, RegionError> {
        let info = row
            .value(family, REGIONINFO_QUALIFIER)
            .ok_or_else(|| RegionError::MissingColumn {
                row: pretty(&row.key),
                column: "regioninfo",
            })?;
        let region = decode_region_info(info)?;
        if region.meta_row_key() != row.key.as_ref() {
            return Err(RegionError::RowKeyMismatch {
                row: pretty(&row.key),
                region: region.name(),
            });
        }
        let server = row
            .value(family, SERVER_QUALIFIER)
            .map(|addr| ServerHandle::from_bytes(addr))
            .transpose()?;
        Ok(Self { region, server })
    }

    /// Build the META row for this entry under `family`
    pub fn to_row(&self, family: &[u8]) -> Result<Row, RegionError> {
        let family = Bytes::copy_from_slice(family);
        let mut row = Row::new(self.region.meta_row_key()).with_cell(
            family.clone(),
            REGIONINFO_QUALIFIER,
            encode_region_info(&self.region)?,
        );
        if let Some(server) = &self.server {
            row = row.with_cell(
                family,
                SERVER_QUALIFIER,
                Bytes::copy_from_slice(server.as_str().as_bytes()),
            );
        }
        Ok(row)
    }
}
