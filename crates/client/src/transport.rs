//! Remote call capabilities consumed by the scan engine
//!
//! Wire encoding, connection pooling and authentication live behind
//! [`RegionTransport`]; this crate never opens sockets itself.

use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use region_core::{RegionInfo, Row, ServerHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RPC failures reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("region not served: {0}")]
    NotServingRegion(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("remote error: {0}")]
    Remote(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Ascending key order
    #[default]
    Forward,
    /// Descending key order
    Reverse,
}

/// One "scan next batch" request against a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub region: Arc<RegionInfo>,
    pub direction: Direction,
    /// Cursor bound the batch starts from: the lower bound when scanning
    /// forward, the upper bound when scanning in reverse
    pub from: Bound<Bytes>,
    /// Scan stop bound: the upper bound forward, the lower bound in reverse
    pub to: Bound<Bytes>,
    /// Maximum rows to return
    pub batch_size: u32,
    /// Restrict cells to one column family
    pub family: Option<Bytes>,
    /// Restrict cells to one qualifier (within `family`)
    pub qualifier: Option<Bytes>,
}

impl ScanRequest {
    /// Check if `key` lies strictly beyond the cursor bound in scan order
    pub fn follows_cursor(&self, key: &[u8]) -> bool {
        match (&self.from, self.direction) {
            (Bound::Unbounded, _) => true,
            (Bound::Included(k), Direction::Forward) => key >= k.as_ref(),
            (Bound::Excluded(k), Direction::Forward) => key > k.as_ref(),
            (Bound::Included(k), Direction::Reverse) => key <= k.as_ref(),
            (Bound::Excluded(k), Direction::Reverse) => key < k.as_ref(),
        }
    }

    /// Check if `key` has not yet reached the stop bound in scan order
    pub fn precedes_stop(&self, key: &[u8]) -> bool {
        match (&self.to, self.direction) {
            (Bound::Unbounded, _) => true,
            (Bound::Included(k), Direction::Forward) => key <= k.as_ref(),
            (Bound::Excluded(k), Direction::Forward) => key < k.as_ref(),
            (Bound::Included(k), Direction::Reverse) => key >= k.as_ref(),
            (Bound::Excluded(k), Direction::Reverse) => key > k.as_ref(),
        }
    }

    /// Check if `key` lies in the region and between both bounds
    pub fn admits(&self, key: &[u8]) -> bool {
        self.region.contains_key(key) && self.follows_cursor(key) && self.precedes_stop(key)
    }
}

/// Rows returned by one scan request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanBatch {
    /// Rows in scan order
    pub rows: Vec<Row>,
    /// The region may hold more rows within the request bounds
    pub more: bool,
}

/// Remote calls the scan engine depends on
#[async_trait]
pub trait RegionTransport: Send + Sync {
    /// Fetch the next batch of rows from a region
    async fn scan(&self, server: &ServerHandle, request: ScanRequest) -> RpcResult<ScanBatch>;

    /// Return the greatest META row whose key is less than or equal to `key`
    async fn get_closest_row_before(
        &self,
        server: &ServerHandle,
        meta_region: &RegionInfo,
        key: &[u8],
        family: &[u8],
    ) -> RpcResult<Option<Row>>;

    /// Locate the META region and its server (root lookup)
    async fn locate_meta(&self) -> RpcResult<(RegionInfo, ServerHandle)>;
}
