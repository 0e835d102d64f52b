//! Core region metadata
//!
//! Provides the pieces of region resolution that need no I/O:
//! - Region descriptors and server handles
//! - META row-key encoding and the META row codec
//! - The shared, internally synchronized region cache

pub mod cache;
pub mod key_encoding;
pub mod meta;
pub mod region;
pub mod row;

// Re-export commonly used types
pub use cache::{CachedRegion, RegionCache};
pub use meta::MetaEntry;
pub use region::{RegionError, RegionInfo, RegionKey, ServerHandle};
pub use row::{Cell, Row};
