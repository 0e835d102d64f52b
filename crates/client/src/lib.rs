//! Region resolution and scan continuation for range-partitioned tables
//!
//! A [`Client`] locates the region owning a row key through the META table,
//! caches what it learns in a shared [`RegionCache`], and streams rows through
//! [`ScannerHandle`]s that transparently follow splits, moves and stale
//! metadata.
//!
//! Remote calls and timers are injected through [`RegionTransport`] and
//! [`Scheduler`].

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod meta_resolver;
pub mod pending_retries;
pub mod retry;
pub mod scanner;
pub mod scheduler;
pub mod stats;
pub mod transport;

pub use client::{Client, ScannerBuilder};
pub use config::{Config, ConfigError};
pub use error::{FailureKind, ScanError};
pub use meta_resolver::{MetaResolver, RegionLocation};
pub use region_core::{RegionCache, RegionInfo, Row, ServerHandle};
pub use retry::{RetryAction, RetryCoordinator, RetryPlan};
pub use scanner::{ScanCursor, ScanOptions, ScanState, ScannerHandle, ScannerSession};
pub use scheduler::{ScheduledTask, Scheduler, TokioScheduler};
pub use stats::{ClientStats, StatsSnapshot};
pub use transport::{Direction, RegionTransport, RpcError, RpcResult, ScanBatch, ScanRequest};
