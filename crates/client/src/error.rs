//! Scan error taxonomy
//!
//! Every failure a scan can observe is a [`ScanError`]; the retry coordinator
//! only looks at its [`FailureKind`].

use thiserror::Error;

use crate::transport::RpcError;

/// Classification driving the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The contacted server no longer serves the region (moved or split)
    NotServingRegion,
    /// META could not be read consistently
    MetaUnavailable,
    /// Connection-level failure, worth retrying against the same server
    Transient,
    /// Never retried
    Permanent,
}

/// Scan errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("region {region} is not served by {server}")]
    NotServingRegion { region: String, server: String },
    #[error("META unavailable: {reason}")]
    MetaUnavailable { reason: String },
    #[error("META is broken after {attempts} lookups: {cause}")]
    BrokenMeta { attempts: u32, cause: String },
    #[error("transient failure against {server}: {reason}")]
    Transient { server: String, reason: String },
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("too many attempts ({attempts}), last error: {last}")]
    TooManyAttempts { attempts: u32, last: Box<ScanError> },
    #[error("scanner is closed")]
    ScanClosed,
}

impl ScanError {
    /// Classify this error for the retry coordinator
    pub fn kind(&self) -> FailureKind {
        match self {
            ScanError::NotServingRegion { .. } => FailureKind::NotServingRegion,
            ScanError::MetaUnavailable { .. } => FailureKind::MetaUnavailable,
            ScanError::Transient { .. } => FailureKind::Transient,
            ScanError::BrokenMeta { .. }
            | ScanError::TableNotFound(_)
            | ScanError::Permanent(_)
            | ScanError::TooManyAttempts { .. }
            | ScanError::ScanClosed => FailureKind::Permanent,
        }
    }

    /// Translate an RPC failure from a region server
    pub fn from_rpc(err: RpcError, server: &str, region: &str) -> Self {
        match err {
            RpcError::NotServingRegion(_) => ScanError::NotServingRegion {
                region: region.to_string(),
                server: server.to_string(),
            },
            RpcError::Connection(reason) => ScanError::Transient {
                server: server.to_string(),
                reason,
            },
            RpcError::Timeout => ScanError::Transient {
                server: server.to_string(),
                reason: "request timed out".to_string(),
            },
            RpcError::TableNotFound(table) => ScanError::TableNotFound(table),
            RpcError::Remote(reason) => ScanError::Permanent(format!("{}: {}", server, reason)),
        }
    }
}
