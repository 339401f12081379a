//! Error types returned by every component of the ferry pipeline.
//!
//! Each variant corresponds to one of the error kinds enumerated in the
//! design: [`FerryError::Config`] is fatal at `Ferry::initialize`, the
//! others are reported to the `ErrorHandler` (except [`FerryError::Cancelled`],
//! which is not a fatal condition and must be distinguishable from one).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The single error type threaded through the ferry pipeline.
///
/// Every variant carries only owned, `Clone`-able data (a `String` or a
/// `Duration`) rather than a driver error directly, so the same error can
/// be reported to the `ErrorHandler` and also returned from the producer
/// that raised it without either side fighting over ownership.
#[derive(Debug, Clone, Error)]
pub enum FerryError {
    /// Connectivity, TLS, or configuration validation failed during
    /// `Ferry::initialize`.
    #[error("configuration error: {0}")]
    Config(String),

    /// A read against the source database (schema discovery or a
    /// `DataIterator` range scan) failed.
    #[error("source read error: {0}")]
    SourceRead(String),

    /// The binlog connection dropped, or decoding the change stream failed
    /// after retries were exhausted.
    #[error("binlog error: {0}")]
    Binlog(String),

    /// Applying a batch to the target database failed after
    /// `MaxWriteRetriesOnTargetDBError` attempts.
    #[error("target write error: {0}")]
    TargetWrite(String),

    /// A row's shape didn't match the cached schema, or a table had no
    /// primary key at schema-load time. Always fatal, never retried.
    #[error("schema error: {0}")]
    Schema(String),

    /// A database operation exceeded its configured deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The pipeline was cancelled (by the `ErrorHandler` or an operator
    /// shutdown request). Not a failure in its own right.
    #[error("cancelled")]
    Cancelled,
}

impl FerryError {
    /// True for [`FerryError::Cancelled`]: callers use this to avoid
    /// reporting a clean shutdown to the `ErrorHandler` as a fatal error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FerryError::Cancelled)
    }

    /// The component-facing error kind, used as a dump/report tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FerryError::Config(_) => "config",
            FerryError::SourceRead(_) => "source_read",
            FerryError::Binlog(_) => "binlog",
            FerryError::TargetWrite(_) => "target_write",
            FerryError::Schema(_) => "schema",
            FerryError::Timeout(_) => "timeout",
            FerryError::Cancelled => "cancelled",
        }
    }
}

impl From<mysql_async::Error> for FerryError {
    fn from(e: mysql_async::Error) -> Self {
        FerryError::SourceRead(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for FerryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        FerryError::Timeout(Duration::default())
    }
}

/// Helper for components that want to name the offending source error
/// without losing its [`fmt::Display`] text.
pub fn config_err(context: impl fmt::Display, source: impl fmt::Display) -> FerryError {
    FerryError::Config(format!("{context}: {source}"))
}

/// A `Result` alias for fallible ferry operations.
pub type FerryResult<T> = std::result::Result<T, FerryError>;
