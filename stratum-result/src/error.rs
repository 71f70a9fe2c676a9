use std::io;

use thiserror::Error;

/// Unified error type for all stratum operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request from the caller (bad plan, negative timeout, ...).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Stored bytes disagree with their recorded checksum. The read fails and
    /// must not be retried against the same file.
    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// I/O error during file or disk operations. Retried a bounded number of
    /// times at the file layer before surfacing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invariant violation. These represent bugs, not data issues; the node
    /// is expected to abort rather than continue on them.
    #[error("logical error: {0}")]
    LogicalError(String),

    /// A pack file's checksum header disagrees with the algorithm the caller
    /// asked for. The file is refused, not reinterpreted.
    #[error("checksum config mismatch: {0}")]
    ChecksumConfigMismatch(String),

    /// Region routing failure carrying retry metadata for the client.
    #[error("region {region_id} epoch not match")]
    RegionEpochNotMatch { region_id: u64 },

    /// Region routing failure carrying retry metadata for the client.
    #[error("region {region_id} not found")]
    RegionNotFound { region_id: u64 },

    /// A query/user/process memory cap was exceeded. The query fails and its
    /// resources are released.
    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// A per-request deadline elapsed while waiting or doing I/O.
    #[error("timeout: {0}")]
    Timeout(String),

    /// External cancellation observed; the query fails silently.
    #[error("cancelled")]
    Cancelled,

    /// Arrow error during columnar data operations.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A page, column, or file that should exist does not.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Wrap this error with additional context, preserving its kind.
    ///
    /// Message-carrying variants get the context appended; variants with
    /// structured payloads (io, arrow, region metadata) are left as-is since
    /// rewriting them would lose the payload.
    pub fn context(self, msg: impl std::fmt::Display) -> Self {
        match self {
            Error::BadRequest(m) => Error::BadRequest(format!("{m} ({msg})")),
            Error::ChecksumMismatch(m) => Error::ChecksumMismatch(format!("{m} ({msg})")),
            Error::LogicalError(m) => Error::LogicalError(format!("{m} ({msg})")),
            Error::ChecksumConfigMismatch(m) => {
                Error::ChecksumConfigMismatch(format!("{m} ({msg})"))
            }
            Error::MemoryLimitExceeded(m) => Error::MemoryLimitExceeded(format!("{m} ({msg})")),
            Error::Timeout(m) => Error::Timeout(format!("{m} ({msg})")),
            Error::NotFound(m) => Error::NotFound(format!("{m} ({msg})")),
            other => other,
        }
    }

    /// Whether the client may retry after refreshing region metadata.
    pub fn is_region_retryable(&self) -> bool {
        matches!(
            self,
            Error::RegionEpochNotMatch { .. } | Error::RegionNotFound { .. }
        )
    }
}
