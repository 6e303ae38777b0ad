//! Workspace error taxonomy.
//!
//! Each layer defines its own `thiserror` enum and everything converts into
//! the top-level [`OspreyError`] at the request boundary. Point reads that
//! find nothing return `Ok(None)` rather than an error. The only error
//! handled locally is [`StorageError::ScanAborted`], the sentinel that a
//! range visitor returns to stop iteration early; it never reaches a caller
//! outside the scan driver.

use thiserror::Error;

/// Convenience alias for `Result<T, OspreyError>`.
pub type OspreyResult<T> = Result<T, OspreyError>;

/// Top-level error type that all layer-specific errors convert into.
#[derive(Error, Debug)]
pub enum OspreyError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    /// Malformed request input; maps to an HTTP 400-class response at the
    /// service boundary.
    #[error("bad request: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage layer errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Invalid or unresolvable configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A store was used where a stronger capability is required.
    #[error("store {store} does not support {capability}")]
    CapabilityMismatch {
        store: String,
        capability: &'static str,
    },

    /// The storage manager was used before `initialize` or after `close`.
    #[error("storage manager not initialized")]
    NotInitialized,

    /// Backend I/O failure, surfaced to the caller verbatim. Never retried
    /// inside the core.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// State corruption: malformed stored value, bad key framing, a count
    /// decremented below zero. Surfaced, never swallowed.
    #[error("internal consistency error: {0}")]
    Corruption(String),

    /// Sentinel returned by a range visitor to stop iteration early.
    /// Handled by the scan driver's caller; never user-visible.
    #[error("scan aborted")]
    ScanAborted,
}

impl StorageError {
    /// True for the short-circuit sentinel, which callers of `process_range`
    /// treat as a clean stop rather than a failure.
    pub fn is_scan_abort(&self) -> bool {
        matches!(self, StorageError::ScanAborted)
    }
}

/// Version DAG and repo metadata errors.
#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("unknown version {0}")]
    UnknownVersion(String),

    #[error("version {0} is not locked; children may only branch from locked nodes")]
    ParentUnlocked(String),

    #[error("version {0} is locked against mutation")]
    VersionLocked(String),

    #[error("version {0} already exists")]
    DuplicateVersion(String),

    #[error("unknown data instance {0}")]
    UnknownInstance(String),

    #[error("data instance {0} already exists")]
    DuplicateInstance(String),

    #[error("bad ROI specification {0:?}, expected \"<roiname>,<uuid>\"")]
    BadRoiSpec(String),

    #[error("sync sources are fixed once set and cannot be changed")]
    SyncAlreadySet,
}
