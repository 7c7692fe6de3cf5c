// Cache Errors
//
// Every failure the cache can surface. The cache never retries or hides
// these; callers decide whether to skip a file, retry, or abort.

use std::io;
use std::path::PathBuf;

use super::FileId;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Capacity reached and every live handle is pinned
    #[error("handle cache exhausted: all {live} live handles are pinned")]
    Exhausted { live: usize },

    #[error("failed to open {path:?}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reopen succeeded but the saved position could not be restored
    #[error("failed to restore offset {offset} of {path:?} after reopen")]
    SeekFailed {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Offset of an eviction victim could not be read; nothing was evicted
    #[error("failed to read current offset of {path:?} before eviction")]
    TellFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to close {path:?}")]
    CloseFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} handle(s) failed to close during release", .0.len())]
    ReleaseAll(Vec<CacheError>),

    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown or forgotten file id {0:?}")]
    UnknownFile(FileId),

    #[error("handle cache invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl CacheError {
    /// Whether the error must abort the calling operation
    ///
    /// A failed offset restore would hand out a handle positioned at the
    /// wrong byte, and an invariant violation means the bookkeeping itself
    /// is broken. Everything else leaves the cache consistent.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::SeekFailed { .. } | CacheError::InvariantViolation(_)
        )
    }

    /// Whether the error is the capacity condition a caller may retry
    pub fn is_exhausted(&self) -> bool {
        matches!(self, CacheError::Exhausted { .. })
    }
}
