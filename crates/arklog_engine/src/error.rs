//! Error types for the arklog engine.

use arklog_core::{CoreError, FencingToken, Offset};
use arklog_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the upload pipeline and housekeeping loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Core state machine error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Object store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A manifest commit raced another writer; resolved by re-reading and
    /// recomputing, never surfaced to callers of a tick.
    #[error("manifest version conflict: committed against {expected}, found {actual}")]
    VersionConflict {
        /// The version the commit was computed against.
        expected: u64,
        /// The version found in the store.
        actual: u64,
    },

    /// A commit carried a fencing token below the one already recorded:
    /// this node was deposed. Never retried; the archiver steps down.
    #[error("stale leader: commit with {token}, manifest holds {current}")]
    StaleLeader {
        /// The token the commit carried.
        token: FencingToken,
        /// The token recorded in the manifest.
        current: FencingToken,
    },

    /// The local log is missing the segment the manifest expects next.
    #[error("upload gap: manifest expects {expected}, local log resumes at {found}")]
    UploadGap {
        /// The base offset the manifest would accept.
        expected: Offset,
        /// The lowest sealed base offset still available locally.
        found: Offset,
    },

    /// A transient operation kept failing past the retry budget. The tick
    /// aborts and the next interval retries from a fresh snapshot.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last failure.
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_transient(),
            EngineError::VersionConflict { .. } => true,
            _ => false,
        }
    }
}
