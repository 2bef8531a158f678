//! Error types for arklog core.

use crate::types::Offset;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in arklog core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A segment add does not continue from the manifest's last offset.
    ///
    /// A single occurrence from a deposed leader is expected and handled
    /// by stepping down; a persistent occurrence on the active leader
    /// indicates a gap in the upload pipeline.
    #[error("out of order insert: expected base {expected}, got {actual}")]
    OutOfOrderInsert {
        /// The base offset the manifest would accept next.
        expected: Offset,
        /// The base offset that was offered.
        actual: Offset,
    },

    /// A segment's offset range is malformed.
    #[error("invalid segment range: base {base} past last {last}")]
    InvalidSegment {
        /// The segment's base offset.
        base: Offset,
        /// The segment's last offset.
        last: Offset,
    },

    /// An append was attempted on a sealed segment.
    #[error("segment sealed: base {base}")]
    SegmentSealed {
        /// Base offset of the sealed segment.
        base: Offset,
    },

    /// A persisted manifest document could not be decoded.
    #[error("invalid manifest format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}
