//! # Arklog Core
//!
//! Core state machines and policy logic for arklog's tiered storage.
//!
//! This crate provides:
//! - Local segment store (append-only, seal-on-size, upload watermark)
//! - Partition manifest: the authoritative record of archived segments
//! - Retention policy and the pure eviction evaluators
//! - Offset/term/token newtypes shared across the workspace
//!
//! ## Key Invariants
//!
//! - `archive_start_offset <= start_offset <= last_offset + 1`
//! - `last_offset` and `start_offset` never decrease
//! - An empty segment list with a preserved `last_offset` is a valid,
//!   fully-truncated manifest - not an uninitialized one
//! - Local segments are never evicted above the uploaded watermark

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod manifest;
pub mod retention;
pub mod segment;
mod types;

pub use error::{CoreError, CoreResult};
pub use manifest::{PartitionManifest, SegmentMeta};
pub use retention::{
    evaluate_cloud, evaluate_local, jittered_target, EvictionDecision, LocalEviction,
    RetentionPolicy,
};
pub use segment::{EvictOutcome, SealedSegment, Segment, SegmentInfo, SegmentStore};
pub use types::{FencingToken, Offset, PartitionId, Term};
