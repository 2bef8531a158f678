//! # Arklog Engine
//!
//! Upload pipeline and retention housekeeping for arklog.
//!
//! This crate provides:
//! - Versioned manifest persistence with fenced compare-and-commit
//! - The upload pipeline (sealed segments to the archive, in order)
//! - The housekeeping loop (idle - evaluate - delete - commit)
//! - The partition archiver tying both to one leadership token
//! - Retry with exponential backoff
//!
//! ## Architecture
//!
//! Both periodic tasks run on the partition leader and share one manifest
//! commit primitive:
//! 1. The upload pipeline moves sealed local segments into the object
//!    store and registers them in the manifest
//! 2. The housekeeping loop applies the retention evaluator's decision,
//!    deletes released objects, and commits the truncated manifest
//!
//! ## Key Invariants
//!
//! - Exactly one active mutator per partition manifest, enforced by the
//!   fencing token on every commit
//! - A segment is deleted from the manifest only after its object is
//!   confirmed gone (or confirmed already absent)
//! - Version conflicts between the two tasks are resolved by re-reading
//!   and recomputing, never by blocking
//! - A deposed leader's first stale commit demotes it silently

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod archiver;
mod config;
mod error;
mod housekeeping;
mod manifest_store;
mod upload;

pub use archiver::PartitionArchiver;
pub use config::{ArchiverConfig, RetryConfig};
pub use error::{EngineError, EngineResult};
pub use housekeeping::{Housekeeping, HousekeepingOutcome, HousekeepingState, HousekeepingStats};
pub use manifest_store::{manifest_key, ManifestStore};
pub use upload::{object_key, UploadOutcome, UploadPipeline, UploadStats};
