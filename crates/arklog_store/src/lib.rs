//! # Arklog Store
//!
//! Object store trait and implementations for arklog.
//!
//! This crate provides the lowest-level cloud-storage abstraction for
//! arklog. Object stores are **opaque key/value blob stores** - they do
//! not interpret the data they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple named-blob stores (put, get, delete, list)
//! - No knowledge of arklog segments, manifests, or offsets
//! - Must be `Send + Sync` for concurrent access from the upload and
//!   housekeeping tasks
//! - Deletion reports whether the object existed, so callers can treat
//!   re-deletion as the no-op it is
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral deployments
//! - [`FlakyStore`] - Wrapper that injects transient faults, for testing
//!   retry and recovery paths
//!
//! ## Example
//!
//! ```rust
//! use arklog_store::{InMemoryStore, ObjectStore};
//! use bytes::Bytes;
//!
//! let store = InMemoryStore::new();
//! store.put("0/manifest.json", Bytes::from_static(b"{}")).unwrap();
//! let data = store.get("0/manifest.json").unwrap();
//! assert_eq!(&data[..], b"{}");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod flaky;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use flaky::FlakyStore;
pub use memory::InMemoryStore;
pub use store::{ObjectMeta, ObjectStore};
