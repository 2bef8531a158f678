//! Object store trait definition.

use crate::error::StoreResult;
use bytes::Bytes;

/// Metadata for one stored object, as returned by [`ObjectStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

/// A named-blob object store for arklog.
///
/// Object stores are **opaque blob stores** keyed by string. They provide
/// simple operations for writing, reading, deleting, and listing objects.
/// Arklog owns all content interpretation - stores do not understand
/// segments or manifests.
///
/// # Invariants
///
/// - `put` replaces any existing object under the same key
/// - `get` returns exactly the bytes previously put under that key
/// - `delete` of an absent key succeeds and reports `false`
/// - Objects are visible to `get`/`list` once `put` returns
/// - Stores must be `Send + Sync`: the upload pipeline and the housekeeping
///   task operate on the same store concurrently
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FlakyStore`] - Fault-injecting wrapper for testing
pub trait ObjectStore: Send + Sync {
    /// Writes `data` under `key`, replacing any previous object.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; [`crate::StoreError::is_transient`]
    /// distinguishes retryable failures.
    fn put(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Reads the object stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] if no object exists under
    /// `key`, or another error if the read fails.
    fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Deletes the object under `key`.
    ///
    /// Returns `true` if an object existed and was removed, `false` if the
    /// key was already absent. Absence is not an error: a deletion may be
    /// repeated after an interrupted batch.
    ///
    /// # Errors
    ///
    /// Returns an error only if the delete operation itself fails.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Lists objects whose keys start with `prefix`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>>;

    /// Returns the size of the object under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn head(&self, key: &str) -> StoreResult<Option<u64>>;
}
