//! In-memory object store for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::{ObjectMeta, ObjectStore};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory object store.
///
/// This store keeps all objects in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral deployments that don't need durability
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use arklog_store::{InMemoryStore, ObjectStore};
/// use bytes::Bytes;
///
/// let store = InMemoryStore::new();
/// store.put("a", Bytes::from_static(b"one")).unwrap();
/// assert_eq!(store.head("a").unwrap(), Some(3));
/// assert!(store.delete("a").unwrap());
/// assert!(!store.delete("a").unwrap());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns the total size of all stored objects in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.objects.read().values().map(|v| v.len() as u64).sum()
    }

    /// Removes all objects from the store.
    pub fn clear(&self) {
        self.objects.write().clear();
    }
}

impl ObjectStore for InMemoryStore {
    fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        self.objects.write().insert(key.to_string(), data);
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.objects.write().remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectMeta {
                key: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }

    fn head(&self, key: &str) -> StoreResult<Option<u64>> {
        Ok(self.objects.read().get(key).map(|v| v.len() as u64))
    }
}
