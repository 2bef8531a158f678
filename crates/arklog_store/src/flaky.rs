//! Fault-injecting object store wrapper for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::{ObjectMeta, ObjectStore};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};

/// An object store wrapper that injects transient failures.
///
/// Each operation family (put, get, delete) has an armed failure counter;
/// while a counter is nonzero the next call of that kind consumes one count
/// and fails with [`StoreError::Transient`]. Counters can be re-armed at any
/// time, so tests can interleave failures with normal operation to exercise
/// retry, backoff, and idempotency paths.
///
/// The wrapped store is only touched by calls that do not fail, so a failed
/// `put` leaves no partial object behind.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    put_failures: AtomicU64,
    get_failures: AtomicU64,
    delete_failures: AtomicU64,
}

impl<S: ObjectStore> FlakyStore<S> {
    /// Wraps `inner` with no failures armed.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            put_failures: AtomicU64::new(0),
            get_failures: AtomicU64::new(0),
            delete_failures: AtomicU64::new(0),
        }
    }

    /// Arms the next `n` puts to fail.
    pub fn fail_puts(&self, n: u64) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    /// Arms the next `n` gets to fail.
    pub fn fail_gets(&self, n: u64) {
        self.get_failures.store(n, Ordering::SeqCst);
    }

    /// Arms the next `n` deletes to fail.
    pub fn fail_deletes(&self, n: u64) {
        self.delete_failures.store(n, Ordering::SeqCst);
    }

    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn take_failure(counter: &AtomicU64, op: &str) -> StoreResult<()> {
        let mut current = counter.load(Ordering::SeqCst);
        while current > 0 {
            match counter.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(StoreError::transient(format!("injected {op} failure"))),
                Err(observed) => current = observed,
            }
        }
        Ok(())
    }
}

impl<S: ObjectStore> ObjectStore for FlakyStore<S> {
    fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        Self::take_failure(&self.put_failures, "put")?;
        self.inner.put(key, data)
    }

    fn get(&self, key: &str) -> StoreResult<Bytes> {
        Self::take_failure(&self.get_failures, "get")?;
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Self::take_failure(&self.delete_failures, "delete")?;
        self.inner.delete(key)
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        self.inner.list(prefix)
    }

    fn head(&self, key: &str) -> StoreResult<Option<u64>> {
        self.inner.head(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[test]
    fn flaky_passthrough_by_default() {
        let store = FlakyStore::new(InMemoryStore::new());
        store.put("k", Bytes::from_static(b"v")).unwrap();
        assert_eq!(&store.get("k").unwrap()[..], b"v");
        assert!(store.delete("k").unwrap());
    }

    #[test]
    fn flaky_put_fails_then_recovers() {
        let store = FlakyStore::new(InMemoryStore::new());
        store.fail_puts(2);

        assert!(store.put("k", Bytes::from_static(b"v")).is_err());
        assert!(store.put("k", Bytes::from_static(b"v")).is_err());
        store.put("k", Bytes::from_static(b"v")).unwrap();

        assert_eq!(&store.get("k").unwrap()[..], b"v");
    }

    #[test]
    fn flaky_failed_put_leaves_no_object() {
        let store = FlakyStore::new(InMemoryStore::new());
        store.fail_puts(1);

        assert!(store.put("k", Bytes::from_static(b"v")).is_err());
        assert_eq!(store.inner().object_count(), 0);
    }

    #[test]
    fn flaky_delete_failure_is_transient() {
        let store = FlakyStore::new(InMemoryStore::new());
        store.put("k", Bytes::from_static(b"v")).unwrap();
        store.fail_deletes(1);

        let err = store.delete("k").unwrap_err();
        assert!(err.is_transient());

        // The object survives the failed delete.
        assert_eq!(store.head("k").unwrap(), Some(1));
        assert!(store.delete("k").unwrap());
    }

    #[test]
    fn flaky_list_never_fails() {
        let store = FlakyStore::new(InMemoryStore::new());
        store.put("p/a", Bytes::from_static(b"1")).unwrap();
        store.fail_gets(5);
        assert_eq!(store.list("p/").unwrap().len(), 1);
    }
}
