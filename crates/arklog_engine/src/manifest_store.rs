//! Versioned manifest persistence with fenced compare-and-commit.

use crate::error::{EngineError, EngineResult};
use arklog_core::{FencingToken, PartitionId, PartitionManifest};
use arklog_store::{ObjectStore, StoreError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Returns the object key of a partition's manifest document.
#[must_use]
pub fn manifest_key(partition: PartitionId) -> String {
    format!("{}/manifest.json", partition.as_u32())
}

/// Persists partition manifests with optimistic, fenced commits.
///
/// A commit is a tagged compare-and-swap: it succeeds only if the stored
/// document still carries the version the caller's snapshot was read at,
/// and only if the caller's fencing token is at least the one recorded by
/// the last committer. On [`EngineError::VersionConflict`] the caller
/// re-reads and recomputes; on [`EngineError::StaleLeader`] it steps down.
///
/// The internal mutex serializes only the read-check-write of the manifest
/// document between the leader's own upload and housekeeping tasks.
/// Segment data transfers never run under it; cross-node exclusion is the
/// leadership layer's job, with the fencing token as the backstop.
pub struct ManifestStore<S> {
    store: Arc<S>,
    commit_serial: Mutex<()>,
}

impl<S: ObjectStore> ManifestStore<S> {
    /// Creates a manifest store over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            commit_serial: Mutex::new(()),
        }
    }

    /// Loads the last committed manifest for `partition`.
    ///
    /// Returns `None` if no manifest has ever been written - which is a
    /// different state from a manifest whose segment list is empty.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than absence, and decode failures.
    pub fn load(&self, partition: PartitionId) -> EngineResult<Option<PartitionManifest>> {
        match self.store.get(&manifest_key(partition)) {
            Ok(data) => Ok(Some(PartitionManifest::decode(&data)?)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Commits `manifest`, which must have been derived from the currently
    /// stored version.
    ///
    /// On success the caller's manifest is stamped with the new version
    /// and `token`. On failure the caller's manifest is left untouched.
    ///
    /// # Errors
    ///
    /// [`EngineError::StaleLeader`] if a higher token has committed;
    /// [`EngineError::VersionConflict`] if the stored version moved on;
    /// store and codec failures otherwise.
    pub fn commit(
        &self,
        manifest: &mut PartitionManifest,
        token: FencingToken,
    ) -> EngineResult<()> {
        let key = manifest_key(manifest.partition());
        let _serial = self.commit_serial.lock();

        let stored = self.load(manifest.partition())?;
        match &stored {
            Some(current) => {
                if current.fencing_token() > token {
                    return Err(EngineError::StaleLeader {
                        token,
                        current: current.fencing_token(),
                    });
                }
                if current.version() != manifest.version() {
                    return Err(EngineError::VersionConflict {
                        expected: manifest.version(),
                        actual: current.version(),
                    });
                }
            }
            None => {
                if manifest.version() != 0 {
                    return Err(EngineError::VersionConflict {
                        expected: manifest.version(),
                        actual: 0,
                    });
                }
            }
        }

        let mut committed = manifest.clone();
        committed.stamp_commit(manifest.version() + 1, token);
        let encoded = committed.encode()?;
        self.store.put(&key, Bytes::from(encoded))?;

        tracing::debug!(
            partition = %committed.partition(),
            version = committed.version(),
            start_offset = %committed.start_offset(),
            "manifest committed"
        );
        *manifest = committed;
        Ok(())
    }

    /// The underlying object store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
