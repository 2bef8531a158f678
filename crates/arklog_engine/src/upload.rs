//! Upload pipeline: sealed local segments into the archive, in order.

use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};
use crate::manifest_store::ManifestStore;
use arklog_core::{
    CoreError, FencingToken, Offset, PartitionId, PartitionManifest, SegmentMeta, SegmentStore,
    Term,
};
use arklog_store::ObjectStore;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;

/// Upper bound on commit-conflict retries within one segment's commit.
/// Conflicts only come from the sibling housekeeping task, so a handful of
/// re-reads always suffices.
const MAX_COMMIT_RETRIES: u32 = 16;

/// Returns the object key for an archived segment.
#[must_use]
pub fn object_key(partition: PartitionId, base: Offset, term: Term) -> String {
    format!(
        "{}/{}-{}.seg",
        partition.as_u32(),
        base.as_u64(),
        term.as_u64()
    )
}

/// Counters exposed by the upload pipeline.
#[derive(Debug, Clone, Default)]
pub struct UploadStats {
    /// Segments archived since startup.
    pub segments_uploaded: u64,
    /// Bytes archived since startup.
    pub bytes_uploaded: u64,
    /// Transient put failures that were retried.
    pub put_retries: u64,
    /// Manifest commits that raced housekeeping and were re-read.
    pub commit_conflicts: u64,
    /// Last tick-aborting error, if any.
    pub last_error: Option<String>,
}

/// Result of one upload tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Segments archived this tick.
    pub segments: usize,
    /// Bytes archived this tick.
    pub bytes: u64,
}

/// Moves sealed segments into the object store and registers them in the
/// manifest, in strict offset order.
///
/// Each tick archives up to the configured segment cap. A segment whose
/// upload keeps failing stays pending and is retried on the next tick,
/// never dropped. The pipeline trusts the manifest, not local state, for
/// where to resume: after a leadership change it continues from the last
/// committed `last_offset`, and an empty-but-initialized manifest (zero
/// segments, preserved offsets) is continued from, never restarted.
pub struct UploadPipeline<S> {
    partition: PartitionId,
    manifest_store: Arc<ManifestStore<S>>,
    retry: RetryConfig,
    max_segments_per_tick: usize,
    stats: RwLock<UploadStats>,
}

impl<S: ObjectStore> UploadPipeline<S> {
    /// Creates a pipeline for `partition`.
    pub fn new(
        partition: PartitionId,
        manifest_store: Arc<ManifestStore<S>>,
        retry: RetryConfig,
        max_segments_per_tick: usize,
    ) -> Self {
        Self {
            partition,
            manifest_store,
            retry,
            max_segments_per_tick,
            stats: RwLock::new(UploadStats::default()),
        }
    }

    /// Current pipeline counters.
    pub fn stats(&self) -> UploadStats {
        self.stats.read().clone()
    }

    /// Archives pending sealed segments, oldest first.
    ///
    /// # Errors
    ///
    /// [`EngineError::UploadGap`] if the local log no longer holds the
    /// segment the manifest expects next;
    /// [`EngineError::RetriesExhausted`] when a transient failure outlives
    /// the retry budget (the segment stays pending);
    /// [`EngineError::StaleLeader`] if this node was deposed.
    pub fn tick(&self, local: &SegmentStore, token: FencingToken) -> EngineResult<UploadOutcome> {
        let result = self.run(local, token);
        if let Err(e) = &result {
            self.stats.write().last_error = Some(e.to_string());
        }
        result
    }

    fn run(&self, local: &SegmentStore, token: FencingToken) -> EngineResult<UploadOutcome> {
        let mut outcome = UploadOutcome::default();

        while outcome.segments < self.max_segments_per_tick {
            let mut manifest = self
                .manifest_store
                .load(self.partition)?
                .unwrap_or_else(|| PartitionManifest::new(self.partition));
            let expected = manifest.next_offset();

            let Some(segment) = local.next_pending_upload(expected) else {
                break;
            };
            if segment.base_offset != expected {
                return Err(EngineError::UploadGap {
                    expected,
                    found: segment.base_offset,
                });
            }

            let key = object_key(self.partition, segment.base_offset, segment.term);
            self.put_with_retry(&key, segment.data.clone())?;

            let meta = SegmentMeta::from_sealed(&segment, key);
            self.commit_add(&mut manifest, meta, token)?;
            local.mark_uploaded(segment.last_offset);

            outcome.segments += 1;
            outcome.bytes += segment.size_bytes;
            let mut stats = self.stats.write();
            stats.segments_uploaded += 1;
            stats.bytes_uploaded += segment.size_bytes;
            drop(stats);

            tracing::debug!(
                partition = %self.partition,
                base = %segment.base_offset,
                last = %segment.last_offset,
                bytes = segment.size_bytes,
                "segment archived"
            );
        }

        Ok(outcome)
    }

    /// Puts `data` with bounded exponential backoff on transient failures.
    fn put_with_retry(&self, key: &str, data: Bytes) -> EngineResult<()> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(self.retry.delay_for_attempt(attempt));
                self.stats.write().put_retries += 1;
            }
            match self.manifest_store.store().put(key, data.clone()) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    tracing::warn!(key, attempt, error = %e, "segment put failed, will retry");
                    last = Some(EngineError::Store(e));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::RetriesExhausted {
            attempts,
            source: Box::new(
                last.unwrap_or_else(|| EngineError::Store(arklog_store::StoreError::transient(
                    "no attempts made",
                ))),
            ),
        })
    }

    /// Registers an uploaded segment in the manifest, resolving version
    /// conflicts by re-reading.
    fn commit_add(
        &self,
        manifest: &mut PartitionManifest,
        meta: SegmentMeta,
        token: FencingToken,
    ) -> EngineResult<()> {
        let mut conflicts = 0;
        loop {
            match manifest.add_segment(meta.clone()) {
                Ok(()) => {}
                Err(CoreError::OutOfOrderInsert { expected, actual }) if actual < expected => {
                    // Already registered: a previous leader committed this
                    // segment after putting it, or an earlier conflict
                    // retry raced. Nothing to do.
                    tracing::debug!(
                        partition = %self.partition,
                        base = %actual,
                        "segment already registered, skipping commit"
                    );
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            match self.manifest_store.commit(manifest, token) {
                Ok(()) => return Ok(()),
                Err(conflict @ EngineError::VersionConflict { .. }) => {
                    conflicts += 1;
                    self.stats.write().commit_conflicts += 1;
                    if conflicts >= MAX_COMMIT_RETRIES {
                        return Err(EngineError::RetriesExhausted {
                            attempts: conflicts,
                            source: Box::new(conflict),
                        });
                    }
                    *manifest = self
                        .manifest_store
                        .load(self.partition)?
                        .unwrap_or_else(|| PartitionManifest::new(self.partition));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
