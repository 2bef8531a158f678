//! Housekeeping loop: periodic retention enforcement.
//!
//! Each tick walks `Idle -> Evaluate -> Delete -> Commit -> Idle`:
//!
//! 1. Evaluate the retention policy against a fresh manifest snapshot.
//!    A decision that moves nothing returns straight to Idle.
//! 2. Commit the metadata effect first: `start_offset` advances in its own
//!    small commit, with no object deletion behind it.
//! 3. Delete the objects of every segment now below `start_offset`.
//!    Deletions are idempotent - a prior tick may have died mid-batch.
//! 4. Only after the whole batch is confirmed gone (or already absent),
//!    commit the truncation that drops the entries and advances
//!    `archive_start_offset`. The manifest never stops listing an object
//!    that might still serve reads; the reverse window (object gone,
//!    entry still listed) is bounded by one tick.
//!
//! The tick finishes with local eviction: sealed segments below the
//! jittered local target are dropped, never past the uploaded watermark.

use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};
use crate::manifest_store::ManifestStore;
use arklog_core::{
    evaluate_cloud, evaluate_local, jittered_target, EvictOutcome, FencingToken, Offset,
    PartitionId, PartitionManifest, RetentionPolicy, SegmentStore,
};
use arklog_store::ObjectStore;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;

/// Bound on commit-conflict retries within one tick; conflicts only come
/// from the sibling upload task.
const MAX_COMMIT_RETRIES: u32 = 16;

/// The phase the housekeeping loop is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HousekeepingState {
    /// Waiting for the next tick.
    Idle,
    /// Computing the eviction decision.
    Evaluate,
    /// Deleting released objects.
    Delete,
    /// Committing the truncated manifest.
    Commit,
}

/// Counters exposed by the housekeeping loop.
#[derive(Debug, Clone, Default)]
pub struct HousekeepingStats {
    /// Ticks run.
    pub ticks: u64,
    /// Ticks that had nothing to do.
    pub noop_ticks: u64,
    /// Archived segments physically deleted.
    pub segments_deleted: u64,
    /// Bytes physically deleted from the archive.
    pub bytes_deleted: u64,
    /// Start-offset advances committed.
    pub start_offset_advances: u64,
    /// Manifest commits that raced the upload task and were re-read.
    pub commit_conflicts: u64,
    /// Transient delete failures that were retried.
    pub delete_retries: u64,
    /// Local segments evicted.
    pub local_segments_evicted: u64,
    /// Local bytes evicted.
    pub local_bytes_evicted: u64,
    /// Last tick-aborting error, if any.
    pub last_error: Option<String>,
}

/// Result of one housekeeping tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingOutcome {
    /// True when cloud retention had nothing to do this tick.
    pub noop: bool,
    /// Archived segments deleted this tick.
    pub segments_deleted: usize,
    /// Archive bytes deleted this tick.
    pub bytes_deleted: u64,
    /// Local eviction result.
    pub local: EvictOutcome,
}

/// The per-partition retention enforcement loop.
pub struct Housekeeping<S> {
    partition: PartitionId,
    manifest_store: Arc<ManifestStore<S>>,
    retry: RetryConfig,
    state: RwLock<HousekeepingState>,
    stats: RwLock<HousekeepingStats>,
}

impl<S: ObjectStore> Housekeeping<S> {
    /// Creates a housekeeping loop for `partition`.
    pub fn new(
        partition: PartitionId,
        manifest_store: Arc<ManifestStore<S>>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            partition,
            manifest_store,
            retry,
            state: RwLock::new(HousekeepingState::Idle),
            stats: RwLock::new(HousekeepingStats::default()),
        }
    }

    /// The loop's current phase.
    pub fn state(&self) -> HousekeepingState {
        *self.state.read()
    }

    /// Current counters.
    pub fn stats(&self) -> HousekeepingStats {
        self.stats.read().clone()
    }

    /// Runs one tick against the current wall clock.
    ///
    /// # Errors
    ///
    /// See [`tick_at`](Self::tick_at).
    pub fn tick(
        &self,
        local: &SegmentStore,
        policy: &RetentionPolicy,
        token: FencingToken,
    ) -> EngineResult<HousekeepingOutcome> {
        self.tick_at(local, policy, token, SystemTime::now())
    }

    /// Runs one tick, evaluating segment ages against `now`.
    ///
    /// The policy is taken fresh per tick, so reconfiguration applies on
    /// the next pass.
    ///
    /// # Errors
    ///
    /// A transient failure that outlives the retry budget aborts the tick
    /// with [`EngineError::RetriesExhausted`]; the manifest is never left
    /// with entries whose objects were not confirmed deleted.
    /// [`EngineError::StaleLeader`] reports deposition.
    pub fn tick_at(
        &self,
        local: &SegmentStore,
        policy: &RetentionPolicy,
        token: FencingToken,
        now: SystemTime,
    ) -> EngineResult<HousekeepingOutcome> {
        self.stats.write().ticks += 1;
        let result = self.run(local, policy, token, now);
        *self.state.write() = HousekeepingState::Idle;
        match &result {
            Ok(outcome) if outcome.noop => self.stats.write().noop_ticks += 1,
            Ok(_) => {}
            Err(e) => self.stats.write().last_error = Some(e.to_string()),
        }
        result
    }

    fn run(
        &self,
        local: &SegmentStore,
        policy: &RetentionPolicy,
        token: FencingToken,
        now: SystemTime,
    ) -> EngineResult<HousekeepingOutcome> {
        *self.state.write() = HousekeepingState::Evaluate;

        let Some(mut manifest) = self.manifest_store.load(self.partition)? else {
            // Nothing ever archived: no cloud window to enforce and no
            // uploaded watermark to evict behind.
            return Ok(HousekeepingOutcome {
                noop: true,
                ..HousekeepingOutcome::default()
            });
        };

        let decision = evaluate_cloud(&manifest, policy, now);
        let mut advanced = false;
        if decision.new_start_offset > manifest.start_offset() {
            advanced = self.commit_start_advance(
                &mut manifest,
                decision.new_start_offset,
                policy,
                token,
                now,
            )?;
        }

        let doomed = manifest.segments_below(manifest.start_offset());
        let mut outcome = HousekeepingOutcome {
            noop: !advanced && doomed.is_empty(),
            ..HousekeepingOutcome::default()
        };

        if !doomed.is_empty() {
            *self.state.write() = HousekeepingState::Delete;
            for meta in &doomed {
                let existed = self.delete_with_retry(&meta.object_key)?;
                tracing::debug!(
                    partition = %self.partition,
                    key = %meta.object_key,
                    existed,
                    "released object deleted"
                );
            }

            *self.state.write() = HousekeepingState::Commit;
            self.commit_truncation(&mut manifest, token)?;

            outcome.segments_deleted = doomed.len();
            outcome.bytes_deleted = doomed.iter().map(|m| m.size_bytes).sum();
            let mut stats = self.stats.write();
            stats.segments_deleted += doomed.len() as u64;
            stats.bytes_deleted += outcome.bytes_deleted;
        }

        outcome.local = self.evict_local(local, policy);
        Ok(outcome)
    }

    /// Commits the metadata phase: `start_offset` advances on its own,
    /// before any object is touched.
    fn commit_start_advance(
        &self,
        manifest: &mut PartitionManifest,
        new_start: Offset,
        policy: &RetentionPolicy,
        token: FencingToken,
        now: SystemTime,
    ) -> EngineResult<bool> {
        let mut target = new_start;
        let mut conflicts = 0;
        loop {
            if !manifest.advance_start_offset(target) {
                return Ok(false);
            }
            match self.manifest_store.commit(manifest, token) {
                Ok(()) => {
                    self.stats.write().start_offset_advances += 1;
                    tracing::info!(
                        partition = %self.partition,
                        start_offset = %manifest.start_offset(),
                        "retention released data below start offset"
                    );
                    return Ok(true);
                }
                Err(conflict @ EngineError::VersionConflict { .. }) => {
                    conflicts += 1;
                    self.stats.write().commit_conflicts += 1;
                    if conflicts >= MAX_COMMIT_RETRIES {
                        return Err(EngineError::RetriesExhausted {
                            attempts: conflicts,
                            source: Box::new(conflict),
                        });
                    }
                    // The upload task moved the manifest: re-read and
                    // recompute against the new tail.
                    *manifest = self
                        .manifest_store
                        .load(self.partition)?
                        .unwrap_or_else(|| unreachable!("manifest vanished mid-tick"));
                    target = evaluate_cloud(manifest, policy, now).new_start_offset;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Commits the truncation after the delete batch confirmed.
    fn commit_truncation(
        &self,
        manifest: &mut PartitionManifest,
        token: FencingToken,
    ) -> EngineResult<()> {
        let mut conflicts = 0;
        loop {
            manifest.truncate_to(manifest.start_offset());
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
                        .unwrap_or_else(|| unreachable!("manifest vanished mid-tick"));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deletes one object with bounded backoff; absence is success.
    fn delete_with_retry(&self, key: &str) -> EngineResult<bool> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(self.retry.delay_for_attempt(attempt));
                self.stats.write().delete_retries += 1;
            }
            match self.manifest_store.store().delete(key) {
                Ok(existed) => return Ok(existed),
                Err(e) if e.is_transient() => {
                    tracing::warn!(key, attempt, error = %e, "object delete failed, will retry");
                    last = Some(EngineError::Store(e));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::RetriesExhausted {
            attempts,
            source: Box::new(last.unwrap_or_else(|| {
                EngineError::Store(arklog_store::StoreError::transient("no attempts made"))
            })),
        })
    }

    /// Local eviction: prune sealed, uploaded segments beyond the
    /// jittered local target.
    fn evict_local(&self, local: &SegmentStore, policy: &RetentionPolicy) -> EvictOutcome {
        let target = policy.local_target_bytes.map(|t| {
            jittered_target(t, policy.local_jitter_percent, &mut rand::thread_rng())
        });
        let decision = evaluate_local(&local.sealed_infos(), local.uploaded_through(), target);
        let outcome = local.evict_below(decision.evict_before);
        if outcome.segments > 0 {
            let mut stats = self.stats.write();
            stats.local_segments_evicted += outcome.segments as u64;
            stats.local_bytes_evicted += outcome.bytes;
            tracing::debug!(
                partition = %self.partition,
                segments = outcome.segments,
                bytes = outcome.bytes,
                "local segments evicted"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{object_key, UploadPipeline};
    use arklog_core::Term;
    use arklog_store::{FlakyStore, InMemoryStore};
    use std::time::{Duration, UNIX_EPOCH};

    const TOKEN: FencingToken = FencingToken::new(1);

    struct Fixture {
        store: Arc<FlakyStore<InMemoryStore>>,
        manifest_store: Arc<ManifestStore<FlakyStore<InMemoryStore>>>,
        housekeeping: Housekeeping<FlakyStore<InMemoryStore>>,
        local: SegmentStore,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FlakyStore::new(InMemoryStore::new()));
        let manifest_store = Arc::new(ManifestStore::new(Arc::clone(&store)));
        let housekeeping = Housekeeping::new(
            PartitionId::new(0),
            Arc::clone(&manifest_store),
            RetryConfig::immediate(3),
        );
        let local = SegmentStore::new(PartitionId::new(0), 4);
        Fixture {
            store,
            manifest_store,
            housekeeping,
            local,
        }
    }

    /// Produces `segments` sealed 4-byte segments and archives them.
    fn produce_and_upload(fx: &Fixture, segments: usize) {
        let pipeline = UploadPipeline::new(
            PartitionId::new(0),
            Arc::clone(&fx.manifest_store),
            RetryConfig::immediate(3),
            usize::MAX,
        );
        for _ in 0..segments * 4 {
            fx.local.append_at(b"x", UNIX_EPOCH).unwrap();
        }
        pipeline.tick(&fx.local, TOKEN).unwrap();
    }

    #[test]
    fn tick_without_manifest_is_noop() {
        let fx = fixture();
        let outcome = fx
            .housekeeping
            .tick_at(&fx.local, &RetentionPolicy::new(), TOKEN, UNIX_EPOCH)
            .unwrap();
        assert!(outcome.noop);
        assert_eq!(fx.housekeeping.stats().noop_ticks, 1);
        assert_eq!(fx.housekeeping.state(), HousekeepingState::Idle);
    }

    #[test]
    fn tick_with_satisfied_policy_is_noop() {
        let fx = fixture();
        produce_and_upload(&fx, 2);

        let policy = RetentionPolicy::new().with_cloud_retention_bytes(1000);
        let outcome = fx
            .housekeeping
            .tick_at(&fx.local, &policy, TOKEN, UNIX_EPOCH)
            .unwrap();
        assert!(outcome.noop);
    }

    #[test]
    fn size_retention_deletes_objects_then_truncates() {
        let fx = fixture();
        produce_and_upload(&fx, 4);

        // Keep two 4-byte segments.
        let policy = RetentionPolicy::new().with_cloud_retention_bytes(8);
        let outcome = fx
            .housekeeping
            .tick_at(&fx.local, &policy, TOKEN, UNIX_EPOCH)
            .unwrap();
        assert!(!outcome.noop);
        assert_eq!(outcome.segments_deleted, 2);
        assert_eq!(outcome.bytes_deleted, 8);

        let manifest = fx
            .manifest_store
            .load(PartitionId::new(0))
            .unwrap()
            .unwrap();
        assert_eq!(manifest.segments().len(), 2);
        assert_eq!(manifest.start_offset(), Offset::new(8));
        assert_eq!(manifest.archive_start_offset(), Offset::new(8));
        manifest.check_invariants().unwrap();

        // The released objects are gone, the retained ones remain.
        let key0 = object_key(PartitionId::new(0), Offset::new(0), Term::new(0));
        let key8 = object_key(PartitionId::new(0), Offset::new(8), Term::new(0));
        assert_eq!(fx.store.head(&key0).unwrap(), None);
        assert!(fx.store.head(&key8).unwrap().is_some());
    }

    #[test]
    fn already_absent_object_is_not_an_error() {
        let fx = fixture();
        produce_and_upload(&fx, 3);

        // Someone already deleted the first object (an interrupted prior
        // tick, typically).
        let key0 = object_key(PartitionId::new(0), Offset::new(0), Term::new(0));
        assert!(fx.store.delete(&key0).unwrap());

        let policy = RetentionPolicy::new().with_cloud_retention_bytes(4);
        let outcome = fx
            .housekeeping
            .tick_at(&fx.local, &policy, TOKEN, UNIX_EPOCH)
            .unwrap();
        assert_eq!(outcome.segments_deleted, 2);
    }

    #[test]
    fn interrupted_tick_resumes_from_released_window() {
        let fx = fixture();
        produce_and_upload(&fx, 3);

        // A prior tick committed the start advance and died before
        // deleting anything.
        let mut manifest = fx
            .manifest_store
            .load(PartitionId::new(0))
            .unwrap()
            .unwrap();
        manifest.advance_start_offset(Offset::new(8));
        fx.manifest_store.commit(&mut manifest, TOKEN).unwrap();

        // This tick's policy is satisfied, but the released window still
        // needs collecting.
        let outcome = fx
            .housekeeping
            .tick_at(&fx.local, &RetentionPolicy::new(), TOKEN, UNIX_EPOCH)
            .unwrap();
        assert!(!outcome.noop);
        assert_eq!(outcome.segments_deleted, 2);

        let manifest = fx
            .manifest_store
            .load(PartitionId::new(0))
            .unwrap()
            .unwrap();
        assert_eq!(manifest.segments().len(), 1);
        assert_eq!(manifest.archive_start_offset(), Offset::new(8));
    }

    #[test]
    fn delete_failure_aborts_before_truncation() {
        let fx = fixture();
        produce_and_upload(&fx, 3);

        let policy = RetentionPolicy::new().with_cloud_retention_bytes(4);
        fx.store.fail_deletes(20);
        let err = fx
            .housekeeping
            .tick_at(&fx.local, &policy, TOKEN, UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(err, EngineError::RetriesExhausted { .. }));

        // The manifest still lists every segment: no entry was dropped
        // before its object was confirmed gone.
        let manifest = fx
            .manifest_store
            .load(PartitionId::new(0))
            .unwrap()
            .unwrap();
        assert_eq!(manifest.segments().len(), 3);

        // The store recovers; the next tick converges.
        fx.store.fail_deletes(0);
        let outcome = fx
            .housekeeping
            .tick_at(&fx.local, &policy, TOKEN, UNIX_EPOCH)
            .unwrap();
        assert_eq!(outcome.segments_deleted, 2);
    }

    #[test]
    fn local_eviction_respects_watermark_and_target() {
        let fx = fixture();
        // Three sealed local segments, none uploaded yet.
        for _ in 0..12 {
            fx.local.append_at(b"x", UNIX_EPOCH).unwrap();
        }
        let policy = RetentionPolicy::new().with_local_target_bytes(4);

        // No manifest yet: the tick is a cloud noop, and nothing may be
        // evicted locally without upload confirmation.
        let outcome = fx
            .housekeeping
            .tick_at(&fx.local, &policy, TOKEN, UNIX_EPOCH)
            .unwrap();
        assert_eq!(outcome.local, EvictOutcome::default());
        assert_eq!(fx.local.sealed_count(), 3);
    }

    #[test]
    fn local_eviction_after_upload() {
        let fx = fixture();
        produce_and_upload(&fx, 3);

        let policy = RetentionPolicy::new().with_local_target_bytes(4);
        let outcome = fx
            .housekeeping
            .tick_at(&fx.local, &policy, TOKEN, UNIX_EPOCH)
            .unwrap();
        // Target keeps the newest sealed segment; the two older uploaded
        // ones go.
        assert_eq!(outcome.local.segments, 2);
        assert_eq!(fx.local.sealed_count(), 1);
    }

    #[test]
    fn stale_leader_propagates() {
        let fx = fixture();
        produce_and_upload(&fx, 2);

        // A newer leader committed in the meantime.
        let mut manifest = fx
            .manifest_store
            .load(PartitionId::new(0))
            .unwrap()
            .unwrap();
        fx.manifest_store
            .commit(&mut manifest, FencingToken::new(9))
            .unwrap();

        let policy = RetentionPolicy::new().with_cloud_retention_bytes(4);
        let err = fx
            .housekeeping
            .tick_at(&fx.local, &policy, TOKEN, UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(err, EngineError::StaleLeader { .. }));
    }

    #[test]
    fn age_retention_via_tick() {
        let fx = fixture();
        produce_and_upload(&fx, 2);

        let policy = RetentionPolicy::new().with_cloud_retention_age(Duration::from_secs(60));
        // All segments were created at the epoch; two minutes later they
        // are expired.
        let now = UNIX_EPOCH + Duration::from_secs(120);
        let outcome = fx.housekeeping.tick_at(&fx.local, &policy, TOKEN, now).unwrap();
        assert_eq!(outcome.segments_deleted, 2);

        let manifest = fx
            .manifest_store
            .load(PartitionId::new(0))
            .unwrap()
            .unwrap();
        assert!(manifest.segments().is_empty());
        assert_eq!(manifest.last_offset(), Some(Offset::new(7)));
    }
}
