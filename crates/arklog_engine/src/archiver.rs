//! Per-partition archiver: upload pipeline and housekeeping under one
//! leadership token.

use crate::config::ArchiverConfig;
use crate::error::{EngineError, EngineResult};
use crate::housekeeping::{Housekeeping, HousekeepingOutcome, HousekeepingStats};
use crate::manifest_store::ManifestStore;
use crate::upload::{UploadOutcome, UploadPipeline, UploadStats};
use arklog_core::{
    FencingToken, PartitionId, PartitionManifest, RetentionPolicy, SegmentStore, Term,
};
use arklog_store::ObjectStore;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Runs the upload pipeline and the housekeeping loop for one partition,
/// fenced by the leadership token handed to this node.
///
/// Construction goes through [`resume`](Self::resume): a new leader picks
/// up from the last committed manifest, treating any in-flight work of its
/// predecessor as not-yet-happened. Uploads the predecessor put without
/// committing are re-put idempotently; deletions it started are re-deleted
/// idempotently.
///
/// When a commit reports [`EngineError::StaleLeader`], the archiver steps
/// down: the error is swallowed, [`is_demoted`](Self::is_demoted) latches,
/// and every further tick is a no-op. The host drops the archiver once it
/// observes the demotion.
pub struct PartitionArchiver<S> {
    partition: PartitionId,
    config: ArchiverConfig,
    policy: RwLock<RetentionPolicy>,
    token: FencingToken,
    local: Arc<SegmentStore>,
    manifest_store: Arc<ManifestStore<S>>,
    pipeline: UploadPipeline<S>,
    housekeeping: Housekeeping<S>,
    demoted: AtomicBool,
    last_housekeeping: Mutex<Option<Instant>>,
}

impl<S: ObjectStore> PartitionArchiver<S> {
    /// Resumes archival for `local`'s partition from the last committed
    /// manifest.
    ///
    /// `token` and `term` come from the leadership layer; `term` is
    /// stamped onto segments opened from here on.
    ///
    /// # Errors
    ///
    /// Propagates store and decode failures while loading the manifest.
    pub fn resume(
        store: Arc<S>,
        local: Arc<SegmentStore>,
        config: ArchiverConfig,
        policy: RetentionPolicy,
        token: FencingToken,
        term: Term,
    ) -> EngineResult<Self> {
        let partition = local.partition();
        let manifest_store = Arc::new(ManifestStore::new(store));

        if let Some(manifest) = manifest_store.load(partition)? {
            // Everything at or below the committed tail is durably
            // archived, whatever the previous leader was doing.
            if let Some(last) = manifest.last_offset() {
                local.mark_uploaded(last);
            }
            tracing::info!(
                partition = %partition,
                %token,
                last_offset = ?manifest.last_offset(),
                start_offset = %manifest.start_offset(),
                "resuming archival from committed manifest"
            );
        } else {
            tracing::info!(partition = %partition, %token, "starting archival for new partition");
        }
        local.set_term(term);

        let pipeline = UploadPipeline::new(
            partition,
            Arc::clone(&manifest_store),
            config.retry.clone(),
            config.max_segments_per_upload,
        );
        let housekeeping = Housekeeping::new(
            partition,
            Arc::clone(&manifest_store),
            config.retry.clone(),
        );

        Ok(Self {
            partition,
            config,
            policy: RwLock::new(policy),
            token,
            local,
            manifest_store,
            pipeline,
            housekeeping,
            demoted: AtomicBool::new(false),
            last_housekeeping: Mutex::new(None),
        })
    }

    /// The partition this archiver serves.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The fencing token this archiver commits under.
    pub fn token(&self) -> FencingToken {
        self.token
    }

    /// The local segment store.
    pub fn local(&self) -> &Arc<SegmentStore> {
        &self.local
    }

    /// True once a stale commit demoted this archiver.
    pub fn is_demoted(&self) -> bool {
        self.demoted.load(Ordering::SeqCst)
    }

    /// Replaces the retention policy; the next housekeeping tick reads it.
    pub fn set_policy(&self, policy: RetentionPolicy) {
        *self.policy.write() = policy;
    }

    /// The current retention policy.
    pub fn policy(&self) -> RetentionPolicy {
        self.policy.read().clone()
    }

    /// Loads the last committed manifest, if one exists.
    ///
    /// # Errors
    ///
    /// Propagates store and decode failures.
    pub fn manifest(&self) -> EngineResult<Option<PartitionManifest>> {
        self.manifest_store.load(self.partition)
    }

    /// Upload pipeline counters.
    pub fn upload_stats(&self) -> UploadStats {
        self.pipeline.stats()
    }

    /// Housekeeping counters.
    pub fn housekeeping_stats(&self) -> HousekeepingStats {
        self.housekeeping.stats()
    }

    /// Runs one upload tick against the current wall clock.
    ///
    /// # Errors
    ///
    /// See [`UploadPipeline::tick`]; a stale-leader error is swallowed and
    /// latches demotion instead.
    pub fn upload_tick(&self) -> EngineResult<UploadOutcome> {
        self.upload_tick_at(SystemTime::now())
    }

    /// Runs one upload tick, sealing an active segment older than the
    /// upload interval first.
    ///
    /// # Errors
    ///
    /// See [`upload_tick`](Self::upload_tick).
    pub fn upload_tick_at(&self, now: SystemTime) -> EngineResult<UploadOutcome> {
        if self.is_demoted() {
            return Ok(UploadOutcome::default());
        }

        if let Some(opened) = self.local.active_opened_at() {
            let age = now.duration_since(opened).unwrap_or_default();
            if age >= self.config.upload_interval {
                self.local.seal_active();
            }
        }

        match self.pipeline.tick(&self.local, self.token) {
            Err(EngineError::StaleLeader { token, current }) => {
                self.step_down(token, current);
                Ok(UploadOutcome::default())
            }
            other => other,
        }
    }

    /// Runs one housekeeping tick against the current wall clock.
    ///
    /// # Errors
    ///
    /// See [`Housekeeping::tick`]; a stale-leader error is swallowed and
    /// latches demotion instead.
    pub fn housekeeping_tick(&self) -> EngineResult<HousekeepingOutcome> {
        self.housekeeping_tick_at(SystemTime::now())
    }

    /// Runs one housekeeping tick, evaluating ages against `now`.
    ///
    /// # Errors
    ///
    /// See [`housekeeping_tick`](Self::housekeeping_tick).
    pub fn housekeeping_tick_at(&self, now: SystemTime) -> EngineResult<HousekeepingOutcome> {
        if self.is_demoted() {
            return Ok(HousekeepingOutcome {
                noop: true,
                ..HousekeepingOutcome::default()
            });
        }
        let policy = self.policy();
        match self
            .housekeeping
            .tick_at(&self.local, &policy, self.token, now)
        {
            Err(EngineError::StaleLeader { token, current }) => {
                self.step_down(token, current);
                Ok(HousekeepingOutcome {
                    noop: true,
                    ..HousekeepingOutcome::default()
                })
            }
            other => other,
        }
    }

    /// One pass of the host loop: always an upload tick, plus a
    /// housekeeping tick whenever the housekeeping interval has elapsed.
    ///
    /// # Errors
    ///
    /// Propagates tick errors other than stale leadership.
    pub fn run_once(&self) -> EngineResult<()> {
        self.upload_tick()?;

        let due = match *self.last_housekeeping.lock() {
            Some(at) => at.elapsed() >= self.config.housekeeping_interval,
            None => true,
        };
        if due {
            self.housekeeping_tick()?;
            *self.last_housekeeping.lock() = Some(Instant::now());
        }
        Ok(())
    }

    fn step_down(&self, token: FencingToken, current: FencingToken) {
        if !self.demoted.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                partition = %self.partition,
                %token,
                %current,
                "commit fenced off by newer leader, stepping down"
            );
        }
    }
}

impl<S> std::fmt::Debug for PartitionArchiver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionArchiver")
            .field("partition", &self.partition)
            .field("token", &self.token)
            .field("demoted", &self.demoted.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
