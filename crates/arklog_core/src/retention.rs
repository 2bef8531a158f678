//! Retention policy and the pure eviction evaluators.
//!
//! The evaluators are pure functions of (snapshot, policy, now): no hidden
//! state, no clock reads, no I/O. The housekeeping loop feeds them fresh
//! snapshots every tick and commits only their effects.
//!
//! Local and cloud bounds are evaluated independently - local disk
//! typically retains a far smaller window than the archive - and when both
//! a size and an age bound apply to the cloud window, the more restrictive
//! one (the higher resulting start offset) wins.

use crate::manifest::{PartitionManifest, SegmentMeta};
use crate::segment::SegmentInfo;
use crate::types::Offset;
use rand::Rng;
use std::time::{Duration, SystemTime};

/// Per-partition retention configuration.
///
/// Read fresh on every housekeeping tick, so reconfiguration takes effect
/// on the next pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Target size of the local log in bytes. `None` disables local
    /// eviction.
    pub local_target_bytes: Option<u64>,
    /// Maximum size of the cloud-readable window in bytes.
    pub cloud_retention_bytes: Option<u64>,
    /// Maximum age of archived data.
    pub cloud_retention_age: Option<Duration>,
    /// Percentage by which the local byte target is jittered, to
    /// desynchronize eviction across partitions sharing a disk. Never
    /// applied to the cloud bounds.
    pub local_jitter_percent: u8,
}

impl RetentionPolicy {
    /// Creates a policy with no bounds configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local byte target.
    #[must_use]
    pub fn with_local_target_bytes(mut self, bytes: u64) -> Self {
        self.local_target_bytes = Some(bytes);
        self
    }

    /// Sets the cloud size bound.
    #[must_use]
    pub fn with_cloud_retention_bytes(mut self, bytes: u64) -> Self {
        self.cloud_retention_bytes = Some(bytes);
        self
    }

    /// Sets the cloud age bound.
    #[must_use]
    pub fn with_cloud_retention_age(mut self, age: Duration) -> Self {
        self.cloud_retention_age = Some(age);
        self
    }

    /// Sets the local jitter percentage.
    #[must_use]
    pub fn with_local_jitter_percent(mut self, percent: u8) -> Self {
        self.local_jitter_percent = percent;
        self
    }
}

/// Cloud-side eviction decision for one housekeeping tick.
///
/// Ephemeral: only its effect (a committed manifest) is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionDecision {
    /// The start offset retention wants the manifest advanced to.
    pub new_start_offset: Offset,
    /// The archive start offset once the delete set is collected.
    pub new_archive_start_offset: Offset,
    /// Segments to delete: everything physically below
    /// `new_start_offset`, including segments released by earlier,
    /// interrupted ticks.
    pub delete: Vec<SegmentMeta>,
}

impl EvictionDecision {
    /// True when the tick has nothing to do.
    #[must_use]
    pub fn is_noop(&self, manifest: &PartitionManifest) -> bool {
        self.new_start_offset == manifest.start_offset() && self.delete.is_empty()
    }
}

/// Local eviction decision: the boundary below which sealed, uploaded
/// segments may be removed from the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEviction {
    /// Segments fully below this offset may be evicted locally.
    pub evict_before: Offset,
}

/// Computes the cloud eviction decision for one tick.
///
/// Size bound: retain the longest suffix of the readable window whose
/// total size fits the bound; a bound smaller than the newest segment
/// legitimately retains nothing - the archived window may empty while the
/// manifest's offset history survives. Age bound: retain from the oldest
/// segment younger than the bound. With both, the more restrictive wins.
#[must_use]
pub fn evaluate_cloud(
    manifest: &PartitionManifest,
    policy: &RetentionPolicy,
    now: SystemTime,
) -> EvictionDecision {
    let retained: Vec<&SegmentMeta> = manifest.retained_segments().collect();
    let mut new_start = manifest.start_offset();

    if let Some(bound) = policy.cloud_retention_bytes {
        let mut acc = 0u64;
        let mut keep_from = manifest.next_offset();
        for meta in retained.iter().rev() {
            if acc + meta.size_bytes > bound {
                break;
            }
            acc += meta.size_bytes;
            keep_from = meta.base_offset;
        }
        new_start = new_start.max(keep_from);
    }

    if let Some(max_age) = policy.cloud_retention_age {
        let cutoff = now.checked_sub(max_age);
        let keep_from = retained
            .iter()
            .find(|meta| cutoff.is_none_or(|cutoff| meta.created_at() >= cutoff))
            .map_or(manifest.next_offset(), |meta| meta.base_offset);
        new_start = new_start.max(keep_from);
    }

    let delete = manifest.segments_below(new_start);
    let new_archive_start_offset = manifest
        .segments()
        .iter()
        .find(|s| s.last_offset >= new_start)
        .map_or(manifest.next_offset(), |s| s.base_offset);

    EvictionDecision {
        new_start_offset: new_start,
        new_archive_start_offset,
        delete,
    }
}

/// Computes the local eviction boundary.
///
/// Walks sealed segments newest to oldest accumulating size against
/// `target_bytes`. Two floors apply: the newest sealed segment is always
/// retained (a target smaller than one segment degrades to retaining
/// exactly one, never zero), and nothing at or above the uploaded
/// watermark is released.
#[must_use]
pub fn evaluate_local(
    sealed: &[SegmentInfo],
    uploaded_through: Option<Offset>,
    target_bytes: Option<u64>,
) -> LocalEviction {
    let nothing = LocalEviction {
        evict_before: Offset::new(0),
    };
    let (Some(target), Some(newest)) = (target_bytes, sealed.last()) else {
        return nothing;
    };

    let mut keep_from = newest.base_offset;
    let mut acc = newest.size_bytes;
    for info in sealed.iter().rev().skip(1) {
        if acc + info.size_bytes > target {
            break;
        }
        acc += info.size_bytes;
        keep_from = info.base_offset;
    }

    // Never release past upload confirmation.
    let upload_cap = uploaded_through.map_or(Offset::new(0), Offset::next);
    LocalEviction {
        evict_before: keep_from.min(upload_cap),
    }
}

/// Perturbs the local byte target by up to ±`percent`.
///
/// The cloud bounds are never jittered; only the local target tolerates
/// imprecision in exchange for desynchronized eviction.
#[must_use]
pub fn jittered_target<R: Rng>(target: u64, percent: u8, rng: &mut R) -> u64 {
    if percent == 0 || target == 0 {
        return target;
    }
    let spread = target / 100 * u64::from(percent.min(100));
    if spread == 0 {
        return target;
    }
    let delta = rng.gen_range(0..=2 * spread);
    (target + delta).saturating_sub(spread)
}
