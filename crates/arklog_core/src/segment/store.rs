//! Per-partition segment store.

use crate::error::CoreResult;
use crate::segment::{SealedSegment, Segment, SegmentInfo};
use crate::types::{Offset, PartitionId, Term};
use bytes::Bytes;
use parking_lot::RwLock;
use std::time::SystemTime;

/// Outcome of a local eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictOutcome {
    /// Number of segments removed.
    pub segments: usize,
    /// Bytes reclaimed.
    pub bytes: u64,
}

/// The local log for one partition: sealed segments plus an active tail.
///
/// Appends go to the active segment, which is sealed automatically once it
/// reaches the configured size boundary (or on demand via
/// [`SegmentStore::seal_active`], e.g. when the max upload interval
/// expires). Sealed segments are immutable and flow to the upload pipeline
/// in strict offset order.
///
/// The store tracks an uploaded watermark: the highest offset confirmed
/// committed to the manifest. [`SegmentStore::evict_below`] never removes
/// data above it, and never removes the active segment.
pub struct SegmentStore {
    partition: PartitionId,
    max_segment_bytes: u64,
    inner: RwLock<Inner>,
}

struct Inner {
    sealed: Vec<Segment>,
    active: Option<Segment>,
    next_offset: Offset,
    term: Term,
    uploaded_through: Option<Offset>,
}

impl SegmentStore {
    /// Creates an empty store for `partition`, starting at offset 0.
    #[must_use]
    pub fn new(partition: PartitionId, max_segment_bytes: u64) -> Self {
        Self::new_at(partition, max_segment_bytes, Offset::new(0))
    }

    /// Creates an empty store whose first append takes offset `start`.
    ///
    /// Used when a node materializes a partition whose older data already
    /// lives only in the archive.
    #[must_use]
    pub fn new_at(partition: PartitionId, max_segment_bytes: u64, start: Offset) -> Self {
        Self {
            partition,
            max_segment_bytes,
            inner: RwLock::new(Inner {
                sealed: Vec::new(),
                active: None,
                next_offset: start,
                term: Term::new(0),
                uploaded_through: None,
            }),
        }
    }

    /// The partition this store belongs to.
    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Sets the term stamped onto newly opened segments.
    pub fn set_term(&self, term: Term) {
        self.inner.write().term = term;
    }

    /// Appends one record to the active segment, rolling on the size
    /// boundary.
    ///
    /// # Errors
    ///
    /// Propagates append failures from the segment.
    pub fn append(&self, record: &[u8]) -> CoreResult<Offset> {
        self.append_at(record, SystemTime::now())
    }

    /// Appends one record using `now` as the creation time for any newly
    /// opened segment.
    ///
    /// # Errors
    ///
    /// Propagates append failures from the segment.
    pub fn append_at(&self, record: &[u8], now: SystemTime) -> CoreResult<Offset> {
        let mut inner = self.inner.write();
        if inner.active.is_none() {
            let segment = Segment::new(inner.next_offset, inner.term, now);
            inner.active = Some(segment);
        }
        let active = inner.active.as_mut().unwrap_or_else(|| unreachable!());
        let offset = active.append(record)?;

        let full = active.size_bytes() >= self.max_segment_bytes;
        inner.next_offset = offset.next();
        if full {
            let mut segment = inner.active.take().unwrap_or_else(|| unreachable!());
            segment.seal();
            inner.sealed.push(segment);
        }
        Ok(offset)
    }

    /// Seals the active segment if it holds any records.
    ///
    /// Returns `true` if a segment was sealed.
    pub fn seal_active(&self) -> bool {
        let mut inner = self.inner.write();
        let has_records = inner
            .active
            .as_ref()
            .is_some_and(|s| s.record_count() > 0);
        if !has_records {
            return false;
        }
        let mut segment = inner.active.take().unwrap_or_else(|| unreachable!());
        segment.seal();
        inner.sealed.push(segment);
        true
    }

    /// The offset the next append will take.
    #[must_use]
    pub fn next_offset(&self) -> Offset {
        self.inner.read().next_offset
    }

    /// When the active segment was opened, if one exists and holds records.
    ///
    /// Drives the max-upload-interval seal: an active segment older than
    /// the interval is sealed even though it has not hit the size boundary.
    #[must_use]
    pub fn active_opened_at(&self) -> Option<SystemTime> {
        let inner = self.inner.read();
        inner
            .active
            .as_ref()
            .filter(|s| s.record_count() > 0)
            .map(Segment::created_at)
    }

    /// Returns the first sealed segment at or above `from`, with payload.
    #[must_use]
    pub fn next_pending_upload(&self, from: Offset) -> Option<SealedSegment> {
        let inner = self.inner.read();
        inner
            .sealed
            .iter()
            .find(|s| s.base_offset() >= from)
            .map(snapshot)
    }

    /// Lightweight descriptions of all sealed segments, oldest first.
    #[must_use]
    pub fn sealed_infos(&self) -> Vec<SegmentInfo> {
        let inner = self.inner.read();
        inner
            .sealed
            .iter()
            .map(|s| SegmentInfo {
                base_offset: s.base_offset(),
                last_offset: s.last_offset().unwrap_or(s.base_offset()),
                size_bytes: s.size_bytes(),
                created_at: s.created_at(),
            })
            .collect()
    }

    /// Records that every offset up to `through` is committed to the
    /// manifest. The watermark never moves backwards.
    pub fn mark_uploaded(&self, through: Offset) {
        let mut inner = self.inner.write();
        inner.uploaded_through = Some(match inner.uploaded_through {
            Some(current) => current.max(through),
            None => through,
        });
    }

    /// The highest offset confirmed committed to the manifest.
    #[must_use]
    pub fn uploaded_through(&self) -> Option<Offset> {
        self.inner.read().uploaded_through
    }

    /// Removes sealed segments whose last offset is below `boundary`.
    ///
    /// Segments at or above the uploaded watermark are kept regardless of
    /// `boundary` - eviction never outruns upload confirmation. The active
    /// segment is never touched.
    pub fn evict_below(&self, boundary: Offset) -> EvictOutcome {
        let mut inner = self.inner.write();
        let uploaded = inner.uploaded_through;
        let mut outcome = EvictOutcome::default();
        inner.sealed.retain(|s| {
            let last = s.last_offset().unwrap_or(s.base_offset());
            let evictable = last < boundary && uploaded.is_some_and(|u| last <= u);
            if evictable {
                outcome.segments += 1;
                outcome.bytes += s.size_bytes();
            }
            !evictable
        });
        outcome
    }

    /// Total bytes held locally (sealed plus active).
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        let inner = self.inner.read();
        let sealed: u64 = inner.sealed.iter().map(Segment::size_bytes).sum();
        sealed + inner.active.as_ref().map_or(0, Segment::size_bytes)
    }

    /// Number of sealed segments currently held.
    #[must_use]
    pub fn sealed_count(&self) -> usize {
        self.inner.read().sealed.len()
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("partition", &self.partition)
            .field("max_segment_bytes", &self.max_segment_bytes)
            .field("next_offset", &self.next_offset())
            .field("sealed_count", &self.sealed_count())
            .finish_non_exhaustive()
    }
}

fn snapshot(segment: &Segment) -> SealedSegment {
    // Sealed segments are immutable, so copying the payload out once at
    // upload time is safe.
    SealedSegment {
        base_offset: segment.base_offset(),
        last_offset: segment.last_offset().unwrap_or(segment.base_offset()),
        size_bytes: segment.size_bytes(),
        created_at: segment.created_at(),
        term: segment.term(),
        data: Bytes::copy_from_slice(segment.payload()),
    }
}
