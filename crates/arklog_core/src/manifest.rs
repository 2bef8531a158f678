//! Partition manifest: the authoritative record of archived segments.
//!
//! One manifest exists per partition, persisted as a JSON document in the
//! object store. It carries the ordered list of archived segments plus the
//! offset bookkeeping that survives even when every segment has been
//! collected:
//!
//! - `start_offset`: lowest offset still readable from the archive
//! - `last_offset`: highest offset ever archived; `None` only before the
//!   first upload
//! - `archive_start_offset`: lowest offset physically present - it can
//!   trail `start_offset` while released segments await deletion
//!
//! A manifest with an empty segment list and a preserved `last_offset` is
//! a fully-truncated manifest, not a missing one. "No manifest at all" is
//! represented by the loader returning `None`, never by emptiness here.

use crate::error::{CoreError, CoreResult};
use crate::segment::SealedSegment;
use crate::types::{FencingToken, Offset, PartitionId, Term};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Reference to one archived segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// First offset in the segment.
    pub base_offset: Offset,
    /// Last offset in the segment.
    pub last_offset: Offset,
    /// Object size in bytes.
    pub size_bytes: u64,
    /// Creation time of the source segment, milliseconds since the epoch.
    pub created_at_ms: u64,
    /// Leadership term the segment was written under.
    pub term: Term,
    /// Key of the backing object.
    pub object_key: String,
}

impl SegmentMeta {
    /// Builds the meta for an uploaded sealed segment.
    #[must_use]
    pub fn from_sealed(segment: &SealedSegment, object_key: String) -> Self {
        let created_at_ms = segment
            .created_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;
        Self {
            base_offset: segment.base_offset,
            last_offset: segment.last_offset,
            size_bytes: segment.size_bytes,
            created_at_ms,
            term: segment.term,
            object_key,
        }
    }

    /// The segment's creation time.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.created_at_ms)
    }
}

/// The per-partition manifest state machine.
///
/// Mutations go through [`add_segment`](Self::add_segment),
/// [`advance_start_offset`](Self::advance_start_offset) and
/// [`truncate_to`](Self::truncate_to) only; each is designed so that
/// re-applying an already-applied transition (a resumed tick after a crash)
/// is a clean no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionManifest {
    partition: PartitionId,
    /// Commit version for optimistic concurrency; bumped by the manifest
    /// store on every successful commit.
    version: u64,
    /// Token of the last leader to commit.
    fencing_token: FencingToken,
    start_offset: Offset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_offset: Option<Offset>,
    archive_start_offset: Offset,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    segments: Vec<SegmentMeta>,
}

impl PartitionManifest {
    /// Creates a fresh manifest for `partition`: nothing archived yet.
    #[must_use]
    pub fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            version: 0,
            fencing_token: FencingToken::new(0),
            start_offset: Offset::new(0),
            last_offset: None,
            archive_start_offset: Offset::new(0),
            segments: Vec::new(),
        }
    }

    /// The partition this manifest describes.
    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Commit version of this snapshot.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Token of the last leader to commit this manifest.
    #[must_use]
    pub fn fencing_token(&self) -> FencingToken {
        self.fencing_token
    }

    /// Stamps commit bookkeeping. Called by the manifest store on commit.
    pub fn stamp_commit(&mut self, version: u64, token: FencingToken) {
        self.version = version;
        self.fencing_token = token;
    }

    /// Lowest offset still readable from the archive.
    #[must_use]
    pub fn start_offset(&self) -> Offset {
        self.start_offset
    }

    /// Highest offset ever archived; `None` before the first upload.
    #[must_use]
    pub fn last_offset(&self) -> Option<Offset> {
        self.last_offset
    }

    /// Lowest offset still physically present in the object store.
    #[must_use]
    pub fn archive_start_offset(&self) -> Offset {
        self.archive_start_offset
    }

    /// The offset the next archived segment must start at.
    #[must_use]
    pub fn next_offset(&self) -> Offset {
        self.last_offset.map_or(Offset::new(0), Offset::next)
    }

    /// All archived segments still physically present, oldest first.
    #[must_use]
    pub fn segments(&self) -> &[SegmentMeta] {
        &self.segments
    }

    /// Segments at or above `start_offset` - the readable window.
    pub fn retained_segments(&self) -> impl Iterator<Item = &SegmentMeta> {
        let start = self.start_offset;
        self.segments.iter().filter(move |s| s.last_offset >= start)
    }

    /// Segments whose last offset is strictly below `boundary`.
    #[must_use]
    pub fn segments_below(&self, boundary: Offset) -> Vec<SegmentMeta> {
        self.segments
            .iter()
            .filter(|s| s.last_offset < boundary)
            .cloned()
            .collect()
    }

    /// Appends a segment reference at the tail of the archive.
    ///
    /// The segment must continue exactly from the preserved `last_offset`,
    /// including after a full truncation left the segment list empty.
    ///
    /// # Errors
    ///
    /// [`CoreError::OutOfOrderInsert`] if the base offset does not continue
    /// from `last_offset`; [`CoreError::InvalidSegment`] for a malformed
    /// range.
    pub fn add_segment(&mut self, meta: SegmentMeta) -> CoreResult<()> {
        if meta.last_offset < meta.base_offset {
            return Err(CoreError::InvalidSegment {
                base: meta.base_offset,
                last: meta.last_offset,
            });
        }
        let expected = self.next_offset();
        if meta.base_offset != expected {
            return Err(CoreError::OutOfOrderInsert {
                expected,
                actual: meta.base_offset,
            });
        }
        if self.segments.is_empty() {
            // First physical segment after creation or full truncation:
            // it is the lowest object present.
            self.archive_start_offset = meta.base_offset;
        }
        self.last_offset = Some(meta.last_offset);
        self.segments.push(meta);
        Ok(())
    }

    /// Raises `start_offset` to `new_start`, releasing older data from the
    /// readable window without touching the physical segment list.
    ///
    /// Values at or below the current `start_offset` are a no-op; values
    /// past `next_offset()` are clamped to it. Returns whether the offset
    /// moved.
    pub fn advance_start_offset(&mut self, new_start: Offset) -> bool {
        let clamped = new_start.min(self.next_offset());
        if clamped <= self.start_offset {
            return false;
        }
        self.start_offset = clamped;
        true
    }

    /// Removes all segments whose last offset is below `new_start` and
    /// advances both `start_offset` and `archive_start_offset`.
    ///
    /// `last_offset` is left untouched: a manifest truncated down to zero
    /// segments keeps its offset history, and the next
    /// [`add_segment`](Self::add_segment) continuing from it succeeds.
    ///
    /// Returns the removed segment references. Re-applying a truncation
    /// that already happened removes nothing and changes nothing.
    pub fn truncate_to(&mut self, new_start: Offset) -> Vec<SegmentMeta> {
        let clamped = new_start.min(self.next_offset());
        let mut removed = Vec::new();
        self.segments.retain(|s| {
            if s.last_offset < clamped {
                removed.push(s.clone());
                false
            } else {
                true
            }
        });
        self.start_offset = self.start_offset.max(clamped);
        self.archive_start_offset = self
            .segments
            .first()
            .map_or(self.next_offset(), |s| s.base_offset);
        removed
    }

    /// Total cloud-resident bytes.
    ///
    /// With `include_below_start` the sum covers every object still
    /// present; without it, only the readable window at or above
    /// `start_offset`.
    #[must_use]
    pub fn cloud_log_size(&self, include_below_start: bool) -> u64 {
        if include_below_start {
            self.segments.iter().map(|s| s.size_bytes).sum()
        } else {
            self.retained_segments().map(|s| s.size_bytes).sum()
        }
    }

    /// The highest fully-archived offset, if anything was ever uploaded.
    #[must_use]
    pub fn highest_archived_offset(&self) -> Option<Offset> {
        self.last_offset
    }

    /// Verifies the manifest's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] describing the first violated
    /// invariant.
    pub fn check_invariants(&self) -> CoreResult<()> {
        if self.archive_start_offset > self.start_offset {
            return Err(CoreError::invalid_format(format!(
                "archive_start_offset {} past start_offset {}",
                self.archive_start_offset, self.start_offset
            )));
        }
        if self.start_offset > self.next_offset() {
            return Err(CoreError::invalid_format(format!(
                "start_offset {} past next offset {}",
                self.start_offset,
                self.next_offset()
            )));
        }
        if let Some(first) = self.segments.first() {
            if self.archive_start_offset != first.base_offset {
                return Err(CoreError::invalid_format(format!(
                    "archive_start_offset {} does not match lowest segment {}",
                    self.archive_start_offset, first.base_offset
                )));
            }
        }
        let mut expected: Option<Offset> = None;
        for meta in &self.segments {
            if meta.last_offset < meta.base_offset {
                return Err(CoreError::invalid_format(format!(
                    "segment range inverted at {}",
                    meta.base_offset
                )));
            }
            if let Some(expected) = expected {
                if meta.base_offset != expected {
                    return Err(CoreError::invalid_format(format!(
                        "segment gap: expected {}, found {}",
                        expected, meta.base_offset
                    )));
                }
            }
            expected = Some(meta.last_offset.next());
        }
        if let (Some(tail), Some(last)) = (self.segments.last(), self.last_offset) {
            if tail.last_offset != last {
                return Err(CoreError::invalid_format(format!(
                    "tail segment ends at {}, last_offset is {}",
                    tail.last_offset, last
                )));
            }
        }
        Ok(())
    }

    /// Encodes the manifest to its persisted JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::invalid_format(e.to_string()))
    }

    /// Decodes a manifest from its persisted JSON document.
    ///
    /// A document without a `segments` field decodes identically to one
    /// with an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the document is malformed.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        serde_json::from_slice(data).map_err(|e| CoreError::invalid_format(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(base: u64, last: u64, size: u64) -> SegmentMeta {
        SegmentMeta {
            base_offset: Offset::new(base),
            last_offset: Offset::new(last),
            size_bytes: size,
            created_at_ms: 1_700_000_000_000,
            term: Term::new(1),
            object_key: format!("0/{base}-1.seg"),
        }
    }

    #[test]
    fn fresh_manifest_accepts_offset_zero() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        assert_eq!(manifest.next_offset(), Offset::new(0));

        manifest.add_segment(meta(0, 9, 100)).unwrap();
        assert_eq!(manifest.last_offset(), Some(Offset::new(9)));
        assert_eq!(manifest.next_offset(), Offset::new(10));
        manifest.check_invariants().unwrap();
    }

    #[test]
    fn add_rejects_gap() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();

        let result = manifest.add_segment(meta(12, 20, 100));
        assert!(matches!(
            result,
            Err(CoreError::OutOfOrderInsert {
                expected: Offset(10),
                actual: Offset(12),
            })
        ));
    }

    #[test]
    fn add_rejects_overlap() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();

        let result = manifest.add_segment(meta(5, 15, 100));
        assert!(matches!(result, Err(CoreError::OutOfOrderInsert { .. })));
    }

    #[test]
    fn add_rejects_inverted_range() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        let result = manifest.add_segment(meta(10, 2, 100));
        assert!(matches!(result, Err(CoreError::InvalidSegment { .. })));
    }

    #[test]
    fn truncate_removes_only_fully_released_segments() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.add_segment(meta(10, 19, 100)).unwrap();
        manifest.add_segment(meta(20, 29, 100)).unwrap();

        let removed = manifest.truncate_to(Offset::new(15));
        // The segment containing offset 15 stays.
        assert_eq!(removed.len(), 1);
        assert_eq!(manifest.segments().len(), 2);
        assert_eq!(manifest.start_offset(), Offset::new(15));
        assert_eq!(manifest.archive_start_offset(), Offset::new(10));
        manifest.check_invariants().unwrap();
    }

    #[test]
    fn full_truncation_preserves_last_offset() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.add_segment(meta(10, 19, 100)).unwrap();

        let removed = manifest.truncate_to(Offset::new(20));
        assert_eq!(removed.len(), 2);
        assert!(manifest.segments().is_empty());
        assert_eq!(manifest.last_offset(), Some(Offset::new(19)));
        assert_eq!(manifest.start_offset(), Offset::new(20));
        assert_eq!(manifest.archive_start_offset(), Offset::new(20));
        manifest.check_invariants().unwrap();
    }

    #[test]
    fn add_continues_after_full_truncation() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.truncate_to(Offset::new(10));

        // An empty-but-initialized manifest is not a fresh one: offset 0
        // no longer continues the log.
        let stale = manifest.add_segment(meta(0, 9, 100));
        assert!(matches!(stale, Err(CoreError::OutOfOrderInsert { .. })));

        manifest.add_segment(meta(10, 19, 100)).unwrap();
        assert_eq!(manifest.cloud_log_size(false), 100);
        assert_eq!(manifest.archive_start_offset(), Offset::new(10));
        manifest.check_invariants().unwrap();
    }

    #[test]
    fn truncate_is_idempotent() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.add_segment(meta(10, 19, 100)).unwrap();

        manifest.truncate_to(Offset::new(10));
        let again = manifest.truncate_to(Offset::new(10));
        assert!(again.is_empty());
        assert_eq!(manifest.start_offset(), Offset::new(10));
    }

    #[test]
    fn truncate_clamps_past_tail() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();

        manifest.truncate_to(Offset::new(500));
        assert_eq!(manifest.start_offset(), Offset::new(10));
        assert_eq!(manifest.archive_start_offset(), Offset::new(10));
        manifest.check_invariants().unwrap();
    }

    #[test]
    fn advance_start_offset_is_metadata_only() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.add_segment(meta(10, 19, 200)).unwrap();

        assert!(manifest.advance_start_offset(Offset::new(10)));
        // Objects still present; only the readable window shrank.
        assert_eq!(manifest.segments().len(), 2);
        assert_eq!(manifest.archive_start_offset(), Offset::new(0));
        assert_eq!(manifest.cloud_log_size(true), 300);
        assert_eq!(manifest.cloud_log_size(false), 200);
        manifest.check_invariants().unwrap();
    }

    #[test]
    fn advance_start_offset_never_regresses() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.advance_start_offset(Offset::new(5));

        assert!(!manifest.advance_start_offset(Offset::new(3)));
        assert_eq!(manifest.start_offset(), Offset::new(5));
    }

    #[test]
    fn segments_below_boundary() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.add_segment(meta(10, 19, 100)).unwrap();

        let below = manifest.segments_below(Offset::new(10));
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].base_offset, Offset::new(0));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut manifest = PartitionManifest::new(PartitionId::new(3));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.add_segment(meta(10, 19, 250)).unwrap();
        manifest.advance_start_offset(Offset::new(10));
        manifest.stamp_commit(7, FencingToken::new(2));

        let encoded = manifest.encode().unwrap();
        let decoded = PartitionManifest::decode(&encoded).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn decode_treats_missing_segments_as_empty() {
        let doc = br#"{
            "partition": 0,
            "version": 4,
            "fencing_token": 2,
            "start_offset": 20,
            "last_offset": 19,
            "archive_start_offset": 20
        }"#;
        let manifest = PartitionManifest::decode(doc).unwrap();
        assert!(manifest.segments().is_empty());
        assert_eq!(manifest.last_offset(), Some(Offset::new(19)));
        assert_eq!(manifest.next_offset(), Offset::new(20));
    }

    #[test]
    fn fully_truncated_manifest_serializes_without_segments_field() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        manifest.truncate_to(Offset::new(10));

        let encoded = manifest.encode().unwrap();
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(!text.contains("\"segments\""));
        assert!(text.contains("\"last_offset\":9"));

        let decoded = PartitionManifest::decode(&encoded).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(PartitionManifest::decode(b"not json").is_err());
    }

    #[test]
    fn invariant_check_catches_gap() {
        let mut manifest = PartitionManifest::new(PartitionId::new(0));
        manifest.add_segment(meta(0, 9, 100)).unwrap();
        let mut doc: serde_json::Value =
            serde_json::from_slice(&manifest.encode().unwrap()).unwrap();
        doc["segments"][0]["base_offset"] = 3.into();

        let broken = PartitionManifest::decode(doc.to_string().as_bytes()).unwrap();
        assert!(broken.check_invariants().is_err());
    }
}
