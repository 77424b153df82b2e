//! Per-frame bookkeeping of which owner occupies which range of the shared
//! position/result buffers.

use crate::id::{Frame, OwnerKey};
use crate::point::QueryPoint;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// A contiguous, inclusive index range `[start, end]` owned by one owner.
///
/// The range holds the owner's query points followed by two samples per
/// normal probe (`+dx` then `+dz`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    /// Inclusive.
    pub end: usize,
    /// Normal probes packed after the query points.
    pub normal_probes: usize,
    /// Frame of the owner's most recent registration.
    pub last_frame: Frame,
}

impl Segment {
    /// A segment of `len` entries starting at `start`. `len` must be non-zero.
    pub fn new(start: usize, len: usize, normal_probes: usize, last_frame: Frame) -> Self {
        debug_assert!(len > 0, "segments cannot be empty");
        Self {
            start,
            end: start + len - 1,
            normal_probes,
            last_frame,
        }
    }

    /// Total entries, query points plus probe samples.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Number of plain query points at the front of the segment.
    pub fn point_count(&self) -> usize {
        self.len() - 2 * self.normal_probes
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end + 1
    }

    /// Ring advances since the last registration.
    pub fn age(&self, frame: Frame) -> Frame {
        frame.saturating_sub(self.last_frame)
    }

    /// Same length, new start.
    pub fn relocated(&self, start: usize) -> Self {
        Self {
            start,
            end: start + self.len() - 1,
            ..*self
        }
    }

    /// Renewed in place by a same-sized registration.
    pub fn refreshed(&self, frame: Frame, normal_probes: usize) -> Self {
        Self {
            last_frame: frame,
            normal_probes,
            ..*self
        }
    }
}

/// Owner to segment mapping, ordered by key for deterministic iteration.
pub type SegmentMap = BTreeMap<OwnerKey, Segment>;

// ---------------------------------------------------------------------------
// SegmentRegistrar
// ---------------------------------------------------------------------------

/// One ring slot: the owner mapping for one frame plus the write cursor
/// into the shared buffers.
///
/// The mapping is reference-counted so readback requests can keep a cheap
/// snapshot of it; later registrations copy on write.
#[derive(Debug, Clone, Default)]
pub struct SegmentRegistrar {
    segments: Arc<SegmentMap>,
    query_count: usize,
}

impl SegmentRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &SegmentMap {
        &self.segments
    }

    /// A shared snapshot of the mapping as it is right now.
    pub fn share(&self) -> Arc<SegmentMap> {
        Arc::clone(&self.segments)
    }

    pub fn get(&self, owner: OwnerKey) -> Option<&Segment> {
        self.segments.get(&owner)
    }

    pub fn owner_count(&self) -> usize {
        self.segments.len()
    }

    /// One past the highest index in use.
    pub fn query_count(&self) -> usize {
        self.query_count
    }

    /// Insert or replace an owner's segment, growing the write cursor to
    /// cover it. A replaced range is left as a gap until the next compaction.
    pub(crate) fn insert(&mut self, owner: OwnerKey, segment: Segment) {
        self.query_count = self.query_count.max(segment.end + 1);
        Arc::make_mut(&mut self.segments).insert(owner, segment);
    }

    pub(crate) fn clear(&mut self) {
        self.segments = Arc::new(SegmentMap::new());
        self.query_count = 0;
    }

    /// Rebuild this registrar from `previous`, keeping only owners whose age
    /// at `frame` is below `max_age`. Survivors are packed gap-free in their
    /// original order and their positions are moved along with them.
    ///
    /// Returns the number of owners dropped.
    pub(crate) fn compact_from(
        &mut self,
        previous: &SegmentMap,
        frame: Frame,
        max_age: Frame,
        positions: &mut [QueryPoint],
    ) -> usize {
        let mut survivors: Vec<(OwnerKey, Segment)> = previous
            .iter()
            .filter(|(_, segment)| segment.age(frame) < max_age)
            .map(|(owner, segment)| (*owner, *segment))
            .collect();
        let dropped = previous.len() - survivors.len();

        // Moving in ascending start order only ever copies downwards, so a
        // source range is never overwritten before it is read.
        survivors.sort_by_key(|(_, segment)| segment.start);

        let mut map = SegmentMap::new();
        let mut cursor = 0;
        for (owner, segment) in survivors {
            let moved = segment.relocated(cursor);
            if moved.start != segment.start && segment.end < positions.len() {
                positions.copy_within(segment.range(), moved.start);
            }
            cursor = moved.end + 1;
            map.insert(owner, moved);
        }

        self.segments = Arc::new(map);
        self.query_count = cursor;
        dropped
    }
}

// ===========================================================================
// Tests
// ===========================================================================
