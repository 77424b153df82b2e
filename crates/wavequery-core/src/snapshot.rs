//! Promoted readback results, double-buffered for finite differencing.

use crate::id::OwnerKey;
use crate::segment::{Segment, SegmentMap};
use glam::Vec3;
use std::sync::Arc;

/// One completed readback: when its data was posted, which owner holds which
/// range, and the flat result array.
#[derive(Debug, Clone, Default)]
pub struct ResultSnapshot {
    timestamp: Option<f32>,
    segments: Arc<SegmentMap>,
    results: Vec<Vec3>,
}

impl ResultSnapshot {
    pub fn new(timestamp: f32, segments: Arc<SegmentMap>, results: Vec<Vec3>) -> Self {
        Self {
            timestamp: Some(timestamp),
            segments,
            results,
        }
    }

    /// `None` until a readback has been promoted into this slot.
    pub fn timestamp(&self) -> Option<f32> {
        self.timestamp
    }

    pub fn segments(&self) -> &SegmentMap {
        &self.segments
    }

    pub fn segment(&self, owner: OwnerKey) -> Option<&Segment> {
        self.segments.get(&owner)
    }

    pub fn results(&self) -> &[Vec3] {
        &self.results
    }

    /// The results covered by `segment`, or `None` if the array is too short.
    pub fn slice(&self, segment: &Segment) -> Option<&[Vec3]> {
        self.results.get(segment.range())
    }
}

/// The current and previous snapshots.
#[derive(Debug, Default)]
pub struct SnapshotPair {
    current: ResultSnapshot,
    previous: ResultSnapshot,
}

impl SnapshotPair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &ResultSnapshot {
        &self.current
    }

    pub fn previous(&self) -> &ResultSnapshot {
        &self.previous
    }

    /// Make `snapshot` current and demote the old current to previous.
    pub fn promote(&mut self, snapshot: ResultSnapshot) {
        self.previous = std::mem::replace(&mut self.current, snapshot);
    }

    pub fn clear(&mut self) {
        self.current = ResultSnapshot::default();
        self.previous = ResultSnapshot::default();
    }
}
