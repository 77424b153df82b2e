//! Fixed pool of segment registrars addressed by modulo index.
//!
//! The slot at the acquire cursor is the current, writable registrar. Slots
//! from the release cursor up to (not including) the acquire cursor belong
//! to readbacks that have been sent but not yet resolved. When both cursors
//! are equal nothing is in flight.
//!
//! Acquiring a new slot copies the still-fresh registrations forward, so an
//! owner's query persists across frames without being re-issued.

use crate::error::RingError;
use crate::id::Frame;
use crate::point::QueryPoint;
use crate::segment::SegmentRegistrar;

#[derive(Debug)]
pub struct SegmentRing {
    registrars: Vec<SegmentRegistrar>,
    acquire: usize,
    release: usize,
    /// Set while advances are being refused, so exhaustion logs once.
    exhausted: bool,
}

impl SegmentRing {
    /// Create a ring with `capacity` slots. A capacity below 2 is clamped to 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            registrars: (0..capacity).map(|_| SegmentRegistrar::new()).collect(),
            acquire: 0,
            release: 0,
            exhausted: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.registrars.len()
    }

    pub fn acquire_index(&self) -> usize {
        self.acquire
    }

    pub fn release_index(&self) -> usize {
        self.release
    }

    /// The registrar new registrations go into.
    pub fn current(&self) -> &SegmentRegistrar {
        &self.registrars[self.acquire]
    }

    pub(crate) fn current_mut(&mut self) -> &mut SegmentRegistrar {
        &mut self.registrars[self.acquire]
    }

    /// Slots awaiting release.
    pub fn awaiting_release(&self) -> usize {
        (self.acquire + self.capacity() - self.release) % self.capacity()
    }

    /// Whether the next advance would collide with the release cursor.
    pub fn is_exhausted(&self) -> bool {
        (self.acquire + 1) % self.capacity() == self.release
    }

    /// Whether the last advance was refused and no slot has been freed since.
    /// The current slot is then held and only its existing owners may
    /// refresh.
    pub fn is_stalled(&self) -> bool {
        self.exhausted && self.is_exhausted()
    }

    /// Move the acquire cursor forward, compacting the fresh registrations of
    /// the old slot into the new one. Returns the number of owners aged out.
    ///
    /// On exhaustion the cursor stays put and the current registrar keeps
    /// collecting registrations.
    pub fn advance(
        &mut self,
        frame: Frame,
        max_age: Frame,
        positions: &mut [QueryPoint],
    ) -> Result<usize, RingError> {
        if self.is_exhausted() {
            if !self.exhausted {
                log::warn!(
                    "segment ring exhausted: {} slots awaiting readback; new registrations are \
                     held in the current slot until a readback completes",
                    self.awaiting_release()
                );
                self.exhausted = true;
            }
            return Err(RingError::Exhausted {
                capacity: self.capacity(),
            });
        }
        if self.exhausted {
            log::info!("segment ring recovered from exhaustion");
            self.exhausted = false;
        }

        let next = (self.acquire + 1) % self.capacity();
        let previous = self.registrars[self.acquire].share();
        let dropped = self.registrars[next].compact_from(&previous, frame, max_age, positions);
        self.acquire = next;

        if dropped > 0 {
            log::debug!("aged out {dropped} query owners at frame {frame}");
        }
        Ok(dropped)
    }

    /// Free the oldest slot awaiting a readback.
    pub fn release(&mut self) -> Result<(), RingError> {
        if self.release == self.acquire {
            return Err(RingError::NothingToRelease);
        }
        self.release = (self.release + 1) % self.capacity();
        Ok(())
    }

    /// Drop every registration and rewind both cursors.
    pub fn reset(&mut self) {
        for registrar in &mut self.registrars {
            registrar.clear();
        }
        self.acquire = 0;
        self.release = 0;
        self.exhausted = false;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
