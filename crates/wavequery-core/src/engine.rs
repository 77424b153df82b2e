//! The query engine: multiplexes every owner's points into shared device
//! buffers and correlates delayed readbacks with the owners that asked.
//!
//! # Architecture
//!
//! A `QueryEngine` owns:
//! - The host-side position buffer, sized to `max_query_count`
//! - A [`SegmentRing`] of per-frame owner registrations
//! - The in-flight [`ReadbackRequest`] list, oldest first
//! - A [`SnapshotPair`] of promoted results (current and previous)
//! - The receiving end of the bounded readback completion channel
//! - The [`ComputeDevice`] that evaluates the kernel
//!
//! # Completion Handling
//!
//! Devices report readbacks as messages. [`QueryEngine::poll_completions`]
//! drains them on the engine's thread; for every message it drops failed
//! requests, finds the newest completed request, promotes its results and
//! retires every request up to it in submission order. Results older than
//! the current snapshot are therefore never promoted, however the
//! notifications race.

use crate::clock::FrameClock;
use crate::config::{ConfigError, QueryConfig};
use crate::device::{ComputeDevice, ReadbackEvent, ReadbackNotifier, ReadbackOutcome};
use crate::error::{RegisterError, RetrieveError, VelocityError};
use crate::id::{Frame, OwnerKey, TransferId};
use crate::point::QueryPoint;
use crate::ring::SegmentRing;
use crate::segment::{Segment, SegmentMap};
use crate::snapshot::{ResultSnapshot, SnapshotPair};
use crate::status::QueryStatus;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};

// ---------------------------------------------------------------------------
// Query kind
// ---------------------------------------------------------------------------

/// Which surface quantity an engine instance answers. Each kind has its own
/// engine and therefore its own owner key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    /// Surface displacement; `y` is the height offset from sea level.
    Displacement,
    /// Horizontal flow velocity in `x` and `z`.
    Flow,
    /// Water depth in `x`, distance to shoreline in `y`.
    Depth,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Displacement => "displacement",
            QueryKind::Flow => "flow",
            QueryKind::Depth => "depth",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Readback requests
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum RequestState {
    Pending,
    Completed(Vec<Vec3>),
    Failed,
}

/// A readback that has been sent but not yet retired.
#[derive(Debug)]
struct ReadbackRequest {
    transfer: TransferId,
    /// Simulation time the posted positions belong to.
    data_timestamp: f32,
    /// Owner mapping at send time.
    segments: Arc<SegmentMap>,
    /// Whether sending this request advanced the ring, i.e. whether retiring
    /// it frees a ring slot.
    owns_slot: bool,
    state: RequestState,
}

// ---------------------------------------------------------------------------
// QueryEngine
// ---------------------------------------------------------------------------

/// Multiplexes every owner's query points onto one [`ComputeDevice`].
pub struct QueryEngine<D> {
    kind: QueryKind,
    config: QueryConfig,
    device: D,

    /// Advances once per `send_read_back`; registrations are stamped with it.
    frame: Frame,
    clock: FrameClock,

    positions: Vec<QueryPoint>,
    ring: SegmentRing,
    requests: Vec<ReadbackRequest>,
    /// Ring slots of evicted requests, freed by the next completion.
    orphaned_slots: usize,
    next_transfer: u64,
    snapshots: SnapshotPair,

    events_tx: SyncSender<ReadbackEvent>,
    events_rx: Receiver<ReadbackEvent>,

    /// Cleared by `cleanup`. Completions arriving afterwards are discarded.
    allocated: bool,
}

impl<D: ComputeDevice> QueryEngine<D> {
    /// Create a displacement engine.
    pub fn new(config: QueryConfig, device: D) -> Result<Self, ConfigError> {
        Self::with_kind(QueryKind::Displacement, config, device)
    }

    /// Create an engine answering `kind` queries.
    pub fn with_kind(kind: QueryKind, config: QueryConfig, device: D) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::sync_channel(config.completion_queue_capacity());
        log::debug!(
            "{kind} query engine: {} queries, ring of {}",
            config.max_query_count,
            config.ring_capacity()
        );
        Ok(Self {
            kind,
            positions: vec![QueryPoint::default(); config.max_query_count],
            ring: SegmentRing::new(config.ring_capacity()),
            config,
            device,
            frame: 0,
            clock: FrameClock::new(),
            requests: Vec::new(),
            orphaned_slots: 0,
            next_transfer: 0,
            snapshots: SnapshotPair::new(),
            events_tx,
            events_rx,
            allocated: true,
        })
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register `points` for `owner` in the current ring slot.
    ///
    /// Each entry of `normal_probes` adds two samples offset by
    /// `finite_diff_dx` in x and z; probe `i` is centred on `points[i]`.
    ///
    /// If the owner already holds a segment of exactly the same size it is
    /// reused in place. Otherwise a new range is appended at the write
    /// cursor and the old one, if any, becomes a gap until the next ring
    /// advance compacts it away. While the ring is stalled only owners
    /// already in the held slot are accepted. On error nothing is changed.
    pub fn update_query_points(
        &mut self,
        owner: OwnerKey,
        min_feature_size: f32,
        points: &[Vec3],
        normal_probes: Option<&[Vec3]>,
    ) -> Result<(), RegisterError> {
        if !self.allocated {
            return Err(RegisterError::Released);
        }
        let probes = normal_probes.unwrap_or(&[]);
        if probes.len() > points.len() {
            return Err(RegisterError::TooManyNormalProbes {
                probes: probes.len(),
                points: points.len(),
            });
        }
        let total = points.len() + 2 * probes.len();
        if total == 0 {
            return Err(RegisterError::Empty);
        }

        let stalled = self.ring.is_stalled();
        let registrar = self.ring.current_mut();
        let existing = registrar.get(owner).copied();
        if existing.is_none() && stalled {
            log::warn!(
                "{} queries: {owner} rejected, segment ring exhausted",
                self.kind
            );
            return Err(RegisterError::RingExhausted);
        }
        let segment = match existing {
            Some(segment) if segment.len() == total => segment.refreshed(self.frame, probes.len()),
            _ => {
                let in_use = registrar.query_count();
                if in_use + total > self.config.max_query_count {
                    log::warn!(
                        "{} queries: {owner} asked for {total} points with {in_use} of {} in use",
                        self.kind,
                        self.config.max_query_count
                    );
                    return Err(RegisterError::CapacityExceeded {
                        in_use,
                        requested: total,
                        max: self.config.max_query_count,
                    });
                }
                if existing.is_none() && registrar.owner_count() >= self.config.max_owners {
                    log::warn!(
                        "{} queries: {owner} rejected, {} owners already registered",
                        self.kind,
                        registrar.owner_count()
                    );
                    return Err(RegisterError::TooManyOwners {
                        max: self.config.max_owners,
                    });
                }
                Segment::new(in_use, total, probes.len(), self.frame)
            }
        };
        registrar.insert(owner, segment);

        let dx = self.config.finite_diff_dx;
        let slots = &mut self.positions[segment.range()];
        let (point_slots, probe_slots) = slots.split_at_mut(points.len());
        for (slot, point) in point_slots.iter_mut().zip(points) {
            *slot = QueryPoint::from_world(*point, min_feature_size);
        }
        for (pair, probe) in probe_slots.chunks_exact_mut(2).zip(probes) {
            let centre = QueryPoint::from_world(*probe, min_feature_size);
            pair[0] = centre.offset(dx, 0.0);
            pair[1] = centre.offset(0.0, dx);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Per-frame driver
    // -----------------------------------------------------------------------

    /// Start of the per-frame driver work: record the frame time, let the
    /// device progress, drain completions and dispatch the registered points.
    pub fn update_queries(&mut self, clock: &FrameClock) {
        self.clock = *clock;
        self.device.maintain();
        self.poll_completions();
        self.execute_queries();
    }

    /// Post the populated prefix of the position buffer to the device. A
    /// no-op when nothing is registered.
    pub fn execute_queries(&mut self) {
        if !self.allocated {
            return;
        }
        let count = self.ring.current().query_count();
        if count > 0 {
            self.device.dispatch(&self.positions[..count]);
        }
    }

    /// Request a readback of this frame's results and advance the ring.
    ///
    /// If the in-flight cap is reached the oldest request is dropped. If the
    /// ring is exhausted the request is still sent, but the current slot
    /// stays current and refuses new owners until a slot is released.
    pub fn send_read_back(&mut self) {
        if !self.allocated {
            return;
        }
        let frame = self.frame;
        self.frame += 1;

        let count = self.ring.current().query_count();
        if count == 0 {
            return;
        }

        while self.requests.len() >= self.config.max_in_flight {
            let evicted = self.requests.remove(0);
            if evicted.owns_slot {
                self.orphaned_slots += 1;
            }
            log::debug!(
                "{} queries: evicted {} from a full in-flight list",
                self.kind,
                evicted.transfer
            );
        }

        let transfer = TransferId(self.next_transfer);
        self.next_transfer += 1;
        self.device.request_readback(
            count,
            ReadbackNotifier::new(transfer, self.events_tx.clone()),
        );

        let segments = self.ring.current().share();
        let owns_slot = self
            .ring
            .advance(frame, self.config.max_registration_age, &mut self.positions)
            .is_ok();

        self.requests.push(ReadbackRequest {
            transfer,
            data_timestamp: self.clock.data_timestamp(),
            segments,
            owns_slot,
            state: RequestState::Pending,
        });
    }

    /// Drain every readback message the device has sent so far.
    pub fn poll_completions(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            if !self.allocated {
                continue;
            }
            let Some(request) = self
                .requests
                .iter_mut()
                .find(|r| r.transfer == event.transfer)
            else {
                log::debug!(
                    "{} queries: ignoring {} (already retired)",
                    self.kind,
                    event.transfer
                );
                continue;
            };
            request.state = match event.outcome {
                ReadbackOutcome::Completed(results) => RequestState::Completed(results),
                ReadbackOutcome::Failed => RequestState::Failed,
            };
            self.data_arrived();
        }
        if !self.allocated {
            self.requests.clear();
        }
    }

    fn data_arrived(&mut self) {
        let mut freed = 0;
        let kind = self.kind;
        self.requests.retain(|request| {
            if matches!(request.state, RequestState::Failed) {
                log::warn!("{kind} queries: readback {} failed", request.transfer);
                freed += usize::from(request.owns_slot);
                false
            } else {
                true
            }
        });

        let newest = self
            .requests
            .iter()
            .rposition(|r| matches!(r.state, RequestState::Completed(_)));
        if let Some(index) = newest {
            let retired: Vec<ReadbackRequest> = self.requests.drain(..=index).collect();
            freed += retired.iter().filter(|r| r.owns_slot).count();
            freed += std::mem::take(&mut self.orphaned_slots);

            if let Some(request) = retired.into_iter().next_back() {
                if let RequestState::Completed(results) = request.state {
                    self.snapshots.promote(ResultSnapshot::new(
                        request.data_timestamp,
                        request.segments,
                        results,
                    ));
                }
            }
        }

        for _ in 0..freed {
            if let Err(err) = self.ring.release() {
                log::error!("{} queries: {err}", self.kind);
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Copy the owner's results from the current snapshot.
    ///
    /// `displacements` and `heights` receive one entry per query point,
    /// heights being `sea_level + y`. `normals` receives one entry per
    /// normal probe. Outputs may be shorter than what is available but not
    /// longer. On error no output is written.
    pub fn retrieve_results(
        &self,
        owner: OwnerKey,
        displacements: Option<&mut [Vec3]>,
        heights: Option<&mut [f32]>,
        normals: Option<&mut [Vec3]>,
    ) -> Result<(), RetrieveError> {
        let current = self.snapshots.current();
        let segment = current
            .segment(owner)
            .ok_or(RetrieveError::UnknownOwner(owner))?;
        let data = current
            .slice(segment)
            .ok_or(RetrieveError::MissingData(owner))?;
        let point_count = segment.point_count();

        let check = |output: &'static str, requested: usize, available: usize| {
            if requested > available {
                Err(RetrieveError::OutputTooLong {
                    output,
                    requested,
                    available,
                })
            } else {
                Ok(())
            }
        };
        check(
            "displacement",
            displacements.as_ref().map_or(0, |d| d.len()),
            point_count,
        )?;
        check("height", heights.as_ref().map_or(0, |h| h.len()), point_count)?;
        check(
            "normal",
            normals.as_ref().map_or(0, |n| n.len()),
            segment.normal_probes,
        )?;

        if let Some(out) = displacements {
            out.copy_from_slice(&data[..out.len()]);
        }
        if let Some(out) = heights {
            for (height, result) in out.iter_mut().zip(data) {
                *height = self.config.sea_level + result.y;
            }
        }
        if let Some(out) = normals {
            let dx = self.config.finite_diff_dx;
            let probes = &data[point_count..];
            for (i, normal) in out.iter_mut().enumerate() {
                let centre = data[i];
                let tangent_x = Vec3::new(dx, 0.0, 0.0) + probes[2 * i] - centre;
                let tangent_z = Vec3::new(0.0, 0.0, dx) + probes[2 * i + 1] - centre;
                *normal = tangent_z.cross(tangent_x).try_normalize().unwrap_or(Vec3::Y);
            }
        }
        Ok(())
    }

    /// Finite-difference the owner's results between the previous and
    /// current snapshots. Fills `velocities` only on success.
    pub fn calculate_velocities(
        &self,
        owner: OwnerKey,
        velocities: &mut [Vec3],
    ) -> Result<(), VelocityError> {
        let current = self.snapshots.current();
        let previous = self.snapshots.previous();
        let (Some(now), Some(before)) = (current.timestamp(), previous.timestamp()) else {
            return Err(VelocityError::NotEnoughData);
        };
        let segment = current
            .segment(owner)
            .ok_or(VelocityError::UnknownOwner(owner))?;
        let last = previous
            .segment(owner)
            .ok_or(VelocityError::NotEnoughData)?;
        if segment.len() != last.len() || segment.normal_probes != last.normal_probes {
            return Err(VelocityError::ShapeChanged {
                previous: last.len(),
                current: segment.len(),
            });
        }

        let dt = now - before;
        if dt < self.config.min_velocity_dt {
            return Err(VelocityError::InvalidDt { dt });
        }

        let (Some(a), Some(b)) = (current.slice(segment), previous.slice(last)) else {
            return Err(VelocityError::MissingData);
        };
        // Probe samples trail the points and are not velocities.
        let count = segment.point_count();
        if velocities.len() > count {
            return Err(VelocityError::OutputTooLong {
                requested: velocities.len(),
                available: count,
            });
        }
        let (a, b) = (&a[..count], &b[..count]);
        for ((velocity, current), previous) in velocities.iter_mut().zip(a).zip(b) {
            *velocity = (*current - *previous) / dt;
        }
        Ok(())
    }

    /// Register, retrieve and optionally differentiate in one call.
    ///
    /// Normals are computed when `normals` is given, using the query points
    /// themselves as probes. The result is `OK` only if every step
    /// succeeded.
    pub fn query(
        &mut self,
        owner: OwnerKey,
        min_feature_size: f32,
        points: &[Vec3],
        displacements: Option<&mut [Vec3]>,
        normals: Option<&mut [Vec3]>,
        velocities: Option<&mut [Vec3]>,
    ) -> QueryStatus {
        let mut status = QueryStatus::OK;

        let probes = normals.is_some().then_some(points);
        if self
            .update_query_points(owner, min_feature_size, points, probes)
            .is_err()
        {
            status |= QueryStatus::POST_FAILED;
        }
        if self
            .retrieve_results(owner, displacements, None, normals)
            .is_err()
        {
            status |= QueryStatus::RETRIEVE_FAILED;
        }
        if let Some(out) = velocities {
            if let Err(err) = self.calculate_velocities(owner, out) {
                status |= err.status();
            }
        }
        status
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Release device buffers and forget all registrations, requests and
    /// results. Completions that arrive later are discarded.
    pub fn cleanup(&mut self) {
        if !self.allocated {
            return;
        }
        self.allocated = false;
        self.device.release();
        self.requests.clear();
        self.orphaned_slots = 0;
        self.ring.reset();
        self.snapshots.clear();
        self.positions = Vec::new();
        self.poll_completions();
        log::debug!("{} query engine released", self.kind);
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Resize the shared buffers. Does nothing if `max_query_count` is
    /// unchanged. Shrinking below the current high-water mark drops every
    /// registration; owners re-register on their next query.
    pub fn set_max_query_count(&mut self, max_query_count: usize) -> Result<(), ConfigError> {
        if max_query_count == self.config.max_query_count {
            return Ok(());
        }
        if max_query_count == 0 {
            return Err(ConfigError::Zero {
                field: "max_query_count",
            });
        }
        self.config.max_query_count = max_query_count;
        if !self.allocated {
            return Ok(());
        }
        self.positions.resize(max_query_count, QueryPoint::default());

        if self.ring.current().query_count() > max_query_count {
            log::info!(
                "{} queries: capacity shrunk to {max_query_count}, dropping registrations",
                self.kind
            );
            self.ring.reset();
            for request in &mut self.requests {
                request.owns_slot = false;
            }
            self.orphaned_slots = 0;
        }
        Ok(())
    }

    pub fn set_sea_level(&mut self, sea_level: f32) {
        self.config.sea_level = sea_level;
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn sea_level(&self) -> f32 {
        self.config.sea_level
    }

    /// Number of `send_read_back` calls so far.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// Write cursor of the current registrar.
    pub fn query_count(&self) -> usize {
        self.ring.current().query_count()
    }

    pub fn owner_count(&self) -> usize {
        self.ring.current().owner_count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.requests.len()
    }

    /// Transfers still awaiting a result, oldest first.
    pub fn in_flight_transfers(&self) -> Vec<TransferId> {
        self.requests.iter().map(|r| r.transfer).collect()
    }

    pub fn ring(&self) -> &SegmentRing {
        &self.ring
    }

    pub fn snapshots(&self) -> &SnapshotPair {
        &self.snapshots
    }

    /// The owner's segment in the current (writable) registrar.
    pub fn current_segment(&self, owner: OwnerKey) -> Option<Segment> {
        self.ring.current().get(owner).copied()
    }

    /// The owner's segment in the current result snapshot.
    pub fn result_segment(&self, owner: OwnerKey) -> Option<Segment> {
        self.snapshots.current().segment(owner).copied()
    }

    /// The populated prefix of the position buffer.
    pub fn positions(&self) -> &[QueryPoint] {
        let count = self.ring.current().query_count().min(self.positions.len());
        &self.positions[..count]
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D> fmt::Debug for QueryEngine<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEngine")
            .field("kind", &self.kind)
            .field("frame", &self.frame)
            .field("query_count", &self.ring.current().query_count())
            .field("in_flight", &self.requests.len())
            .field("allocated", &self.allocated)
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
