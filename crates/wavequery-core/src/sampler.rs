//! Single-point convenience wrappers over [`QueryEngine`].
//!
//! A sampler registers its one point each time it is sampled and reads back
//! whatever the engine last promoted for it. Dispatch and readback still
//! happen once per frame for the whole engine, so the first samples of a new
//! sampler return `None` until its data has made the round trip.
//!
//! Sampling the same sampler twice in one engine frame is almost always a
//! caller bug; debug builds log it unless the sampler opts out.

use crate::device::ComputeDevice;
use crate::engine::{QueryEngine, QueryKind};
use crate::id::{Frame, OwnerKey};
use glam::{Vec2, Vec3};

// ---------------------------------------------------------------------------
// Frame guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct FrameGuard {
    last_frame: Option<Frame>,
    allow_multiple: bool,
    repeated: bool,
}

impl FrameGuard {
    /// Record a sample in `frame`. Returns true if this sampler already
    /// sampled in the same frame without opting out.
    fn check(&mut self, owner: OwnerKey, frame: Frame) -> bool {
        self.repeated = !self.allow_multiple && self.last_frame == Some(frame);
        if cfg!(debug_assertions) && self.repeated {
            log::warn!("{owner} sampled more than once in frame {frame}");
        }
        self.last_frame = Some(frame);
        self.repeated
    }
}

fn kind_matches<D: ComputeDevice>(engine: &QueryEngine<D>, expected: QueryKind, owner: OwnerKey) -> bool {
    if engine.kind() == expected {
        return true;
    }
    log::warn!(
        "{owner}: {expected} sampler used with a {} engine",
        engine.kind()
    );
    false
}

// ---------------------------------------------------------------------------
// Height
// ---------------------------------------------------------------------------

/// Surface state under one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightSample {
    /// Sea level plus vertical displacement.
    pub height: f32,
    pub displacement: Vec3,
    pub normal: Vec3,
    /// `None` until two snapshots hold this sampler's data.
    pub velocity: Option<Vec3>,
}

/// Samples height, normal and surface velocity from a displacement engine.
#[derive(Debug, Clone)]
pub struct HeightSampler {
    owner: OwnerKey,
    min_feature_size: f32,
    guard: FrameGuard,
}

impl HeightSampler {
    pub fn new(owner: OwnerKey, min_feature_size: f32) -> Self {
        Self {
            owner,
            min_feature_size,
            guard: FrameGuard::default(),
        }
    }

    /// Silence the once-per-frame check.
    pub fn allow_multiple_calls_per_frame(mut self, allow: bool) -> Self {
        self.guard.allow_multiple = allow;
        self
    }

    /// Whether the latest sample repeated one already taken this frame.
    pub fn sampled_twice_this_frame(&self) -> bool {
        self.guard.repeated
    }

    pub fn owner(&self) -> OwnerKey {
        self.owner
    }

    pub fn sample<D: ComputeDevice>(
        &mut self,
        engine: &mut QueryEngine<D>,
        position: Vec3,
    ) -> Option<HeightSample> {
        self.guard.check(self.owner, engine.frame());
        if !kind_matches(engine, QueryKind::Displacement, self.owner) {
            return None;
        }
        let point = [position];
        engine
            .update_query_points(self.owner, self.min_feature_size, &point, Some(&point))
            .ok()?;

        let mut displacement = [Vec3::ZERO];
        let mut height = [0.0];
        let mut normal = [Vec3::Y];
        engine
            .retrieve_results(
                self.owner,
                Some(&mut displacement),
                Some(&mut height),
                Some(&mut normal),
            )
            .ok()?;

        let mut rate = [Vec3::ZERO];
        let velocity = engine
            .calculate_velocities(self.owner, &mut rate)
            .ok()
            .map(|()| rate[0]);

        Some(HeightSample {
            height: height[0],
            displacement: displacement[0],
            normal: normal[0],
            velocity,
        })
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Samples horizontal flow velocity from a flow engine.
#[derive(Debug, Clone)]
pub struct FlowSampler {
    owner: OwnerKey,
    min_feature_size: f32,
    guard: FrameGuard,
}

impl FlowSampler {
    pub fn new(owner: OwnerKey, min_feature_size: f32) -> Self {
        Self {
            owner,
            min_feature_size,
            guard: FrameGuard::default(),
        }
    }

    pub fn allow_multiple_calls_per_frame(mut self, allow: bool) -> Self {
        self.guard.allow_multiple = allow;
        self
    }

    pub fn sampled_twice_this_frame(&self) -> bool {
        self.guard.repeated
    }

    /// Flow in the horizontal plane, `x` and `z` mapped to the vector's
    /// `x` and `y`.
    pub fn sample<D: ComputeDevice>(
        &mut self,
        engine: &mut QueryEngine<D>,
        position: Vec3,
    ) -> Option<Vec2> {
        self.guard.check(self.owner, engine.frame());
        if !kind_matches(engine, QueryKind::Flow, self.owner) {
            return None;
        }
        engine
            .update_query_points(self.owner, self.min_feature_size, &[position], None)
            .ok()?;
        let mut flow = [Vec3::ZERO];
        engine
            .retrieve_results(self.owner, Some(&mut flow), None, None)
            .ok()?;
        Some(Vec2::new(flow[0].x, flow[0].z))
    }
}

// ---------------------------------------------------------------------------
// Depth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSample {
    /// Distance from the surface at rest down to the sea floor.
    pub water_depth: f32,
    /// Signed horizontal distance to the nearest shoreline.
    pub shoreline_distance: f32,
}

/// Samples water depth and shoreline distance from a depth engine.
#[derive(Debug, Clone)]
pub struct DepthSampler {
    owner: OwnerKey,
    guard: FrameGuard,
}

impl DepthSampler {
    pub fn new(owner: OwnerKey) -> Self {
        Self {
            owner,
            guard: FrameGuard::default(),
        }
    }

    pub fn allow_multiple_calls_per_frame(mut self, allow: bool) -> Self {
        self.guard.allow_multiple = allow;
        self
    }

    pub fn sampled_twice_this_frame(&self) -> bool {
        self.guard.repeated
    }

    pub fn sample<D: ComputeDevice>(
        &mut self,
        engine: &mut QueryEngine<D>,
        position: Vec3,
    ) -> Option<DepthSample> {
        self.guard.check(self.owner, engine.frame());
        if !kind_matches(engine, QueryKind::Depth, self.owner) {
            return None;
        }
        // Depth data does not vary with feature size.
        engine
            .update_query_points(self.owner, 0.0, &[position], None)
            .ok()?;
        let mut depth = [Vec3::ZERO];
        engine
            .retrieve_results(self.owner, Some(&mut depth), None, None)
            .ok()?;
        Some(DepthSample {
            water_depth: depth[0].x,
            shoreline_distance: depth[0].y,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
