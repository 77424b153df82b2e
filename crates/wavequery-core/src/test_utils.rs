//! Shared fixtures for unit, integration and property tests.
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for downstream test crates.

use crate::clock::FrameClock;
use crate::config::QueryConfig;
use crate::device::{ComputeDevice, CpuDevice};
use crate::engine::QueryEngine;
use crate::id::OwnerKey;
use crate::point::QueryPoint;
use glam::Vec3;
use std::cell::Cell;
use std::rc::Rc;

/// Frame length used by [`run_frame`].
pub const DT: f32 = 1.0 / 60.0;

/// A deterministic kernel: `(x, x + z, z)` for a point at `(x, z)`.
pub fn linear_kernel(query: &QueryPoint) -> Vec3 {
    Vec3::new(query.x, query.x + query.z, query.z)
}

/// A [`linear_kernel`] device shifted by a shared phase, so tests can move
/// the surface between frames.
pub fn phased_device() -> (CpuDevice, Rc<Cell<f32>>) {
    let phase = Rc::new(Cell::new(0.0));
    let shared = Rc::clone(&phase);
    let device =
        CpuDevice::new(move |query: &QueryPoint| linear_kernel(query) + Vec3::splat(shared.get()));
    (device, phase)
}

/// Small buffers and a short ring so capacity limits are easy to hit.
pub fn small_config() -> QueryConfig {
    QueryConfig {
        max_query_count: 64,
        max_owners: 16,
        max_in_flight: 2,
        ring_slack: 1,
        max_registration_age: 10,
        ..QueryConfig::default()
    }
}

/// An engine over a manually resolved [`linear_kernel`] device.
pub fn manual_engine(config: QueryConfig) -> QueryEngine<CpuDevice> {
    match QueryEngine::new(config, CpuDevice::new(linear_kernel)) {
        Ok(engine) => engine,
        Err(err) => panic!("test config rejected: {err}"),
    }
}

/// An engine whose readbacks resolve `latency` frames after they are sent.
pub fn latent_engine(config: QueryConfig, latency: u32) -> QueryEngine<CpuDevice> {
    match QueryEngine::new(config, CpuDevice::with_latency(linear_kernel, latency)) {
        Ok(engine) => engine,
        Err(err) => panic!("test config rejected: {err}"),
    }
}

pub fn owner(n: u64) -> OwnerKey {
    OwnerKey(n)
}

/// `n` distinct world positions: `(i, 0.5 * i, -i)`.
pub fn points(n: usize) -> Vec<Vec3> {
    (0..n)
        .map(|i| {
            let i = i as f32;
            Vec3::new(i, 0.5 * i, -i)
        })
        .collect()
}

/// Tick the clock by [`DT`] and run the driver half of one frame.
pub fn run_frame<D: ComputeDevice>(engine: &mut QueryEngine<D>, clock: &mut FrameClock) {
    clock.tick(DT);
    engine.update_queries(clock);
    engine.send_read_back();
}

/// Resolve every pending readback and let the engine see the results,
/// draining the device backlog as the engine makes room.
pub fn complete_and_poll(engine: &mut QueryEngine<CpuDevice>) {
    engine.device_mut().complete_all();
    engine.poll_completions();
    while engine.device().backlog_count() > 0 {
        engine.device_mut().flush_backlog();
        engine.poll_completions();
    }
}
