//! Integration test: a host wiring three engines from a config file.
//!
//! Loads a query set with `wavequery-data`, builds displacement, flow and
//! depth engines from it, and drives single-point samplers through a few
//! frames the way gameplay code would.

use glam::{Vec2, Vec3};
use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use wavequery_core::clock::FrameClock;
use wavequery_core::device::{ComputeDevice, CpuDevice};
use wavequery_core::engine::{QueryEngine, QueryKind};
use wavequery_core::id::OwnerKey;
use wavequery_core::point::QueryPoint;
use wavequery_core::sampler::{DepthSampler, FlowSampler, HeightSampler};
use wavequery_core::test_utils::run_frame;
use wavequery_data::{QuerySetConfig, load_query_set};

fn make_test_dir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "wavequery_integration_{suffix}_{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn engine_for<D: ComputeDevice>(set: &QuerySetConfig, kind: QueryKind, device: D) -> QueryEngine<D> {
    QueryEngine::with_kind(kind, set.config_for(kind).clone(), device).unwrap()
}

fn tick_all(
    clock: &mut FrameClock,
    displacement: &mut QueryEngine<CpuDevice>,
    flow: &mut QueryEngine<CpuDevice>,
    depth: &mut QueryEngine<CpuDevice>,
) {
    // One clock for all three; each engine runs its own frame.
    let mut shared = *clock;
    run_frame(displacement, &mut shared);
    let mut shared = *clock;
    run_frame(flow, &mut shared);
    run_frame(depth, clock);
}

#[test]
fn samplers_over_loaded_query_set() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = make_test_dir("samplers");
    fs::write(
        dir.join("queries.ron"),
        "(displacement: (max_query_count: 256, sea_level: 5.0), flow: (max_query_count: 32))",
    )
    .unwrap();
    let set = load_query_set(&dir).unwrap();
    assert_eq!(set.displacement.sea_level, 5.0);

    let mut displacement = engine_for(
        &set,
        QueryKind::Displacement,
        CpuDevice::with_latency(|q: &QueryPoint| Vec3::new(0.0, 0.25 * q.x, 0.0), 1),
    );
    let mut flow = engine_for(
        &set,
        QueryKind::Flow,
        CpuDevice::with_latency(|q: &QueryPoint| Vec3::new(2.0, 0.0, -q.z), 1),
    );
    let mut depth = engine_for(
        &set,
        QueryKind::Depth,
        CpuDevice::with_latency(|q: &QueryPoint| Vec3::new(20.0 + q.x, 100.0, 0.0), 1),
    );

    let boat = OwnerKey::of("boat");
    let mut hull = HeightSampler::new(boat, 0.5);
    let mut drift = FlowSampler::new(boat, 0.5);
    let mut keel = DepthSampler::new(boat);
    let position = Vec3::new(4.0, 0.0, 3.0);

    let mut clock = FrameClock::new();
    let mut last = None;
    for _ in 0..4 {
        let h = hull.sample(&mut displacement, position);
        let f = drift.sample(&mut flow, position);
        let d = keel.sample(&mut depth, position);
        last = Some((h, f, d));
        tick_all(&mut clock, &mut displacement, &mut flow, &mut depth);
    }

    let Some((Some(height), Some(flow_sample), Some(depth_sample))) = last else {
        panic!("samplers never produced data: {last:?}");
    };
    assert_eq!(height.height, 6.0);
    assert_eq!(height.velocity, Some(Vec3::ZERO));
    let expected_normal = Vec3::new(-0.25, 1.0, 0.0).normalize();
    assert!((height.normal - expected_normal).length() < 1e-4);
    assert_eq!(flow_sample, Vec2::new(2.0, -3.0));
    assert_eq!(depth_sample.water_depth, 24.0);
    assert_eq!(depth_sample.shoreline_distance, 100.0);

    // The same owner key is independent in each engine.
    assert_eq!(displacement.owner_count(), 1);
    assert_eq!(flow.owner_count(), 1);
    assert_eq!(depth.owner_count(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn height_velocity_tracks_a_moving_swell() {
    // A swell travelling along +x at one unit per second. The kernel reads
    // simulation time through a shared cell.
    let time = Rc::new(Cell::new(0.0f32));
    let shared = Rc::clone(&time);
    let device = CpuDevice::with_latency(
        move |q: &QueryPoint| Vec3::new(0.0, 0.1 * (q.x + shared.get()), 0.0),
        0,
    );
    let mut engine = QueryEngine::new(QuerySetConfig::default().displacement, device).unwrap();
    let mut sampler = HeightSampler::new(OwnerKey::of(&42u32), 1.0);
    let mut clock = FrameClock::new();

    let mut sample = None;
    for _ in 0..5 {
        time.set(clock.time);
        engine.poll_completions();
        sample = sampler.sample(&mut engine, Vec3::ZERO);
        run_frame(&mut engine, &mut clock);
    }
    let velocity = sample.and_then(|s| s.velocity).unwrap();
    // 0.1 units of height per second of travel.
    assert!((velocity.y - 0.1).abs() < 1e-3, "{velocity:?}");
}

#[test]
fn owner_keys_are_stable_per_identity() {
    assert_eq!(OwnerKey::of("boat"), OwnerKey::of("boat"));
    assert_ne!(OwnerKey::of("boat"), OwnerKey::of("buoy"));
}
