//! Integration test: end-to-end behaviour of the query pipeline.
//!
//! Each test drives a `QueryEngine` over the reference `CpuDevice` through
//! the public per-frame protocol (register, update, send, complete,
//! retrieve) and checks one observable guarantee of the pipeline.

use glam::Vec3;
use wavequery_core::clock::FrameClock;
use wavequery_core::config::QueryConfig;
use wavequery_core::engine::QueryEngine;
use wavequery_core::error::{RegisterError, RetrieveError, VelocityError};
use wavequery_core::point::QueryPoint;
use wavequery_core::status::QueryStatus;
use wavequery_core::test_utils::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn expected(points: &[Vec3]) -> Vec<Vec3> {
    points
        .iter()
        .map(|p| linear_kernel(&QueryPoint::from_world(*p, 1.0)))
        .collect()
}

// ===========================================================================
// Round trip
// ===========================================================================

#[test]
fn results_round_trip_in_submission_order() {
    let mut engine = manual_engine(small_config());
    let mut clock = FrameClock::new();
    let pts = points(7);

    engine.update_query_points(owner(1), 1.0, &pts, None).unwrap();
    run_frame(&mut engine, &mut clock);
    complete_and_poll(&mut engine);

    let mut out = vec![Vec3::ZERO; pts.len()];
    engine
        .retrieve_results(owner(1), Some(&mut out), None, None)
        .unwrap();
    assert_eq!(out, expected(&pts));
}

#[test]
fn results_arrive_after_device_latency() {
    let mut engine = latent_engine(small_config(), 2);
    let mut clock = FrameClock::new();
    let pts = points(3);
    let mut out = vec![Vec3::ZERO; 3];

    engine.update_query_points(owner(1), 1.0, &pts, None).unwrap();
    run_frame(&mut engine, &mut clock);
    run_frame(&mut engine, &mut clock);
    assert!(engine
        .retrieve_results(owner(1), Some(&mut out), None, None)
        .is_err());

    // The third update is the second maintain after the first send.
    run_frame(&mut engine, &mut clock);
    engine
        .retrieve_results(owner(1), Some(&mut out), None, None)
        .unwrap();
    assert_eq!(out, expected(&pts));
}

#[test]
fn several_owners_share_one_readback() {
    let mut engine = manual_engine(small_config());
    let mut clock = FrameClock::new();
    let a = points(4);
    let b: Vec<Vec3> = points(6).into_iter().map(|p| p + Vec3::X * 100.0).collect();

    engine.update_query_points(owner(1), 1.0, &a, None).unwrap();
    engine.update_query_points(owner(2), 1.0, &b, None).unwrap();
    run_frame(&mut engine, &mut clock);
    assert_eq!(engine.device().pending_count(), 1);
    complete_and_poll(&mut engine);

    let mut out_a = vec![Vec3::ZERO; a.len()];
    let mut out_b = vec![Vec3::ZERO; b.len()];
    engine
        .retrieve_results(owner(1), Some(&mut out_a), None, None)
        .unwrap();
    engine
        .retrieve_results(owner(2), Some(&mut out_b), None, None)
        .unwrap();
    assert_eq!(out_a, expected(&a));
    assert_eq!(out_b, expected(&b));
}

// ===========================================================================
// Segment reuse
// ===========================================================================

#[test]
fn same_size_registration_does_not_grow_buffer() {
    let mut engine = manual_engine(small_config());
    let mut clock = FrameClock::new();

    for _ in 0..20 {
        engine
            .update_query_points(owner(1), 1.0, &points(5), None)
            .unwrap();
        assert_eq!(engine.query_count(), 5);
        run_frame(&mut engine, &mut clock);
        complete_and_poll(&mut engine);
    }
    assert_eq!(engine.current_segment(owner(1)).unwrap().range(), 0..5);
}

// ===========================================================================
// Aging
// ===========================================================================

#[test]
fn silent_owner_ages_out_and_its_range_is_reused() {
    let mut engine = manual_engine(small_config());
    let mut clock = FrameClock::new();
    let max_age = engine.config().max_registration_age;

    // Owner 1 registers once; owner 2 keeps the pipeline busy every frame.
    engine
        .update_query_points(owner(1), 1.0, &points(4), None)
        .unwrap();
    for frame in 0..=max_age {
        engine
            .update_query_points(owner(2), 1.0, &points(3), None)
            .unwrap();
        run_frame(&mut engine, &mut clock);
        complete_and_poll(&mut engine);

        let mut out = [Vec3::ZERO; 4];
        assert!(
            engine
                .retrieve_results(owner(1), Some(&mut out), None, None)
                .is_ok(),
            "owner 1 should still be retrievable after frame {frame}"
        );
    }

    // Gone from the writable slot, and owner 2 was compacted to the front.
    assert!(engine.current_segment(owner(1)).is_none());
    assert_eq!(engine.current_segment(owner(2)).unwrap().range(), 0..3);

    engine
        .update_query_points(owner(3), 1.0, &points(2), None)
        .unwrap();
    engine
        .update_query_points(owner(2), 1.0, &points(3), None)
        .unwrap();
    assert_eq!(engine.current_segment(owner(3)).unwrap().range(), 3..5);
    assert_eq!(engine.query_count(), 5);

    run_frame(&mut engine, &mut clock);
    complete_and_poll(&mut engine);
    let mut out = [Vec3::ZERO; 4];
    assert_eq!(
        engine.retrieve_results(owner(1), Some(&mut out), None, None),
        Err(RetrieveError::UnknownOwner(owner(1)))
    );
}

#[test]
fn surviving_owner_positions_follow_compaction() {
    let mut engine = manual_engine(QueryConfig {
        max_registration_age: 1,
        ..small_config()
    });
    let mut clock = FrameClock::new();
    let survivor = points(3);

    engine
        .update_query_points(owner(1), 1.0, &points(5), None)
        .unwrap();
    engine
        .update_query_points(owner(2), 1.0, &survivor, None)
        .unwrap();
    run_frame(&mut engine, &mut clock);
    complete_and_poll(&mut engine);

    // Only owner 2 refreshes; owner 1 ages out at the next advance.
    engine
        .update_query_points(owner(2), 1.0, &survivor, None)
        .unwrap();
    run_frame(&mut engine, &mut clock);
    complete_and_poll(&mut engine);
    assert!(engine.current_segment(owner(1)).is_none());

    // Owner 2 skips a frame; its moved positions are posted as they are.
    run_frame(&mut engine, &mut clock);
    complete_and_poll(&mut engine);

    let mut out = vec![Vec3::ZERO; survivor.len()];
    engine
        .retrieve_results(owner(2), Some(&mut out), None, None)
        .unwrap();
    assert_eq!(engine.result_segment(owner(2)).unwrap().range(), 0..3);
    assert_eq!(out, expected(&survivor));
}

// ===========================================================================
// Velocity shape
// ===========================================================================

#[test]
fn velocity_invalidated_when_point_count_changes() {
    let mut engine = manual_engine(small_config());
    let mut clock = FrameClock::new();

    engine
        .update_query_points(owner(1), 1.0, &points(4), None)
        .unwrap();
    run_frame(&mut engine, &mut clock);
    complete_and_poll(&mut engine);

    engine
        .update_query_points(owner(1), 1.0, &points(5), None)
        .unwrap();
    run_frame(&mut engine, &mut clock);
    complete_and_poll(&mut engine);

    let mut velocities = [Vec3::splat(-1.0); 5];
    let err = engine
        .calculate_velocities(owner(1), &mut velocities)
        .unwrap_err();
    assert_eq!(
        err,
        VelocityError::ShapeChanged {
            previous: 4,
            current: 5
        }
    );
    assert_eq!(velocities, [Vec3::splat(-1.0); 5]);

    let status = engine.query(owner(1), 1.0, &points(5), None, None, Some(&mut velocities));
    assert!(status.contains(QueryStatus::VELOCITY_DATA_INVALIDATED));
    assert!(status.retrieve_succeeded());
}

#[test]
fn velocity_of_a_moving_surface() {
    let (device, phase) = phased_device();
    let mut engine = QueryEngine::new(small_config(), device).unwrap();
    let mut clock = FrameClock::new();
    let pts = points(3);
    let mut velocities = [Vec3::ZERO; 3];

    let mut statuses = Vec::new();
    for step in 0..3 {
        phase.set(step as f32 * 0.5);
        statuses.push(engine.query(owner(1), 1.0, &pts, None, None, Some(&mut velocities)));
        run_frame(&mut engine, &mut clock);
        complete_and_poll(&mut engine);
    }
    assert!(statuses[0].contains(QueryStatus::RETRIEVE_FAILED));
    assert!(statuses[1].contains(QueryStatus::NOT_ENOUGH_DATA_FOR_VELOCITY));
    assert!(statuses[2].is_ok(), "{}", statuses[2]);

    engine.calculate_velocities(owner(1), &mut velocities).unwrap();
    for v in velocities {
        assert!((v - Vec3::splat(0.5 / DT)).length() < 0.1, "{v:?}");
    }
}

// ===========================================================================
// Overflow safety
// ===========================================================================

#[test]
fn oversized_request_leaves_other_owners_intact() {
    let mut engine = manual_engine(small_config());
    let mut clock = FrameClock::new();
    let a = points(10);
    let b = points(20);

    engine.update_query_points(owner(1), 1.0, &a, None).unwrap();
    engine.update_query_points(owner(2), 1.0, &b, None).unwrap();
    let before = (
        engine.current_segment(owner(1)),
        engine.current_segment(owner(2)),
    );

    let max = engine.config().max_query_count;
    assert!(matches!(
        engine.update_query_points(owner(3), 1.0, &points(max + 1), None),
        Err(RegisterError::CapacityExceeded { .. })
    ));
    assert!(engine
        .update_query_points(owner(1), 1.0, &points(max), None)
        .is_err());
    assert_eq!(
        (
            engine.current_segment(owner(1)),
            engine.current_segment(owner(2))
        ),
        before
    );

    run_frame(&mut engine, &mut clock);
    complete_and_poll(&mut engine);
    let mut out_a = vec![Vec3::ZERO; a.len()];
    let mut out_b = vec![Vec3::ZERO; b.len()];
    engine
        .retrieve_results(owner(1), Some(&mut out_a), None, None)
        .unwrap();
    engine
        .retrieve_results(owner(2), Some(&mut out_b), None, None)
        .unwrap();
    assert_eq!(out_a, expected(&a));
    assert_eq!(out_b, expected(&b));
}

// ===========================================================================
// Ring exhaustion
// ===========================================================================

#[test]
fn starved_ring_refuses_advances_then_recovers() {
    init_logging();
    // Two requests in flight, one slot of slack: a ring of three.
    let mut engine = manual_engine(small_config());
    let mut clock = FrameClock::new();
    assert_eq!(engine.ring().capacity(), 3);

    engine
        .update_query_points(owner(1), 1.0, &points(2), None)
        .unwrap();
    run_frame(&mut engine, &mut clock);
    run_frame(&mut engine, &mut clock);
    assert!(engine.ring().is_exhausted());

    let stuck_at = engine.ring().acquire_index();
    run_frame(&mut engine, &mut clock);
    run_frame(&mut engine, &mut clock);
    assert_eq!(engine.ring().acquire_index(), stuck_at);
    assert_eq!(engine.in_flight_count(), 2);
    assert!(engine.ring().is_stalled());

    // The held slot belongs to its current owners; newcomers wait.
    assert_eq!(
        engine.update_query_points(owner(2), 1.0, &points(3), None),
        Err(RegisterError::RingExhausted)
    );
    assert_eq!(engine.owner_count(), 1);
    engine
        .update_query_points(owner(1), 1.0, &points(2), None)
        .unwrap();

    let newest = *engine.in_flight_transfers().last().unwrap();
    engine.device_mut().complete(newest);
    engine.poll_completions();
    assert_eq!(engine.in_flight_count(), 0);
    assert!(!engine.ring().is_exhausted());
    assert!(!engine.ring().is_stalled());

    engine
        .update_query_points(owner(2), 1.0, &points(3), None)
        .unwrap();
    assert_eq!(engine.owner_count(), 2);

    run_frame(&mut engine, &mut clock);
    assert_ne!(engine.ring().acquire_index(), stuck_at);
    complete_and_poll(&mut engine);

    let mut out = [Vec3::ZERO; 3];
    engine
        .retrieve_results(owner(2), Some(&mut out), None, None)
        .unwrap();
    assert_eq!(engine.ring().awaiting_release(), 0);
}

// ===========================================================================
// Out-of-order completion
// ===========================================================================

#[test]
fn newest_completion_wins_and_release_is_in_order() {
    let (device, phase) = phased_device();
    let mut engine = QueryEngine::new(small_config(), device).unwrap();
    let mut clock = FrameClock::new();
    let pts = points(1);

    for step in 0..2 {
        phase.set(step as f32 * 10.0);
        engine.update_query_points(owner(1), 1.0, &pts, None).unwrap();
        run_frame(&mut engine, &mut clock);
    }
    let transfers = engine.in_flight_transfers();
    assert_eq!(engine.ring().awaiting_release(), 2);

    engine.device_mut().complete(transfers[1]);
    engine.poll_completions();
    let newest = expected(&pts)[0] + Vec3::splat(10.0);
    let mut out = [Vec3::ZERO];
    engine
        .retrieve_results(owner(1), Some(&mut out), None, None)
        .unwrap();
    assert_eq!(out[0], newest);
    // Both slots released, oldest first, by the one completion.
    assert_eq!(engine.ring().awaiting_release(), 0);
    assert_eq!(engine.in_flight_count(), 0);

    // The older transfer resolving late does not roll the snapshot back.
    engine.device_mut().complete(transfers[0]);
    engine.poll_completions();
    engine
        .retrieve_results(owner(1), Some(&mut out), None, None)
        .unwrap();
    assert_eq!(out[0], newest);
}

#[test]
fn in_order_completion_promotes_each_result() {
    let (device, phase) = phased_device();
    let mut engine = QueryEngine::new(small_config(), device).unwrap();
    let mut clock = FrameClock::new();
    let pts = points(1);

    for step in 0..2 {
        phase.set(step as f32);
        engine.update_query_points(owner(1), 1.0, &pts, None).unwrap();
        run_frame(&mut engine, &mut clock);
    }
    let transfers = engine.in_flight_transfers();

    engine.device_mut().complete(transfers[0]);
    engine.poll_completions();
    assert_eq!(engine.in_flight_count(), 1);
    assert_eq!(engine.ring().awaiting_release(), 1);

    engine.device_mut().complete(transfers[1]);
    engine.poll_completions();
    let snapshots = engine.snapshots();
    assert!(snapshots.current().timestamp() > snapshots.previous().timestamp());
    assert_eq!(snapshots.previous().results()[0], expected(&pts)[0]);
    assert_eq!(engine.ring().awaiting_release(), 0);
}

#[test]
fn failed_transfer_is_dropped_without_promotion() {
    let mut engine = manual_engine(small_config());
    let mut clock = FrameClock::new();

    engine
        .update_query_points(owner(1), 1.0, &points(2), None)
        .unwrap();
    run_frame(&mut engine, &mut clock);
    run_frame(&mut engine, &mut clock);
    let transfers = engine.in_flight_transfers();

    engine.device_mut().fail(transfers[1]);
    engine.poll_completions();
    assert_eq!(engine.in_flight_count(), 1);
    assert!(engine.snapshots().current().timestamp().is_none());

    engine.device_mut().complete(transfers[0]);
    engine.poll_completions();
    assert_eq!(engine.in_flight_count(), 0);
    assert_eq!(engine.ring().awaiting_release(), 0);
    assert!(engine.result_segment(owner(1)).is_some());
}

// ===========================================================================
// Lifecycle
// ===========================================================================

#[test]
fn cleanup_with_transfers_in_flight() {
    let mut engine = latent_engine(small_config(), 3);
    let mut clock = FrameClock::new();
    engine
        .update_query_points(owner(1), 1.0, &points(2), None)
        .unwrap();
    run_frame(&mut engine, &mut clock);
    run_frame(&mut engine, &mut clock);

    engine.cleanup();
    assert!(!engine.is_allocated());
    assert_eq!(engine.in_flight_count(), 0);
    assert_eq!(engine.device().pending_count(), 0);

    run_frame(&mut engine, &mut clock);
    assert_eq!(engine.in_flight_count(), 0);
}
