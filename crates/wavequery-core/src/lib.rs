//! Wavequery Core -- asynchronous spatial queries against a simulated surface.
//!
//! Many independent callers (physics, gameplay, UI) ask "what is the surface
//! doing at this world position?" without waiting on the device that computes
//! the answer. The engine multiplexes every caller's points into one shared
//! position buffer, posts it to a [`device::ComputeDevice`], and correlates
//! the results that come back several frames later with the caller that
//! asked for them.
//!
//! # Per-Frame Pipeline
//!
//! Each simulation frame drives a [`engine::QueryEngine`] through:
//!
//! 1. **Register** -- callers call `update_query_points` (or `query`) any
//!    number of times; points land in the current ring slot.
//! 2. **Dispatch** -- the driver calls `update_queries`, which drains
//!    completed readbacks and posts the populated position prefix.
//! 3. **Send** -- the driver calls `send_read_back`, which requests one
//!    asynchronous readback tagged with the current owner mapping and then
//!    advances the segment ring (aging out stale owners).
//! 4. **Retrieve** -- callers read the most recent promoted results with
//!    `retrieve_results` and finite-difference velocities with
//!    `calculate_velocities`.
//!
//! # Key Types
//!
//! - [`engine::QueryEngine`] -- owns buffers, ring, in-flight requests and
//!   the double-buffered result snapshots.
//! - [`ring::SegmentRing`] -- fixed pool of per-frame registrars.
//! - [`snapshot::SnapshotPair`] -- current/previous results for velocity.
//! - [`device::CpuDevice`] -- reference device evaluating a kernel closure.
//! - [`sampler`] -- single-point height, flow and depth facades.
//! - [`status::QueryStatus`] -- combinable failure bits returned by `query`.

pub mod clock;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod id;
pub mod point;
pub mod ring;
pub mod sampler;
pub mod segment;
pub mod snapshot;
pub mod status;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
