//! Failure types for the query pipeline.
//!
//! None of these are fatal. Callers are expected to retry next frame,
//! degrade, or ignore them; [`QueryEngine::query`](crate::engine::QueryEngine::query)
//! folds them into a [`QueryStatus`] bitmask.

use crate::id::OwnerKey;
use crate::status::QueryStatus;

/// Registering query points failed. Existing registrations are untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("no query points supplied")]
    Empty,

    /// Each normal probe is centred on the query point with the same index.
    #[error("{probes} normal probes but only {points} query points")]
    TooManyNormalProbes { probes: usize, points: usize },

    #[error("query capacity exceeded: {in_use} in use + {requested} requested > {max}")]
    CapacityExceeded {
        in_use: usize,
        requested: usize,
        max: usize,
    },

    #[error("too many owners registered in one frame (max {max})")]
    TooManyOwners { max: usize },

    /// Only owners already in the held ring slot may refresh until a
    /// readback completes.
    #[error("segment ring exhausted; new owners are refused until a readback completes")]
    RingExhausted,

    #[error("query engine has been released")]
    Released,
}

/// Reading results for an owner failed. Output buffers are untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrieveError {
    /// Expected for the first few frames after an owner starts querying.
    #[error("no results for {0} in the current snapshot")]
    UnknownOwner(OwnerKey),

    #[error("{output} output holds {requested} entries but only {available} are available")]
    OutputTooLong {
        output: &'static str,
        requested: usize,
        available: usize,
    },

    #[error("result buffer is shorter than the segment for {0}")]
    MissingData(OwnerKey),
}

/// Finite-differencing the two result snapshots failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VelocityError {
    #[error("not enough result snapshots for velocity")]
    NotEnoughData,

    #[error("no results for {0} in the current snapshot")]
    UnknownOwner(OwnerKey),

    #[error("segment length changed between snapshots ({previous} -> {current})")]
    ShapeChanged { previous: usize, current: usize },

    #[error("result data missing for velocity")]
    MissingData,

    #[error("velocity output holds {requested} entries but only {available} query points exist")]
    OutputTooLong { requested: usize, available: usize },

    #[error("snapshot time delta {dt} is too small")]
    InvalidDt { dt: f32 },
}

impl VelocityError {
    /// The status bit reported for this failure.
    pub fn status(&self) -> QueryStatus {
        match self {
            VelocityError::NotEnoughData => QueryStatus::NOT_ENOUGH_DATA_FOR_VELOCITY,
            VelocityError::UnknownOwner(_) => QueryStatus::RETRIEVE_FAILED,
            VelocityError::ShapeChanged { .. }
            | VelocityError::MissingData
            | VelocityError::OutputTooLong { .. } => QueryStatus::VELOCITY_DATA_INVALIDATED,
            VelocityError::InvalidDt { .. } => QueryStatus::INVALID_DT_FOR_VELOCITY,
        }
    }
}

/// Segment ring cursor errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// Every slot is awaiting a readback; the current slot is reused.
    #[error("segment ring exhausted ({capacity} slots in use)")]
    Exhausted { capacity: usize },

    #[error("no ring slot is awaiting release")]
    NothingToRelease,
}
