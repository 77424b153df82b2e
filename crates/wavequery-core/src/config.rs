//! Tuning knobs for a query engine.
//!
//! [`QueryConfig`] derives serde so the data crate can load it from RON,
//! TOML or JSON. Every field has a default; files only need to name the
//! fields they override.

use crate::id::Frame;
use serde::{Deserialize, Serialize};

/// Configuration for one [`QueryEngine`](crate::engine::QueryEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Capacity of the shared position and result buffers.
    pub max_query_count: usize,
    /// Distinct owners allowed in a single ring slot.
    pub max_owners: usize,
    /// Cap on readbacks in flight. When reached, the oldest is evicted.
    pub max_in_flight: usize,
    /// Extra ring slots beyond `max_in_flight`.
    pub ring_slack: usize,
    /// Registrations older than this many ring advances are dropped when
    /// the next slot is acquired.
    pub max_registration_age: Frame,
    /// Horizontal offset of the two samples each normal probe adds.
    pub finite_diff_dx: f32,
    /// Snapshots closer together than this cannot produce velocities.
    pub min_velocity_dt: f32,
    /// Added to the vertical displacement to produce a height.
    pub sea_level: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_query_count: 4096,
            max_owners: 1024,
            max_in_flight: 4,
            ring_slack: 3,
            max_registration_age: 10,
            finite_diff_dx: 0.1,
            min_velocity_dt: 0.0001,
            sea_level: 0.0,
        }
    }
}

impl QueryConfig {
    /// Number of registrar slots in the segment ring.
    pub fn ring_capacity(&self) -> usize {
        self.max_in_flight + self.ring_slack
    }

    /// Bound of the completion channel between devices and the engine.
    /// Devices hold on to anything that does not fit and retry later.
    pub fn completion_queue_capacity(&self) -> usize {
        self.max_in_flight * 2
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("max_query_count", self.max_query_count as u64),
            ("max_owners", self.max_owners as u64),
            ("max_in_flight", self.max_in_flight as u64),
            ("max_registration_age", self.max_registration_age),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.ring_slack == 0 {
            return Err(ConfigError::NoRingSlack);
        }
        let positives = [
            ("finite_diff_dx", self.finite_diff_dx),
            ("min_velocity_dt", self.min_velocity_dt),
        ];
        for (field, value) in positives {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::NotPositive { field, value });
            }
        }
        if !self.sea_level.is_finite() {
            return Err(ConfigError::NotFinite { field: "sea_level" });
        }
        Ok(())
    }
}

/// A [`QueryConfig`] field holds an unusable value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    /// The ring needs at least one slot beyond the in-flight cap so the
    /// current registrar never aliases an in-flight one.
    #[error("ring_slack must be at least 1")]
    NoRingSlack,

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f32 },

    #[error("{field} must be finite")]
    NotFinite { field: &'static str },
}
