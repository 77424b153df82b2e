//! Combinable status bits returned by [`QueryEngine::query`](crate::engine::QueryEngine::query).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask of query failures. `OK` (no bits) means every requested output
/// was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueryStatus(u32);

impl QueryStatus {
    pub const OK: Self = Self(0);
    /// No results for this owner in the current snapshot.
    pub const RETRIEVE_FAILED: Self = Self(1 << 0);
    /// The points could not be registered this frame.
    pub const POST_FAILED: Self = Self(1 << 1);
    /// Fewer than two result snapshots contain this owner.
    pub const NOT_ENOUGH_DATA_FOR_VELOCITY: Self = Self(1 << 2);
    /// The owner's point count changed between the two snapshots.
    pub const VELOCITY_DATA_INVALIDATED: Self = Self(1 << 3);
    /// The two snapshots are too close together in time.
    pub const INVALID_DT_FOR_VELOCITY: Self = Self(1 << 4);

    const NAMES: [(QueryStatus, &'static str); 5] = [
        (Self::RETRIEVE_FAILED, "RetrieveFailed"),
        (Self::POST_FAILED, "PostFailed"),
        (Self::NOT_ENOUGH_DATA_FOR_VELOCITY, "NotEnoughDataForVelocity"),
        (Self::VELOCITY_DATA_INVALIDATED, "VelocityDataInvalidated"),
        (Self::INVALID_DT_FOR_VELOCITY, "InvalidDtForVelocity"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True iff the retrieve-failed bit is clear.
    pub fn retrieve_succeeded(self) -> bool {
        !self.contains(Self::RETRIEVE_FAILED)
    }
}

/// Free-function form of [`QueryStatus::retrieve_succeeded`].
pub fn retrieve_succeeded(status: QueryStatus) -> bool {
    status.retrieve_succeeded()
}

impl BitOr for QueryStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "Ok");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}
