use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Frame counter. The engine advances it once per `send_read_back`.
pub type Frame = u64;

/// Identifies one logical subscriber to a query stream.
///
/// Keys are supplied by callers and only need to be stable for as long as
/// the caller is interested in its results. Two different subscribers of the
/// same engine must not share a key; the engine cannot detect collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerKey(pub u64);

impl OwnerKey {
    /// Derive a key from any hashable caller identity (FNV-1a, 64-bit).
    pub fn of<T: Hash + ?Sized>(identity: &T) -> Self {
        let mut hasher = FnvHasher::new();
        identity.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{:016x}", self.0)
    }
}

/// Identifies an asynchronous readback. Assigned by the engine in
/// submission order, so ordering ids orders submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FNV-1a hasher
// ---------------------------------------------------------------------------

struct FnvHasher(u64);

impl FnvHasher {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self(Self::OFFSET)
    }
}

impl Hasher for FnvHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
