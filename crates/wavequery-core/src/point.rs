use glam::Vec3;

/// One entry of the position buffer posted to the compute kernel.
///
/// The kernel samples the surface at `(x, z)` and filters out detail smaller
/// than `min_feature_size`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QueryPoint {
    pub x: f32,
    pub z: f32,
    pub min_feature_size: f32,
}

impl QueryPoint {
    pub fn new(x: f32, z: f32, min_feature_size: f32) -> Self {
        Self {
            x,
            z,
            min_feature_size,
        }
    }

    /// Project a world position onto the horizontal plane. The height is
    /// discarded.
    pub fn from_world(position: Vec3, min_feature_size: f32) -> Self {
        Self::new(position.x, position.z, min_feature_size)
    }

    /// The same sample shifted horizontally.
    pub fn offset(self, dx: f32, dz: f32) -> Self {
        Self::new(self.x + dx, self.z + dz, self.min_feature_size)
    }
}
