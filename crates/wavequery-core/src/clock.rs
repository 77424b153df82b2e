//! Simulation time as seen by the query engine.

/// Time of the current frame, handed to the engine by the per-frame driver.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameClock {
    /// Seconds since the simulation started.
    pub time: f32,
    /// Duration of the frame that just elapsed, in seconds.
    pub delta_time: f32,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one frame of `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        self.time += dt;
        self.delta_time = dt;
    }

    /// Timestamp of data read back this frame. The positions behind it were
    /// posted one frame earlier.
    pub fn data_timestamp(&self) -> f32 {
        self.time - self.delta_time
    }
}
