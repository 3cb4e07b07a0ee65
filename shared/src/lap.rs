/// Turns a wrapping progress value into a continuous lap count.
///
/// Each update contributes the signed difference to the previous progress,
/// corrected by one full lap whenever the difference jumps by more than half
/// a lap. Driving backwards across the finish line therefore subtracts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LapAccumulator {
    previous: f32,
    total: f32,
}

impl LapAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts accumulating from an arbitrary progress with zero laps.
    pub fn starting_at(progress: f32) -> Self {
        Self {
            previous: progress,
            total: 0.0,
        }
    }

    /// Continues from a known lap total, e.g. after a teleport or when
    /// mirroring another peer's vehicle.
    pub fn resume(progress: f32, total: f32) -> Self {
        Self {
            previous: progress,
            total,
        }
    }

    /// Feeds the latest progress and returns the delta that was added.
    pub fn update(&mut self, progress: f32) -> f32 {
        let mut delta = progress - self.previous;
        if delta < -0.5 {
            delta += 1.0;
        } else if delta > 0.5 {
            delta -= 1.0;
        }
        self.total += delta;
        self.previous = progress;
        delta
    }

    pub fn lap_progress(&self) -> f32 {
        self.total
    }

    pub fn previous_progress(&self) -> f32 {
        self.previous
    }

    pub fn has_reached(&self, goal_laps: u32) -> bool {
        self.total >= goal_laps as f32
    }

    pub fn reset(&mut self) {
        self.previous = 0.0;
        self.total = 0.0;
    }
}
