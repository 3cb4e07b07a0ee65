use crate::curve::{look_rotation, CurveSample, TrackCurve};
use crate::settings::{secs, AdherenceSettings};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RespawnReason {
    OffTrackHorizontal,
    OffTrackVertical,
    Flipped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdherenceState {
    OnTrack,
    RespawnCooldown { until: Duration },
}

/// Watches one vehicle and decides when it has to be put back on the track.
///
/// All respawn triggers share one cooldown: after a respawn nothing can
/// trigger another one until `respawn_cooldown` has passed.
#[derive(Debug, Clone)]
pub struct TrackAdherenceMonitor {
    settings: AdherenceSettings,
    state: AdherenceState,
    last_respawn: Option<Duration>,
    flip_timer: f32,
    last_safe_progress: f32,
}

impl TrackAdherenceMonitor {
    pub fn new(settings: AdherenceSettings) -> Self {
        Self {
            settings,
            state: AdherenceState::OnTrack,
            last_respawn: None,
            flip_timer: 0.0,
            last_safe_progress: 0.0,
        }
    }

    pub fn state(&self) -> AdherenceState {
        self.state
    }

    pub fn last_safe_progress(&self) -> f32 {
        self.last_safe_progress
    }

    pub fn flip_timer(&self) -> f32 {
        self.flip_timer
    }

    /// Called every tick the vehicle is allowed to move.
    pub fn record_safe_progress(&mut self, progress: f32) {
        self.last_safe_progress = progress;
    }

    pub fn cooldown_elapsed(&self, now: Duration) -> bool {
        match self.last_respawn {
            Some(at) => now >= at + self.settings.respawn_cooldown(),
            None => true,
        }
    }

    /// True when the vehicle is so far above or below the road that it should
    /// stop moving until the respawn picks it up.
    pub fn should_freeze(&self, position: Vec3, sample: &CurveSample) -> bool {
        vertical_deviation(position, sample)
            > self.settings.off_track_height * self.settings.freeze_factor
    }

    /// Runs the off-track and flip checks for one tick.
    ///
    /// The flip timer keeps running during the cooldown, the respawn itself
    /// is only requested once the cooldown has elapsed.
    pub fn check(
        &mut self,
        now: Duration,
        dt: f32,
        position: Vec3,
        rotation: Quat,
        sample: &CurveSample,
    ) -> Option<RespawnReason> {
        if let AdherenceState::RespawnCooldown { until } = self.state {
            if now >= until {
                self.state = AdherenceState::OnTrack;
            }
        }

        let vehicle_up = rotation * Vec3::Y;
        let tilt = vehicle_up.angle_between(sample.normal).to_degrees();
        if tilt > self.settings.flip_angle_degrees {
            self.flip_timer += dt;
        } else {
            self.flip_timer = 0.0;
        }

        if !self.cooldown_elapsed(now) {
            return None;
        }

        if horizontal_deviation(position, sample) > self.settings.off_track_distance {
            return Some(RespawnReason::OffTrackHorizontal);
        }
        if vertical_deviation(position, sample) > self.settings.off_track_height {
            return Some(RespawnReason::OffTrackVertical);
        }
        if self.flip_timer >= self.settings.flip_respawn_time {
            return Some(RespawnReason::Flipped);
        }
        None
    }

    /// Records a respawn at `now` and returns the progress to respawn at.
    pub fn begin_respawn(&mut self, now: Duration) -> f32 {
        self.last_respawn = Some(now);
        self.flip_timer = 0.0;
        self.state = AdherenceState::RespawnCooldown {
            until: now + self.settings.respawn_cooldown(),
        };
        self.last_safe_progress
    }

    /// Pose a respawned vehicle is placed at: above the curve point along its
    /// normal, looking down the tangent.
    pub fn respawn_pose(&self, curve: &dyn TrackCurve, progress: f32) -> Option<(Vec3, Quat)> {
        let sample = curve.evaluate(progress)?;
        Some((
            sample.position + sample.normal * self.settings.respawn_lift,
            look_rotation(sample.tangent, Vec3::Y),
        ))
    }

    pub fn reset(&mut self) {
        self.state = AdherenceState::OnTrack;
        self.last_respawn = None;
        self.flip_timer = 0.0;
        self.last_safe_progress = 0.0;
    }

    pub fn settings(&self) -> &AdherenceSettings {
        &self.settings
    }

    pub fn cooldown(&self) -> Duration {
        secs(self.settings.respawn_cooldown)
    }
}

/// Distance from the curve point in the plane of the curve's normal.
pub fn horizontal_deviation(position: Vec3, sample: &CurveSample) -> f32 {
    let offset = position - sample.position;
    (offset - sample.normal * offset.dot(sample.normal)).length()
}

/// Absolute distance along the curve's normal.
pub fn vertical_deviation(position: Vec3, sample: &CurveSample) -> f32 {
    (position - sample.position).dot(sample.normal).abs()
}
