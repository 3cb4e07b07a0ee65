use crate::adherence::TrackAdherenceMonitor;
use crate::hazards::PullLink;
use crate::items::{ItemEffectState, SpeedModifiers};
use crate::lap::LapAccumulator;
use crate::motion::Body;
use crate::protocol::VehicleSnapshot;
use crate::scheduler::TimerId;
use crate::settings::Settings;
use crate::{PlayerId, VehicleId};
use glam::{Quat, Vec3};
use std::time::Duration;

/// One racer, either driven here or mirrored from its owner.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    pub owner: PlayerId,
    pub body: Body,
    pub adherence: TrackAdherenceMonitor,
    pub speed: SpeedModifiers,
    pub effects: ItemEffectState,
    progress: f32,
    laps: LapAccumulator,
    movement_enabled: bool,
    finished: bool,
    start_pose: (Vec3, Quat),
    control_locked_until: Option<Duration>,
    pub(crate) pull: Option<PullLink>,
    pub(crate) enable_timer: Option<TimerId>,
    remote_target: Option<VehicleSnapshot>,
}

impl Vehicle {
    pub fn new(id: VehicleId, owner: PlayerId, position: Vec3, rotation: Quat, settings: &Settings) -> Self {
        Self {
            id,
            owner,
            body: Body::at(position, rotation),
            adherence: TrackAdherenceMonitor::new(settings.adherence.clone()),
            speed: SpeedModifiers::new(settings.motion.base_speed),
            effects: ItemEffectState::default(),
            progress: 0.0,
            laps: LapAccumulator::new(),
            movement_enabled: false,
            finished: false,
            start_pose: (position, rotation),
            control_locked_until: None,
            pull: None,
            enable_timer: None,
            remote_target: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.body.position
    }

    pub fn rotation(&self) -> Quat {
        self.body.rotation
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn lap_progress(&self) -> f32 {
        self.laps.lap_progress()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn movement_enabled(&self) -> bool {
        self.movement_enabled
    }

    /// Disabling movement also kills any velocity so the vehicle stays put.
    pub fn set_movement_enabled(&mut self, enabled: bool) {
        self.movement_enabled = enabled;
        if !enabled {
            self.body.stop();
        }
    }

    pub fn is_invincible(&self) -> bool {
        self.effects.is_invincible()
    }

    pub fn is_pulled(&self) -> bool {
        self.pull.is_some()
    }

    pub fn is_control_locked(&self, now: Duration) -> bool {
        matches!(self.control_locked_until, Some(until) if now < until)
    }

    /// Feeds a fresh progress estimate into the lap accumulator.
    pub fn update_progress(&mut self, progress: f32) -> f32 {
        self.progress = progress;
        self.laps.update(progress)
    }

    /// Moves the vehicle without touching its lap count.
    pub(crate) fn place_at(&mut self, position: Vec3, rotation: Quat, progress: f32) {
        self.body = Body::at(position, rotation);
        self.progress = progress;
        self.laps = LapAccumulator::resume(progress, self.laps.lap_progress());
    }

    pub fn reached_goal(&self, goal_laps: u32) -> bool {
        self.laps.has_reached(goal_laps)
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
    }

    pub(crate) fn apply_hit(&mut self, impulse: Vec3, spin: f32, now: Duration, lock: Duration) {
        self.pull = None;
        self.body.velocity = impulse;
        self.body.angular_velocity = impulse
            .cross(Vec3::Y)
            .try_normalize()
            .unwrap_or(Vec3::X)
            * spin;
        self.control_locked_until = Some(now + lock);
    }

    pub(crate) fn release_control(&mut self) {
        self.control_locked_until = None;
    }

    /// Puts the vehicle back on the starting grid with every effect cleared.
    pub fn reset(&mut self) {
        let (position, rotation) = self.start_pose;
        self.body = Body::at(position, rotation);
        self.adherence.reset();
        self.speed.reset();
        self.effects.reset();
        self.progress = 0.0;
        self.laps.reset();
        self.movement_enabled = false;
        self.finished = false;
        self.control_locked_until = None;
        self.pull = None;
        self.enable_timer = None;
        self.remote_target = None;
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            vehicle: self.id,
            position: self.body.position,
            rotation: self.body.rotation,
            velocity: self.body.velocity,
            progress: self.progress,
            lap_progress: self.laps.lap_progress(),
        }
    }

    /// Stores the latest authoritative state of a vehicle owned elsewhere.
    pub fn receive_snapshot(&mut self, snapshot: VehicleSnapshot) {
        self.progress = snapshot.progress;
        self.laps = LapAccumulator::resume(snapshot.progress, snapshot.lap_progress);
        self.remote_target = Some(snapshot);
    }

    /// Eases a mirrored vehicle toward its last snapshot.
    pub fn interpolate(&mut self, dt: f32, lerp_rate: f32) {
        let Some(target) = &self.remote_target else {
            return;
        };
        let blend = (dt * lerp_rate).clamp(0.0, 1.0);
        self.body.position = self.body.position.lerp(target.position, blend);
        self.body.rotation = self.body.rotation.slerp(target.rotation, blend).normalize();
        self.body.velocity = self.body.velocity.lerp(target.velocity, blend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle() -> Vehicle {
        Vehicle::new(1, 1, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, &Settings::default())
    }

    #[test]
    fn test_new_vehicle_is_frozen() {
        let vehicle = vehicle();
        assert!(!vehicle.movement_enabled());
        assert_eq!(vehicle.progress(), 0.0);
        assert!(!vehicle.is_finished());
    }

    #[test]
    fn test_disable_clears_velocity() {
        let mut vehicle = vehicle();
        vehicle.set_movement_enabled(true);
        vehicle.body.velocity = Vec3::ONE;
        vehicle.set_movement_enabled(false);
        assert_eq!(vehicle.body.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_place_keeps_lap_count() {
        let mut vehicle = vehicle();
        for t in [0.2, 0.4, 0.6] {
            vehicle.update_progress(t);
        }
        vehicle.place_at(Vec3::ZERO, Quat::IDENTITY, 0.5);
        assert!((vehicle.lap_progress() - 0.6).abs() < 1e-5);
        vehicle.update_progress(0.55);
        assert!((vehicle.lap_progress() - 0.65).abs() < 1e-5);
    }

    #[test]
    fn test_reset_restores_start() {
        let mut vehicle = vehicle();
        vehicle.set_movement_enabled(true);
        vehicle.body.position = Vec3::new(9.0, 9.0, 9.0);
        vehicle.update_progress(0.5);
        vehicle.speed.push(2.0);
        vehicle.mark_finished();
        vehicle.reset();

        assert_eq!(vehicle.position(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(vehicle.lap_progress(), 0.0);
        assert!(!vehicle.is_finished());
        assert!(!vehicle.movement_enabled());
        assert_eq!(vehicle.speed.active_modifiers(), 0);
    }

    #[test]
    fn test_control_lock_window() {
        let mut vehicle = vehicle();
        let now = Duration::from_secs(3);
        vehicle.apply_hit(Vec3::X, 1.0, now, Duration::from_secs(1));
        assert!(vehicle.is_control_locked(now));
        assert!(!vehicle.is_control_locked(now + Duration::from_secs(1)));
        assert_eq!(vehicle.body.velocity, Vec3::X);
    }

    #[test]
    fn test_interpolation_converges() {
        let mut vehicle = vehicle();
        let mut snapshot = vehicle.snapshot();
        snapshot.position = Vec3::new(5.0, 0.0, 0.0);
        snapshot.progress = 0.3;
        snapshot.lap_progress = 1.3;
        vehicle.receive_snapshot(snapshot);

        vehicle.interpolate(0.02, 15.0);
        let first = vehicle.position().x;
        assert!(first > 1.0 && first < 5.0);
        for _ in 0..200 {
            vehicle.interpolate(0.02, 15.0);
        }
        assert!((vehicle.position().x - 5.0).abs() < 1e-3);
        assert!((vehicle.lap_progress() - 1.3).abs() < 1e-5);
    }
}
