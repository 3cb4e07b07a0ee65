//! Headless input for a peer: an autopilot that follows the track and a
//! ground probe that treats the curve as the road surface.

use glam::Vec3;
use shared::curve::{wrap_unit, TrackCurve};
use shared::motion::{GroundProbe, InputProvider};
use shared::progress::ProgressEstimator;
use shared::vehicle::Vehicle;
use std::sync::Arc;

/// Steers toward a point a fixed distance ahead on the curve.
///
/// Until a curve is attached the autopilot gives no input, so the vehicle
/// simply stays where it is.
pub struct Autopilot {
    lookahead: f32,
    curve: Option<Arc<dyn TrackCurve>>,
}

impl Autopilot {
    /// `lookahead` is measured in curve parameter space, 0.02 is a good start.
    pub fn new(lookahead: f32) -> Self {
        Self {
            lookahead,
            curve: None,
        }
    }

    pub fn follow(&mut self, curve: Arc<dyn TrackCurve>) {
        self.curve = Some(curve);
    }

    pub fn is_following(&self) -> bool {
        self.curve.is_some()
    }

    pub fn lookahead(&self) -> f32 {
        self.lookahead
    }
}

impl InputProvider for Autopilot {
    fn direction(&mut self, vehicle: &Vehicle) -> Option<Vec3> {
        let curve = self.curve.as_ref()?;
        let target = curve.evaluate(wrap_unit(vehicle.progress() + self.lookahead))?;
        (target.position - vehicle.position()).try_normalize()
    }
}

/// Reports the curve normal when the probe origin sits above the nearest
/// point of the road, within the probe distance.
pub struct TrackSurfaceProbe {
    curve: Arc<dyn TrackCurve>,
    estimator: ProgressEstimator,
}

impl TrackSurfaceProbe {
    pub fn new(curve: Arc<dyn TrackCurve>, estimator: ProgressEstimator) -> Self {
        Self { curve, estimator }
    }
}

impl GroundProbe for TrackSurfaceProbe {
    fn probe(&self, origin: Vec3, max_distance: f32) -> Option<Vec3> {
        let t = self.estimator.estimate(self.curve.as_ref(), origin);
        let sample = self.curve.evaluate(t)?;
        let height = (origin - sample.position).dot(sample.normal);
        (0.0..=max_distance).contains(&height).then_some(sample.normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::curve::CatmullRomLoop;
    use shared::settings::Settings;

    fn circle() -> Arc<dyn TrackCurve> {
        Arc::new(CatmullRomLoop::circle(Vec3::ZERO, 3.0, 12))
    }

    #[test]
    fn test_autopilot_idle_without_curve() {
        let mut autopilot = Autopilot::new(0.02);
        let vehicle = Vehicle::new(1, 1, Vec3::ZERO, glam::Quat::IDENTITY, &Settings::default());
        assert!(!autopilot.is_following());
        assert!(autopilot.direction(&vehicle).is_none());
    }

    #[test]
    fn test_autopilot_points_ahead_along_track() {
        let curve = circle();
        let start = curve.evaluate(0.0).unwrap();
        let vehicle = Vehicle::new(1, 1, start.position, start.facing(), &Settings::default());

        let mut autopilot = Autopilot::new(0.02);
        autopilot.follow(curve);
        let direction = autopilot.direction(&vehicle).unwrap();

        assert_approx_eq!(direction.length(), 1.0, 1e-5);
        assert!(direction.dot(start.tangent) > 0.9);
    }

    #[test]
    fn test_probe_finds_road_below() {
        let curve = circle();
        let probe = TrackSurfaceProbe::new(curve.clone(), ProgressEstimator::default());
        let point = curve.evaluate(0.25).unwrap().position;

        let normal = probe.probe(point + Vec3::Y * 0.5, 2.5).unwrap();
        assert_approx_eq!(normal.y, 1.0, 1e-4);
        assert!(probe.probe(point + Vec3::Y * 5.0, 2.5).is_none());
        assert!(probe.probe(point - Vec3::Y * 1.0, 2.5).is_none());
    }
}
