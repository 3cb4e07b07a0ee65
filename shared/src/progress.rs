use crate::curve::TrackCurve;
use glam::Vec3;
use log::warn;

/// Default number of uniformly spaced samples used to locate a point.
pub const DEFAULT_SAMPLES: usize = 300;

/// Locates a world position on a closed curve by brute-force sampling.
///
/// The result is always one of the sample parameters `i / samples`, so it is
/// only accurate to one sample step. That is plenty for lap counting and for
/// remembering where a vehicle was last safe.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEstimator {
    samples: usize,
}

impl ProgressEstimator {
    pub fn new(samples: usize) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Width of one sample step in curve parameter space.
    pub fn resolution(&self) -> f32 {
        if self.samples == 0 {
            1.0
        } else {
            1.0 / self.samples as f32
        }
    }

    pub fn estimate(&self, curve: &dyn TrackCurve, position: Vec3) -> f32 {
        estimate_progress(curve, position, self.samples)
    }
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLES)
    }
}

/// Returns the parameter in `[0, 1)` of the sample nearest to `position`.
///
/// Ties resolve to the lowest index. A curve with no samples or zero length
/// yields 0 and logs a warning.
pub fn estimate_progress(curve: &dyn TrackCurve, position: Vec3, samples: usize) -> f32 {
    if samples == 0 {
        warn!("Progress requested with zero samples, defaulting to 0");
        return 0.0;
    }

    let mut best_t = 0.0;
    let mut best_distance = f32::INFINITY;
    let mut length = 0.0;
    let mut previous: Option<Vec3> = None;

    for i in 0..samples {
        let t = i as f32 / samples as f32;
        let Some(sample) = curve.evaluate(t) else {
            warn!("Track curve has no samples, defaulting progress to 0");
            return 0.0;
        };

        if let Some(previous) = previous {
            length += previous.distance(sample.position);
        }
        previous = Some(sample.position);

        let distance = sample.position.distance_squared(position);
        if distance < best_distance {
            best_distance = distance;
            best_t = t;
        }
    }

    if length <= f32::EPSILON {
        warn!("Track curve has zero length, defaulting progress to 0");
        return 0.0;
    }

    best_t
}

/// Shortest distance between two parameters on the unit loop.
pub fn loop_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs() % 1.0;
    d.min(1.0 - d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CatmullRomLoop;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_estimate_recovers_parameter() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 10.0, 16);
        let estimator = ProgressEstimator::default();

        for &t in &[0.0, 0.1, 0.25, 0.5, 0.77, 0.99] {
            let point = curve.evaluate(t).unwrap().position;
            let estimate = estimator.estimate(&curve, point);
            assert!(
                loop_distance(estimate, t) <= estimator.resolution() + 1e-4,
                "t={} estimate={}",
                t,
                estimate
            );
            assert!((0.0..1.0).contains(&estimate));
        }
    }

    #[test]
    fn test_estimate_offset_point() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 10.0, 16);
        let sample = curve.evaluate(0.4).unwrap();
        let lifted = sample.position + sample.normal * 0.5 + sample.side() * 0.5;
        let estimate = estimate_progress(&curve, lifted, DEFAULT_SAMPLES);
        assert!(loop_distance(estimate, 0.4) <= 2.0 / DEFAULT_SAMPLES as f32);
    }

    #[test]
    fn test_empty_curve_defaults_to_zero() {
        let curve = CatmullRomLoop::default();
        assert_eq!(estimate_progress(&curve, Vec3::new(1.0, 2.0, 3.0), 300), 0.0);
    }

    #[test]
    fn test_zero_length_curve_defaults_to_zero() {
        let curve = CatmullRomLoop::new(vec![Vec3::ONE; 4]);
        assert_eq!(estimate_progress(&curve, Vec3::ZERO, 300), 0.0);
    }

    #[test]
    fn test_zero_samples_defaults_to_zero() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 10.0, 16);
        let point = curve.evaluate(0.5).unwrap().position;
        assert_eq!(estimate_progress(&curve, point, 0), 0.0);
    }

    #[test]
    fn test_loop_distance_wraps() {
        assert_approx_eq!(loop_distance(0.95, 0.05), 0.1, 1e-5);
        assert_approx_eq!(loop_distance(0.2, 0.3), 0.1, 1e-5);
        assert_approx_eq!(loop_distance(0.0, 0.5), 0.5, 1e-5);
    }
}
