//! Closed track curves.
//!
//! The race only ever needs to ask a curve for a point, direction and up
//! vector at some normalized parameter. How the curve was authored is not this
//! crate's business; [`CatmullRomLoop`] is a plain closed spline through a
//! list of anchors so peers can rebuild the same track from a broadcast.

use glam::{Mat3, Quat, Vec3};

/// Position, unit tangent and unit up vector of a curve at some parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSample {
    pub position: Vec3,
    pub tangent: Vec3,
    pub normal: Vec3,
}

impl CurveSample {
    /// Unit axis across the road, perpendicular to tangent and normal.
    pub fn side(&self) -> Vec3 {
        self.normal
            .cross(self.tangent)
            .try_normalize()
            .unwrap_or(Vec3::X)
    }

    /// Orientation that looks down the tangent with world up as the up hint.
    pub fn facing(&self) -> Quat {
        look_rotation(self.tangent, Vec3::Y)
    }
}

/// An immutable closed parametric curve.
///
/// `t` is taken modulo 1, so `evaluate(0.0)` and `evaluate(1.0)` are the same
/// point. Returns `None` when the curve has nothing to evaluate.
pub trait TrackCurve: Send + Sync {
    fn evaluate(&self, t: f32) -> Option<CurveSample>;
}

/// Wraps any parameter into `[0, 1)`.
pub fn wrap_unit(t: f32) -> f32 {
    let wrapped = t.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// Rotation whose local +Z axis points along `forward` and whose local +Y is
/// as close to `up` as possible.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let Some(forward) = forward.try_normalize() else {
        return Quat::IDENTITY;
    };
    let right = match up.cross(forward).try_normalize() {
        Some(right) => right,
        // forward is parallel to up; pick any perpendicular axis
        None => forward.any_orthonormal_vector(),
    };
    let up = forward.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, up, forward))
}

/// Closed uniform Catmull-Rom spline through a list of anchors.
#[derive(Debug, Clone, Default)]
pub struct CatmullRomLoop {
    anchors: Vec<Vec3>,
}

impl CatmullRomLoop {
    pub fn new(anchors: Vec<Vec3>) -> Self {
        Self { anchors }
    }

    pub fn anchors(&self) -> &[Vec3] {
        &self.anchors
    }

    /// Regular polygon of `count` anchors on a horizontal circle.
    pub fn circle(center: Vec3, radius: f32, count: usize) -> Self {
        let anchors = (0..count)
            .map(|i| {
                let angle = i as f32 / count as f32 * std::f32::consts::TAU;
                center + Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius)
            })
            .collect();
        Self { anchors }
    }
}

impl TrackCurve for CatmullRomLoop {
    fn evaluate(&self, t: f32) -> Option<CurveSample> {
        let n = self.anchors.len();
        match n {
            0 => None,
            1 => Some(CurveSample {
                position: self.anchors[0],
                tangent: Vec3::Z,
                normal: Vec3::Y,
            }),
            _ => {
                let u = wrap_unit(t) * n as f32;
                let segment = (u.floor() as usize) % n;
                let f = u - u.floor();

                let p0 = self.anchors[(segment + n - 1) % n];
                let p1 = self.anchors[segment];
                let p2 = self.anchors[(segment + 1) % n];
                let p3 = self.anchors[(segment + 2) % n];

                let a = 2.0 * p1;
                let b = p2 - p0;
                let c = 2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3;
                let d = -p0 + 3.0 * p1 - 3.0 * p2 + p3;

                let position = 0.5 * (a + b * f + c * f * f + d * f * f * f);
                let derivative = 0.5 * (b + 2.0 * c * f + 3.0 * d * f * f);

                let tangent = derivative
                    .try_normalize()
                    .or_else(|| (p2 - p1).try_normalize())
                    .unwrap_or(Vec3::Z);
                let normal = (Vec3::Y - tangent * tangent.dot(Vec3::Y))
                    .try_normalize()
                    .unwrap_or(Vec3::Y);

                Some(CurveSample {
                    position,
                    tangent,
                    normal,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_wrap_unit() {
        assert_approx_eq!(wrap_unit(0.25), 0.25);
        assert_approx_eq!(wrap_unit(1.25), 0.25);
        assert_approx_eq!(wrap_unit(-0.25), 0.75);
        assert!(wrap_unit(-1e-9) < 1.0);
        assert_eq!(wrap_unit(1.0), 0.0);
    }

    #[test]
    fn test_empty_curve_has_no_samples() {
        let curve = CatmullRomLoop::default();
        assert!(curve.evaluate(0.3).is_none());
    }

    #[test]
    fn test_curve_passes_through_anchors() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 5.0, 8);
        for (i, anchor) in curve.anchors().iter().enumerate() {
            let t = i as f32 / 8.0;
            let sample = curve.evaluate(t).unwrap();
            assert!(sample.position.distance(*anchor) < 1e-4);
        }
    }

    #[test]
    fn test_curve_is_closed() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 5.0, 8);
        let start = curve.evaluate(0.0).unwrap();
        let end = curve.evaluate(1.0).unwrap();
        assert!(start.position.distance(end.position) < 1e-4);
    }

    #[test]
    fn test_flat_curve_normal_points_up() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 5.0, 12);
        let sample = curve.evaluate(0.37).unwrap();
        assert_approx_eq!(sample.normal.dot(Vec3::Y), 1.0, 1e-4);
        assert_approx_eq!(sample.tangent.length(), 1.0, 1e-4);
        assert_approx_eq!(sample.tangent.dot(sample.normal), 0.0, 1e-4);
    }

    #[test]
    fn test_look_rotation_faces_forward() {
        let forward = Vec3::new(1.0, 0.0, 1.0).normalize();
        let rotation = look_rotation(forward, Vec3::Y);
        assert!((rotation * Vec3::Z).distance(forward) < 1e-4);
        assert!((rotation * Vec3::Y).distance(Vec3::Y) < 1e-4);
    }

    #[test]
    fn test_side_is_perpendicular() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 5.0, 12);
        let sample = curve.evaluate(0.1).unwrap();
        let side = sample.side();
        assert_approx_eq!(side.dot(sample.tangent), 0.0, 1e-4);
        assert_approx_eq!(side.dot(sample.normal), 0.0, 1e-4);
    }
}
