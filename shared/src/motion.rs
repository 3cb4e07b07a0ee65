use crate::settings::MotionSettings;
use crate::vehicle::Vehicle;
use glam::{Quat, Vec3};

/// Supplies the steering direction of a locally driven vehicle.
///
/// Returning `None` means "no input this tick": the vehicle stops.
pub trait InputProvider {
    fn direction(&mut self, vehicle: &Vehicle) -> Option<Vec3>;
}

/// Reports the surface normal below a point, if there is a surface within
/// `max_distance` straight down.
pub trait GroundProbe {
    fn probe(&self, origin: Vec3, max_distance: f32) -> Option<Vec3>;
}

/// Steers in the same world direction forever.
#[derive(Debug, Clone, Copy)]
pub struct FixedDirection(pub Vec3);

impl InputProvider for FixedDirection {
    fn direction(&mut self, _vehicle: &Vehicle) -> Option<Vec3> {
        Some(self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl InputProvider for NoInput {
    fn direction(&mut self, _vehicle: &Vehicle) -> Option<Vec3> {
        None
    }
}

/// Infinite horizontal plane at a fixed height.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatGround {
    pub height: f32,
}

impl GroundProbe for FlatGround {
    fn probe(&self, origin: Vec3, max_distance: f32) -> Option<Vec3> {
        let drop = origin.y - self.height;
        (drop >= 0.0 && drop <= max_distance).then_some(Vec3::Y)
    }
}

/// Constant surface normal everywhere, handy for slopes.
#[derive(Debug, Clone, Copy)]
pub struct InclinedGround(pub Vec3);

impl GroundProbe for InclinedGround {
    fn probe(&self, _origin: Vec3, _max_distance: f32) -> Option<Vec3> {
        self.0.try_normalize()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoGround;

impl GroundProbe for NoGround {
    fn probe(&self, _origin: Vec3, _max_distance: f32) -> Option<Vec3> {
        None
    }
}

/// Position, orientation and velocities of one vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl Body {
    pub fn at(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn stop(&mut self) {
        self.velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
    }
}

/// Turns steering input into a heading and a ground-following velocity.
#[derive(Debug, Clone)]
pub struct VehicleMotionController {
    settings: MotionSettings,
}

impl VehicleMotionController {
    pub fn new(settings: MotionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MotionSettings {
        &self.settings
    }

    /// Advances a freely driven body by one tick.
    ///
    /// Disabled vehicles and vehicles without input get zero velocity and do
    /// not move.
    pub fn step(
        &self,
        body: &mut Body,
        enabled: bool,
        input: Option<Vec3>,
        ground_normal: Option<Vec3>,
        speed: f32,
        dt: f32,
    ) {
        if !enabled {
            body.stop();
            return;
        }
        let Some(direction) = input else {
            body.stop();
            return;
        };

        let flat = Vec3::new(direction.x, 0.0, direction.z);
        if flat.length_squared() > f32::EPSILON {
            let target = Quat::from_rotation_y(flat.x.atan2(flat.z));
            let blend = (dt * self.settings.turn_rate).clamp(0.0, 1.0);
            body.rotation = body.rotation.slerp(target, blend).normalize();
        }

        let forward = body.forward();
        let mut velocity = match ground_normal {
            Some(normal) => project_on_plane(forward, normal)
                .try_normalize()
                .unwrap_or(forward),
            None => forward,
        } * speed;

        if let Some(normal) = ground_normal {
            velocity += self.slope_assist(normal) * dt;
        }

        body.velocity = velocity;
        body.angular_velocity = Vec3::ZERO;
        body.position += velocity * dt;
    }

    /// Extra acceleration up a slope, zero on gentle slopes or when disabled.
    pub fn slope_assist(&self, normal: Vec3) -> Vec3 {
        if !self.settings.slope_assist {
            return Vec3::ZERO;
        }
        let Some(normal) = normal.try_normalize() else {
            return Vec3::ZERO;
        };
        let angle = normal.angle_between(Vec3::Y);
        if angle.to_degrees() < self.settings.slope_min_degrees {
            return Vec3::ZERO;
        }
        let Some(upslope) = project_on_plane(Vec3::Y, normal).try_normalize() else {
            return Vec3::ZERO;
        };
        let magnitude = (angle.sin() * self.settings.slope_multiplier).min(self.settings.slope_max_force);
        upslope * magnitude
    }

    /// Coasts a body that lost control: knock-back velocity and spin decay
    /// exponentially and steering is ignored.
    pub fn coast(&self, body: &mut Body, dt: f32) {
        body.position += body.velocity * dt;
        if body.angular_velocity.length_squared() > f32::EPSILON {
            let spin = Quat::from_scaled_axis(body.angular_velocity * dt);
            body.rotation = (spin * body.rotation).normalize();
        }
        let decay = (-self.settings.knockback_damping * dt).exp();
        body.velocity *= decay;
        body.angular_velocity *= decay;
    }
}

pub fn project_on_plane(vector: Vec3, normal: Vec3) -> Vec3 {
    vector - normal * vector.dot(normal)
}
