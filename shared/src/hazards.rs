use crate::curve::TrackCurve;
use crate::VehicleId;
use glam::{Quat, Vec3};
use log::debug;
use rand::Rng;

/// Homing bomb, simulated only by the peer that launched it.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: u64,
    pub caster: VehicleId,
    pub target: VehicleId,
    pub position: Vec3,
    speed: f32,
    trigger_distance: f32,
    timeout: f32,
    age: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectileStep {
    Flying,
    Detonate(Vec3),
}

impl Projectile {
    pub fn launch(
        id: u64,
        caster: VehicleId,
        target: VehicleId,
        position: Vec3,
        speed: f32,
        trigger_distance: f32,
        timeout: f32,
    ) -> Self {
        Self {
            id,
            caster,
            target,
            position,
            speed,
            trigger_distance,
            timeout,
            age: 0.0,
        }
    }

    /// Moves toward the target's current position. A missing target makes
    /// the bomb go off where it is.
    pub fn advance(&mut self, target_position: Option<Vec3>, dt: f32) -> ProjectileStep {
        self.age += dt;
        let Some(target) = target_position else {
            debug!("Projectile {} lost target {}", self.id, self.target);
            return ProjectileStep::Detonate(self.position);
        };

        let to_target = target - self.position;
        let distance = to_target.length();
        let travel = self.speed * dt;
        if distance <= travel {
            self.position = target;
        } else {
            self.position += to_target / distance * travel;
        }

        if self.position.distance(target) <= self.trigger_distance || self.age >= self.timeout {
            ProjectileStep::Detonate(self.position)
        } else {
            ProjectileStep::Flying
        }
    }
}

/// Eased pull of a hooked vehicle toward a point behind the caster.
#[derive(Debug, Clone, PartialEq)]
pub struct PullLink {
    pub caster: VehicleId,
    start: Vec3,
    offset: f32,
    duration: f32,
    elapsed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PullStep {
    Pulling(Vec3),
    Released(Option<Vec3>),
}

impl PullLink {
    pub fn new(caster: VehicleId, start: Vec3, offset: f32, duration: f32) -> Self {
        Self {
            caster,
            start,
            offset,
            duration,
            elapsed: 0.0,
        }
    }

    /// Returns where the hooked vehicle should be this tick. Releases early
    /// when the caster disappears.
    pub fn advance(&mut self, caster_pose: Option<(Vec3, Quat)>, dt: f32) -> PullStep {
        let Some((position, rotation)) = caster_pose else {
            return PullStep::Released(None);
        };
        self.elapsed += dt;
        let destination = position - rotation * Vec3::Z * self.offset;
        let x = if self.duration <= 0.0 {
            1.0
        } else {
            (self.elapsed / self.duration).clamp(0.0, 1.0)
        };
        let pulled = self.start.lerp(destination, smoothstep(x));
        if x >= 1.0 {
            PullStep::Released(Some(pulled))
        } else {
            PullStep::Pulling(pulled)
        }
    }
}

pub fn smoothstep(x: f32) -> f32 {
    let x = x.clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}

/// Closest vehicle to `origin` other than `exclude`.
pub fn nearest_rival(
    exclude: VehicleId,
    origin: Vec3,
    vehicles: impl IntoIterator<Item = (VehicleId, Vec3)>,
) -> Option<VehicleId> {
    vehicles
        .into_iter()
        .filter(|(id, _)| *id != exclude)
        .map(|(id, position)| (id, position.distance_squared(origin)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}

/// Static hazard on the road.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub position: Vec3,
    pub radius: f32,
}

const MAX_PLACEMENT_ATTEMPTS: usize = 200;
const ITEM_ROW_CLEARANCE: f32 = 0.03;
const OBSTACLE_CLEARANCE: f32 = 0.05;

/// Scatters up to `count` obstacles over the road, away from the item rows
/// at `k / item_rows` and from each other. Gives up after a fixed number of
/// attempts, so the result may hold fewer than `count` positions.
pub fn layout_obstacles<R: Rng + ?Sized>(
    curve: &dyn TrackCurve,
    rng: &mut R,
    count: usize,
    item_rows: usize,
    road_width: f32,
) -> Vec<Vec3> {
    let mut placed_t: Vec<f32> = Vec::new();
    let mut positions = Vec::new();
    let mut attempts = 0;

    while positions.len() < count && attempts < MAX_PLACEMENT_ATTEMPTS {
        attempts += 1;
        let t: f32 = rng.gen_range(0.05..0.95);
        let lateral: f32 = rng.gen_range(-0.45..0.45) * road_width;

        let near_items = item_rows > 0
            && (1..item_rows).any(|k| (t - k as f32 / item_rows as f32).abs() < ITEM_ROW_CLEARANCE);
        let near_other = placed_t.iter().any(|other| (t - other).abs() < OBSTACLE_CLEARANCE);
        if near_items || near_other {
            continue;
        }
        let Some(sample) = curve.evaluate(t) else {
            break;
        };
        placed_t.push(t);
        positions.push(sample.position + sample.side() * lateral);
    }

    if positions.len() < count {
        debug!("Placed {} of {} obstacles after {} attempts", positions.len(), count, attempts);
    }
    positions
}

/// Index of the first obstacle overlapping a vehicle.
pub fn touching(obstacles: &[Obstacle], position: Vec3, vehicle_radius: f32) -> Option<usize> {
    obstacles
        .iter()
        .position(|obstacle| obstacle.position.distance(position) <= obstacle.radius + vehicle_radius)
}

/// Knock-back direction away from `from`, tipped slightly upwards.
pub fn knockback(from: Vec3, to: Vec3, strength: f32) -> Vec3 {
    let away = Vec3::new(to.x - from.x, 0.0, to.z - from.z)
        .try_normalize()
        .unwrap_or(Vec3::X);
    (away + Vec3::Y * 0.25).normalize() * strength
}
