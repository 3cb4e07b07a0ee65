use crate::curve::TrackCurve;
use crate::settings::{validate_cut_points, SettingsError};
use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// Permanently slows the picker down.
    RedOil,
    /// Permanently speeds the picker up.
    GreenOil,
    /// Homing projectile aimed at the nearest rival.
    Bomb,
    /// Temporary invincibility.
    Crown,
    /// Temporary speed multiplier.
    Booster,
    /// One coin in the replicated gold wallet.
    Gold,
    /// Pulls the nearest rival behind the picker.
    Hook,
}

const KINDS: [ItemKind; 7] = [
    ItemKind::RedOil,
    ItemKind::GreenOil,
    ItemKind::Bomb,
    ItemKind::Crown,
    ItemKind::Booster,
    ItemKind::Gold,
    ItemKind::Hook,
];

/// Maps a uniform roll in `0..100` to an item through cumulative cut points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTable {
    cut_points: [u32; 7],
}

impl ItemTable {
    pub fn new(cut_points: &[u32]) -> Result<Self, SettingsError> {
        validate_cut_points(cut_points)?;
        let mut table = [0; 7];
        table.copy_from_slice(cut_points);
        Ok(Self { cut_points: table })
    }

    pub fn select(&self, roll: u32) -> ItemKind {
        self.cut_points
            .iter()
            .position(|&cut| roll < cut)
            .map(|index| KINDS[index])
            .unwrap_or(ItemKind::Hook)
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> ItemKind {
        self.select(rng.gen_range(0..100))
    }
}

impl Default for ItemTable {
    fn default() -> Self {
        Self {
            cut_points: [15, 30, 50, 70, 80, 95, 100],
        }
    }
}

pub type ModifierId = u64;

/// Composable speed: `base * permanent * product(temporary)`.
///
/// Temporary modifiers are removed by handle, so overlapping boosts each undo
/// exactly their own contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedModifiers {
    base: f32,
    permanent: f32,
    temporary: Vec<(ModifierId, f32)>,
    next_id: ModifierId,
}

impl SpeedModifiers {
    pub fn new(base: f32) -> Self {
        Self {
            base,
            permanent: 1.0,
            temporary: Vec::new(),
            next_id: 1,
        }
    }

    pub fn effective(&self) -> f32 {
        self.temporary
            .iter()
            .fold(self.base * self.permanent, |speed, (_, factor)| speed * factor)
    }

    pub fn base(&self) -> f32 {
        self.base
    }

    pub fn scale_permanent(&mut self, factor: f32) {
        self.permanent *= factor;
    }

    pub fn push(&mut self, factor: f32) -> ModifierId {
        let id = self.next_id;
        self.next_id += 1;
        self.temporary.push((id, factor));
        id
    }

    pub fn pop(&mut self, id: ModifierId) -> bool {
        let before = self.temporary.len();
        self.temporary.retain(|(modifier, _)| *modifier != id);
        self.temporary.len() != before
    }

    pub fn active_modifiers(&self) -> usize {
        self.temporary.len()
    }

    pub fn reset(&mut self) {
        self.permanent = 1.0;
        self.temporary.clear();
    }
}

/// Per-vehicle item state: invincibility and the item currently shown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemEffectState {
    invincible: bool,
    invincible_until: Option<Duration>,
    displayed: Option<ItemKind>,
    display_generation: u64,
}

impl ItemEffectState {
    pub fn is_invincible(&self) -> bool {
        self.invincible
    }

    pub fn invincible_until(&self) -> Option<Duration> {
        self.invincible_until
    }

    /// Starts or extends invincibility. Returns true when the flag flipped.
    pub fn grant_invincibility(&mut self, until: Duration) -> bool {
        let was = self.invincible;
        self.invincible = true;
        self.invincible_until = Some(match self.invincible_until {
            Some(current) if current > until => current,
            _ => until,
        });
        !was
    }

    /// Clears invincibility only if its deadline has passed, so an expiry
    /// scheduled by an earlier crown cannot cut a later one short.
    pub fn expire_invincibility(&mut self, now: Duration) -> bool {
        match self.invincible_until {
            Some(until) if now >= until && self.invincible => {
                self.invincible = false;
                self.invincible_until = None;
                true
            }
            _ => false,
        }
    }

    /// Mirrors a replicated flag; returns false when nothing changed.
    pub fn set_invincible(&mut self, invincible: bool) -> bool {
        if self.invincible == invincible {
            return false;
        }
        self.invincible = invincible;
        if !invincible {
            self.invincible_until = None;
        }
        true
    }

    pub fn displayed(&self) -> Option<ItemKind> {
        self.displayed
    }

    pub fn has_item(&self) -> bool {
        self.displayed.is_some()
    }

    /// Shows an item and returns the generation the hide timer must present.
    pub fn show(&mut self, item: ItemKind) -> u64 {
        self.display_generation += 1;
        self.displayed = Some(item);
        self.display_generation
    }

    /// Hides the item if `generation` is still the one being shown.
    pub fn hide(&mut self, generation: u64) -> bool {
        if generation != self.display_generation || self.displayed.is_none() {
            return false;
        }
        self.displayed = None;
        true
    }

    pub fn mirror_display(&mut self, item: Option<ItemKind>) {
        self.displayed = item;
    }

    pub fn reset(&mut self) {
        self.invincible = false;
        self.invincible_until = None;
        self.displayed = None;
        self.display_generation += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pickup {
    pub id: u32,
    pub position: Vec3,
    pub active: bool,
}

/// Item boxes laid out in rows across the track.
#[derive(Debug, Clone, Default)]
pub struct PickupField {
    pickups: Vec<Pickup>,
    radius: f32,
}

/// Lateral lanes of the road; pickups occupy lanes 1, 3 and 5.
const LANES: usize = 7;
const PICKUP_LANES: [usize; 3] = [1, 3, 5];

impl PickupField {
    /// Rows at `t = i / rows` for `i` in `1..rows`, three boxes per row.
    pub fn along_curve(curve: &dyn TrackCurve, rows: usize, road_width: f32, radius: f32) -> Self {
        let mut pickups = Vec::new();
        let lane_width = road_width / LANES as f32;
        for row in 1..rows {
            let t = row as f32 / rows as f32;
            let Some(sample) = curve.evaluate(t) else {
                break;
            };
            for lane in PICKUP_LANES {
                let offset = -road_width / 2.0 + lane_width * (lane as f32 + 0.5);
                pickups.push(Pickup {
                    id: pickups.len() as u32,
                    position: sample.position + sample.side() * offset,
                    active: true,
                });
            }
        }
        Self { pickups, radius }
    }

    pub fn pickups(&self) -> &[Pickup] {
        &self.pickups
    }

    /// First active pickup within reach of `position`.
    pub fn contact(&self, position: Vec3, vehicle_radius: f32) -> Option<u32> {
        let reach = self.radius + vehicle_radius;
        self.pickups
            .iter()
            .find(|pickup| pickup.active && pickup.position.distance(position) <= reach)
            .map(|pickup| pickup.id)
    }

    pub fn consume(&mut self, id: u32) -> bool {
        match self.pickups.iter_mut().find(|pickup| pickup.id == id) {
            Some(pickup) if pickup.active => {
                pickup.active = false;
                true
            }
            _ => false,
        }
    }

    pub fn restore(&mut self, id: u32) -> bool {
        match self.pickups.iter_mut().find(|pickup| pickup.id == id) {
            Some(pickup) if !pickup.active => {
                pickup.active = true;
                true
            }
            _ => false,
        }
    }

    pub fn restore_all(&mut self) {
        for pickup in &mut self.pickups {
            pickup.active = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CatmullRomLoop;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn test_item_table_boundaries() {
        let table = ItemTable::default();
        assert_eq!(table.select(0), ItemKind::RedOil);
        assert_eq!(table.select(14), ItemKind::RedOil);
        assert_eq!(table.select(15), ItemKind::GreenOil);
        assert_eq!(table.select(29), ItemKind::GreenOil);
        assert_eq!(table.select(30), ItemKind::Bomb);
        assert_eq!(table.select(50), ItemKind::Crown);
        assert_eq!(table.select(70), ItemKind::Booster);
        assert_eq!(table.select(80), ItemKind::Gold);
        assert_eq!(table.select(94), ItemKind::Gold);
        assert_eq!(table.select(95), ItemKind::Hook);
        assert_eq!(table.select(99), ItemKind::Hook);
    }

    #[test]
    fn test_item_table_from_settings() {
        let table = ItemTable::new(&[0, 0, 0, 0, 100, 100, 100]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(table.draw(&mut rng), ItemKind::Booster);
        }
        assert!(ItemTable::new(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_overlapping_boosts_restore_base() {
        let mut speed = SpeedModifiers::new(0.3);
        let first = speed.push(2.0);
        let second = speed.push(2.0);
        assert_approx_eq!(speed.effective(), 1.2, 1e-5);

        assert!(speed.pop(first));
        assert_approx_eq!(speed.effective(), 0.6, 1e-5);
        assert!(speed.pop(second));
        assert_approx_eq!(speed.effective(), 0.3, 1e-5);
        assert!(!speed.pop(second));
    }

    #[test]
    fn test_permanent_modifiers_compose_with_boost() {
        let mut speed = SpeedModifiers::new(1.0);
        speed.scale_permanent(0.9);
        let boost = speed.push(2.0);
        speed.scale_permanent(1.1);
        speed.pop(boost);
        assert_approx_eq!(speed.effective(), 0.99, 1e-5);
        speed.reset();
        assert_approx_eq!(speed.effective(), 1.0, 1e-6);
    }

    #[test]
    fn test_stale_invincibility_expiry_is_ignored() {
        let mut effects = ItemEffectState::default();
        assert!(effects.grant_invincibility(secs(5.0)));
        assert!(!effects.grant_invincibility(secs(8.0)));

        assert!(!effects.expire_invincibility(secs(5.0)));
        assert!(effects.is_invincible());
        assert!(effects.expire_invincibility(secs(8.0)));
        assert!(!effects.is_invincible());
    }

    #[test]
    fn test_display_generation() {
        let mut effects = ItemEffectState::default();
        let first = effects.show(ItemKind::Bomb);
        let second = effects.show(ItemKind::Gold);
        assert!(!effects.hide(first));
        assert_eq!(effects.displayed(), Some(ItemKind::Gold));
        assert!(effects.hide(second));
        assert!(!effects.has_item());
    }

    #[test]
    fn test_pickup_layout() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 10.0, 16);
        let field = PickupField::along_curve(&curve, 8, 0.7, 0.05);
        assert_eq!(field.pickups().len(), 7 * 3);

        let row = curve.evaluate(1.0 / 8.0).unwrap();
        let middle = &field.pickups()[1];
        assert!(middle.position.distance(row.position) < 1e-4);
        let outer = &field.pickups()[0];
        assert_approx_eq!(outer.position.distance(row.position), 0.2, 1e-4);
    }

    #[test]
    fn test_pickup_consume_and_restore() {
        let curve = CatmullRomLoop::circle(Vec3::ZERO, 10.0, 16);
        let mut field = PickupField::along_curve(&curve, 4, 0.7, 0.05);
        let target = field.pickups()[4].position;

        let id = field.contact(target, 0.05).unwrap();
        assert!(field.consume(id));
        assert!(!field.consume(id));
        assert_eq!(field.contact(target, 0.05), None);
        assert!(field.restore(id));
        assert_eq!(field.contact(target, 0.05), Some(id));
    }
}
