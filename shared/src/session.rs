//! Per-peer race orchestration.
//!
//! [`PeerSession`] is the single owner of one peer's view of the match. The
//! network adapter feeds it time through [`PeerSession::tick`] and remote
//! messages through [`PeerSession::apply_message`]; both return the envelopes
//! the adapter has to send. Nothing in here touches a socket or a clock.

use crate::adherence::RespawnReason;
use crate::curve::{look_rotation, CatmullRomLoop, TrackCurve};
use crate::hazards::{
    knockback, layout_obstacles, nearest_rival, touching, Obstacle, Projectile, ProjectileStep, PullLink, PullStep,
};
use crate::items::{ItemKind, ItemTable, ModifierId, PickupField};
use crate::motion::{GroundProbe, InputProvider, VehicleMotionController};
use crate::progress::ProgressEstimator;
use crate::protocol::{Delivery, Envelope, Message};
use crate::race::{RaceCommand, RaceLifecycle, RaceState};
use crate::scheduler::TimerScheduler;
use crate::settings::{secs, Settings, SettingsError};
use crate::vehicle::Vehicle;
use crate::wallet::WalletBook;
use crate::{PlayerId, VehicleId};
use glam::Vec3;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Things a user interface may want to show.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TrackReady { vehicles: usize, pickups: usize, obstacles: usize },
    RaceStarted { round: u32 },
    Respawned { vehicle: VehicleId, reason: RespawnReason, progress: f32 },
    ItemApplied { vehicle: VehicleId, item: ItemKind },
    ItemSkipped { vehicle: VehicleId },
    InvincibilityChanged { vehicle: VehicleId, invincible: bool },
    ProjectileLaunched { projectile: u64, caster: VehicleId, target: VehicleId },
    Detonated { projectile: u64, position: Vec3 },
    Hit { vehicle: VehicleId },
    PullStarted { target: VehicleId, caster: VehicleId },
    PullReleased { target: VehicleId },
    GoldChanged { player: PlayerId, count: u32 },
    GameOver { winner: PlayerId, local_win: bool },
    Restarted { round: u32 },
}

#[derive(Debug, Clone, PartialEq)]
enum TimerEvent {
    StartRace,
    EnableMovement { vehicle: VehicleId },
    EndBoost { vehicle: VehicleId, modifier: ModifierId },
    EndInvincibility { vehicle: VehicleId },
    HideItem { vehicle: VehicleId, generation: u64 },
    RestorePickup { pickup: u32 },
}

pub struct PeerSession {
    local: PlayerId,
    settings: Settings,
    item_table: ItemTable,
    estimator: ProgressEstimator,
    motion: VehicleMotionController,
    race: RaceLifecycle,
    wallets: WalletBook,
    curve: Option<Arc<dyn TrackCurve>>,
    vehicles: BTreeMap<VehicleId, Vehicle>,
    pickups: PickupField,
    obstacles: Vec<Obstacle>,
    projectiles: Vec<Projectile>,
    timers: TimerScheduler<TimerEvent>,
    rng: StdRng,
    now: Duration,
    started: bool,
    next_projectile: u64,
    outbox: Vec<Envelope>,
    events: Vec<SessionEvent>,
}

impl PeerSession {
    pub fn new(local: PlayerId, leader: PlayerId, settings: Settings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let item_table = ItemTable::new(&settings.items.cut_points)?;

        Ok(Self {
            local,
            estimator: ProgressEstimator::new(settings.track.progress_samples),
            motion: VehicleMotionController::new(settings.motion.clone()),
            race: RaceLifecycle::new(local, leader),
            wallets: WalletBook::new(local, settings.items.gold_to_win),
            item_table,
            settings,
            curve: None,
            vehicles: BTreeMap::new(),
            pickups: PickupField::default(),
            obstacles: Vec::new(),
            projectiles: Vec::new(),
            timers: TimerScheduler::new(),
            rng: StdRng::from_entropy(),
            now: Duration::ZERO,
            started: false,
            next_projectile: 1,
            outbox: Vec::new(),
            events: Vec::new(),
        })
    }

    /// Makes item rolls and obstacle placement reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed ^ u64::from(self.local));
        self
    }

    pub fn local(&self) -> PlayerId {
        self.local
    }

    pub fn is_leader(&self) -> bool {
        self.race.is_leader()
    }

    pub fn leader(&self) -> PlayerId {
        self.race.leader()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn race_state(&self) -> RaceState {
        self.race.state()
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn has_track(&self) -> bool {
        self.curve.is_some()
    }

    pub fn curve(&self) -> Option<Arc<dyn TrackCurve>> {
        self.curve.clone()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn local_vehicle(&self) -> Option<&Vehicle> {
        self.vehicles.get(&self.local)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    pub fn gold(&self, player: PlayerId) -> u32 {
        self.wallets.count(player)
    }

    pub fn pickups(&self) -> &PickupField {
        &self.pickups
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn is_invincible(&self, vehicle: VehicleId) -> bool {
        self.vehicles
            .get(&vehicle)
            .map(Vehicle::is_invincible)
            .unwrap_or(false)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    fn send(&mut self, delivery: Delivery, message: Message) {
        self.outbox.push(Envelope::new(delivery, message));
    }

    /// Leader only: freezes the authored track, spawns every vehicle of the
    /// roster and tells everybody, including peers that join later.
    pub fn finalize_track(&mut self, anchors: Vec<Vec3>, roster: Vec<PlayerId>) -> Vec<Envelope> {
        if !self.race.is_leader() {
            warn!("Only the leader can finalize the track");
            return Vec::new();
        }
        if self.curve.is_some() {
            warn!("Track already finalized");
            return Vec::new();
        }

        let curve = CatmullRomLoop::new(anchors.clone());
        let obstacles = layout_obstacles(
            &curve,
            &mut self.rng,
            self.settings.track.obstacle_count,
            self.settings.track.pickup_rows,
            self.settings.track.road_width,
        );
        self.install_track(Arc::new(curve), &roster, obstacles.clone());
        self.send(
            Delivery::Buffered,
            Message::TrackFinalized {
                anchors,
                roster,
                obstacles,
            },
        );
        self.take_outbox()
    }

    /// Builds the race on top of an already final curve. Only the first call
    /// has any effect.
    pub fn install_track(&mut self, curve: Arc<dyn TrackCurve>, roster: &[PlayerId], obstacles: Vec<Vec3>) {
        if self.curve.is_some() {
            debug!("Ignoring second track installation");
            return;
        }

        let mut roster = roster.to_vec();
        roster.sort_unstable();
        roster.dedup();

        let track = &self.settings.track;
        self.pickups = PickupField::along_curve(
            curve.as_ref(),
            track.pickup_rows,
            track.road_width,
            self.settings.items.pickup_radius,
        );
        self.obstacles = obstacles
            .into_iter()
            .map(|position| Obstacle {
                position,
                radius: track.obstacle_radius,
            })
            .collect();

        let start = curve.evaluate(0.0);
        if start.is_none() {
            warn!("Track curve is empty, spawning every vehicle at the origin");
        }
        let count = roster.len();
        for (slot, player) in roster.into_iter().enumerate() {
            let (position, rotation) = match start {
                Some(sample) => {
                    let lane = (slot as f32 - (count as f32 - 1.0) / 2.0) * track.lane_spacing * track.road_width;
                    let lift = track.spawn_lift * track.road_width;
                    (
                        sample.position + sample.side() * lane + sample.normal * lift,
                        look_rotation(sample.tangent, Vec3::Y),
                    )
                }
                None => (Vec3::ZERO, glam::Quat::IDENTITY),
            };
            self.vehicles
                .insert(player, Vehicle::new(player, player, position, rotation, &self.settings));
        }

        info!(
            "Track ready with {} vehicles, {} pickups and {} obstacles",
            self.vehicles.len(),
            self.pickups.pickups().len(),
            self.obstacles.len()
        );
        self.events.push(SessionEvent::TrackReady {
            vehicles: self.vehicles.len(),
            pickups: self.pickups.pickups().len(),
            obstacles: self.obstacles.len(),
        });

        self.curve = Some(curve);
        self.race.set_live(true);
        self.timers
            .schedule(self.now + self.settings.start_delay(), TimerEvent::StartRace);
    }

    /// Advances the simulation by `dt` seconds.
    pub fn tick(&mut self, dt: f32, input: &mut dyn InputProvider, ground: &dyn GroundProbe) -> Vec<Envelope> {
        let dt = dt.max(0.0);
        self.now += Duration::from_secs_f32(dt);

        for event in self.timers.drain_due(self.now) {
            self.handle_timer(event);
        }

        if let Some(curve) = self.curve.clone() {
            self.simulate_local(curve.as_ref(), dt, input, ground);
            self.advance_projectiles(dt);

            let lerp_rate = self.settings.net.lerp_rate;
            let local = self.local;
            for vehicle in self.vehicles.values_mut().filter(|vehicle| vehicle.owner != local) {
                vehicle.interpolate(dt, lerp_rate);
            }
        }

        self.take_outbox()
    }

    /// Snapshot of the locally driven vehicle for broadcasting.
    pub fn local_snapshot(&self) -> Option<Envelope> {
        self.vehicles
            .get(&self.local)
            .map(|vehicle| Envelope::broadcast(Message::Snapshot(vehicle.snapshot())))
    }

    pub fn apply_message(&mut self, from: PlayerId, message: Message) -> Vec<Envelope> {
        match message {
            Message::TrackFinalized {
                anchors,
                roster,
                obstacles,
            } => {
                if from != self.race.leader() {
                    warn!("Ignoring track from non-leader {}", from);
                } else {
                    self.install_track(Arc::new(CatmullRomLoop::new(anchors)), &roster, obstacles);
                }
            }
            Message::Snapshot(snapshot) => match self.vehicles.get_mut(&snapshot.vehicle) {
                Some(vehicle) if vehicle.owner == from && vehicle.owner != self.local => {
                    vehicle.receive_snapshot(snapshot);
                }
                Some(_) => debug!("Dropping snapshot of vehicle {} from {}", snapshot.vehicle, from),
                None => {}
            },
            Message::WinRequest { winner, round } => {
                let commands = self.race.on_win_request(from, winner, round);
                self.run_race_commands(commands);
            }
            Message::GameOver { winner, round } => {
                let commands = self.race.on_game_over(from, winner, round);
                self.run_race_commands(commands);
            }
            Message::RestartRequest { round } => {
                let commands = self.race.on_restart_request(from, round);
                self.run_race_commands(commands);
            }
            Message::Restart { round } => {
                let commands = self.race.on_restart(from, round);
                self.run_race_commands(commands);
            }
            Message::SetInvincible {
                vehicle,
                invincible,
                round,
            } => {
                if !self.is_current_round(round) {
                    debug!("Dropping invincibility of vehicle {} from round {}", vehicle, round);
                } else if let Some(target) = self.vehicles.get_mut(&vehicle) {
                    if target.owner == from && target.effects.set_invincible(invincible) {
                        self.events
                            .push(SessionEvent::InvincibilityChanged { vehicle, invincible });
                    }
                }
            }
            Message::ItemShown { vehicle, item, round } => {
                if !self.is_current_round(round) {
                    debug!("Dropping item display of vehicle {} from round {}", vehicle, round);
                } else if let Some(target) = self.vehicles.get_mut(&vehicle) {
                    if target.owner == from {
                        target.effects.mirror_display(item);
                    }
                }
            }
            Message::PickupConsumed { pickup } => {
                if self.pickups.consume(pickup) {
                    self.schedule_pickup_restore(pickup);
                }
            }
            Message::ProjectileLaunched {
                projectile,
                caster,
                target,
                ..
            } => {
                self.events.push(SessionEvent::ProjectileLaunched {
                    projectile,
                    caster,
                    target,
                });
            }
            Message::Detonation { projectile, position } => {
                self.events.push(SessionEvent::Detonated { projectile, position });
            }
            Message::Hit { vehicle, impulse } => self.hit_local(vehicle, impulse),
            Message::PullRequest { target, caster } => self.start_pull(target, caster),
            Message::WalletUpdate { player, count, round } => {
                if !self.is_current_round(round) {
                    debug!("Dropping gold count of player {} from round {}", player, round);
                } else if player != from {
                    warn!("Player {} tried to update the wallet of {}", from, player);
                } else if self.wallets.apply_remote(player, count) {
                    self.events.push(SessionEvent::GoldChanged { player, count });
                }
            }
        }
        self.take_outbox()
    }

    pub fn request_restart(&mut self) -> Vec<Envelope> {
        let commands = self.race.request_restart();
        self.run_race_commands(commands);
        self.take_outbox()
    }

    pub fn set_movement_enabled(&mut self, vehicle: VehicleId, enabled: bool) {
        if let Some(vehicle) = self.vehicles.get_mut(&vehicle) {
            vehicle.set_movement_enabled(enabled);
        }
    }

    pub fn reset_vehicle(&mut self, vehicle: VehicleId) {
        if let Some(vehicle) = self.vehicles.get_mut(&vehicle) {
            if let Some(timer) = vehicle.enable_timer.take() {
                self.timers.cancel(timer);
            }
            vehicle.reset();
        }
    }

    /// Drops the vehicles of a peer that left the match.
    pub fn remove_player(&mut self, player: PlayerId) {
        let before = self.vehicles.len();
        self.vehicles.retain(|_, vehicle| vehicle.owner != player);
        if self.vehicles.len() != before {
            info!("Removed vehicle of departed player {}", player);
        }
    }

    /// Rolls a random item for a locally owned vehicle and applies it.
    pub fn apply_item_effect(&mut self, vehicle: VehicleId) -> Vec<Envelope> {
        if self.holds_item(vehicle) {
            self.events.push(SessionEvent::ItemSkipped { vehicle });
            return self.take_outbox();
        }
        let item = self.item_table.draw(&mut self.rng);
        self.apply_item(vehicle, item)
    }

    /// Applies a specific item to a locally owned vehicle.
    pub fn apply_item(&mut self, vehicle: VehicleId, item: ItemKind) -> Vec<Envelope> {
        self.apply_item_inner(vehicle, item);
        self.take_outbox()
    }

    /// Replicated item and wallet state is only valid inside the round it was sent in.
    fn is_current_round(&self, round: u32) -> bool {
        round == self.race.round()
    }

    fn run_race_commands(&mut self, commands: Vec<RaceCommand>) {
        for command in commands {
            match command {
                RaceCommand::Send(envelope) => self.outbox.push(envelope),
                RaceCommand::ApplyGameOver { winner } => self.apply_game_over(winner),
                RaceCommand::ApplyRestart { round } => self.apply_restart(round),
            }
        }
    }

    fn apply_game_over(&mut self, winner: PlayerId) {
        for vehicle in self.vehicles.values_mut() {
            vehicle.set_movement_enabled(false);
            vehicle.pull = None;
        }
        info!("Game over, winner is player {}", winner);
        self.events.push(SessionEvent::GameOver {
            winner,
            local_win: winner == self.local,
        });
    }

    fn apply_restart(&mut self, round: u32) {
        self.timers.clear();
        self.projectiles.clear();
        self.started = false;
        for vehicle in self.vehicles.values_mut() {
            vehicle.reset();
        }
        self.wallets.clear();
        self.pickups.restore_all();
        self.timers
            .schedule(self.now + self.settings.start_delay(), TimerEvent::StartRace);
        info!("Round {} restarting", round);
        self.events.push(SessionEvent::Restarted { round });
    }

    fn claim_win(&mut self) {
        let commands = self.race.claim_win(self.local);
        self.run_race_commands(commands);
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::StartRace => {
                if self.race.is_ended() {
                    return;
                }
                self.started = true;
                if let Some(vehicle) = self.vehicles.get_mut(&self.local) {
                    vehicle.set_movement_enabled(true);
                }
                info!("Race started");
                self.events.push(SessionEvent::RaceStarted {
                    round: self.race.round(),
                });
            }
            TimerEvent::EnableMovement { vehicle } => {
                let ended = self.race.is_ended();
                if let Some(vehicle) = self.vehicles.get_mut(&vehicle) {
                    vehicle.enable_timer = None;
                    if !ended {
                        vehicle.set_movement_enabled(true);
                    }
                }
            }
            TimerEvent::EndBoost { vehicle, modifier } => {
                if let Some(vehicle) = self.vehicles.get_mut(&vehicle) {
                    vehicle.speed.pop(modifier);
                }
            }
            TimerEvent::EndInvincibility { vehicle } => {
                let now = self.now;
                let expired = self
                    .vehicles
                    .get_mut(&vehicle)
                    .map(|target| target.effects.expire_invincibility(now))
                    .unwrap_or(false);
                if expired {
                    self.send(
                        Delivery::Broadcast,
                        Message::SetInvincible {
                            vehicle,
                            invincible: false,
                            round: self.race.round(),
                        },
                    );
                    self.events.push(SessionEvent::InvincibilityChanged {
                        vehicle,
                        invincible: false,
                    });
                }
            }
            TimerEvent::HideItem { vehicle, generation } => {
                let hidden = self
                    .vehicles
                    .get_mut(&vehicle)
                    .map(|target| target.effects.hide(generation))
                    .unwrap_or(false);
                if hidden {
                    self.send(
                        Delivery::Broadcast,
                        Message::ItemShown {
                            vehicle,
                            item: None,
                            round: self.race.round(),
                        },
                    );
                }
            }
            TimerEvent::RestorePickup { pickup } => {
                self.pickups.restore(pickup);
            }
        }
    }

    fn simulate_local(
        &mut self,
        curve: &dyn TrackCurve,
        dt: f32,
        input: &mut dyn InputProvider,
        ground: &dyn GroundProbe,
    ) {
        if !self.started || self.race.is_ended() {
            return;
        }
        let id = self.local;
        let now = self.now;
        let Some(vehicle) = self.vehicles.get_mut(&id) else {
            return;
        };

        if let Some(sample) = curve.evaluate(vehicle.progress()) {
            if vehicle.movement_enabled() && vehicle.adherence.should_freeze(vehicle.position(), &sample) {
                debug!("Vehicle {} far off the road, freezing", id);
                vehicle.set_movement_enabled(false);
            }
        }

        if vehicle.movement_enabled() {
            let progress = self.estimator.estimate(curve, vehicle.position());
            vehicle.update_progress(progress);
            vehicle.adherence.record_safe_progress(progress);
            self.drive(id, dt, input, ground);
        }

        let Some(vehicle) = self.vehicles.get_mut(&id) else {
            return;
        };
        let position = vehicle.position();
        let rotation = vehicle.rotation();
        if let Some(sample) = curve.evaluate(vehicle.progress()) {
            if let Some(reason) = vehicle.adherence.check(now, dt, position, rotation, &sample) {
                self.respawn(id, curve, reason);
            }
        }

        self.check_contacts(id);

        let goal_laps = self.settings.rules.goal_laps;
        if let Some(vehicle) = self.vehicles.get_mut(&id) {
            if !vehicle.is_finished() && vehicle.reached_goal(goal_laps) {
                vehicle.mark_finished();
                info!("Vehicle {} completed {} laps", id, goal_laps);
                self.claim_win();
            }
        }
    }

    fn drive(&mut self, id: VehicleId, dt: f32, input: &mut dyn InputProvider, ground: &dyn GroundProbe) {
        let now = self.now;
        let pull = self.vehicles.get_mut(&id).and_then(|vehicle| vehicle.pull.take());

        if let Some(mut link) = pull {
            let caster_pose = self
                .vehicles
                .get(&link.caster)
                .map(|caster| (caster.position(), caster.rotation()));
            let Some(vehicle) = self.vehicles.get_mut(&id) else {
                return;
            };
            match link.advance(caster_pose, dt) {
                PullStep::Pulling(position) => {
                    vehicle.body.position = position;
                    vehicle.body.stop();
                    vehicle.pull = Some(link);
                }
                PullStep::Released(position) => {
                    if let Some(position) = position {
                        vehicle.body.position = position;
                    }
                    vehicle.body.stop();
                    self.events.push(SessionEvent::PullReleased { target: id });
                }
            }
            return;
        }

        let Some(vehicle) = self.vehicles.get_mut(&id) else {
            return;
        };
        if vehicle.is_control_locked(now) {
            self.motion.coast(&mut vehicle.body, dt);
            return;
        }

        let direction = input.direction(vehicle);
        let settings = self.motion.settings();
        let normal = ground.probe(
            vehicle.position() + Vec3::Y * settings.probe_height,
            settings.probe_height + settings.probe_distance,
        );
        let speed = vehicle.speed.effective();
        let enabled = vehicle.movement_enabled();
        self.motion
            .step(&mut vehicle.body, enabled, direction, normal, speed, dt);
    }

    fn respawn(&mut self, id: VehicleId, curve: &dyn TrackCurve, reason: RespawnReason) {
        let now = self.now;
        let cooldown = self.settings.adherence.respawn_cooldown();
        let Some(vehicle) = self.vehicles.get_mut(&id) else {
            return;
        };

        let progress = vehicle.adherence.begin_respawn(now);
        let Some((position, rotation)) = vehicle.adherence.respawn_pose(curve, progress) else {
            warn!("Cannot respawn vehicle {}, track has no samples", id);
            return;
        };
        vehicle.place_at(position, rotation, progress);
        vehicle.pull = None;
        vehicle.release_control();
        vehicle.set_movement_enabled(false);

        if let Some(timer) = vehicle.enable_timer.take() {
            self.timers.cancel(timer);
        }
        vehicle.enable_timer = Some(
            self.timers
                .schedule(now + cooldown, TimerEvent::EnableMovement { vehicle: id }),
        );

        info!("Respawned vehicle {} at progress {:.3} ({:?})", id, progress, reason);
        self.events.push(SessionEvent::Respawned {
            vehicle: id,
            reason,
            progress,
        });
    }

    fn check_contacts(&mut self, id: VehicleId) {
        let now = self.now;
        let radius = self.settings.track.vehicle_radius;
        let Some(vehicle) = self.vehicles.get(&id) else {
            return;
        };
        if !vehicle.movement_enabled() {
            return;
        }
        let position = vehicle.position();

        if !vehicle.is_invincible() && !vehicle.is_control_locked(now) {
            if let Some(index) = touching(&self.obstacles, position, radius) {
                let impulse = knockback(self.obstacles[index].position, position, self.settings.items.hit_impulse);
                self.hit_local(id, impulse);
            }
        }

        if let Some(pickup) = self.pickups.contact(position, radius) {
            self.collect_pickup(id, pickup);
        }
    }

    fn collect_pickup(&mut self, id: VehicleId, pickup: u32) {
        if !self.pickups.consume(pickup) {
            return;
        }
        self.send(Delivery::Broadcast, Message::PickupConsumed { pickup });
        self.schedule_pickup_restore(pickup);

        if self.holds_item(id) {
            self.events.push(SessionEvent::ItemSkipped { vehicle: id });
            return;
        }
        let item = self.item_table.draw(&mut self.rng);
        self.apply_item_inner(id, item);
    }

    /// Unknown vehicles count as holding an item so nothing gets applied to them.
    fn holds_item(&self, id: VehicleId) -> bool {
        self.vehicles
            .get(&id)
            .map(|vehicle| vehicle.effects.has_item())
            .unwrap_or(true)
    }

    fn schedule_pickup_restore(&mut self, pickup: u32) {
        let deadline = self.now + secs(self.settings.items.pickup_respawn_delay);
        self.timers.schedule(deadline, TimerEvent::RestorePickup { pickup });
    }

    fn apply_item_inner(&mut self, id: VehicleId, item: ItemKind) {
        match self.vehicles.get(&id) {
            Some(vehicle) if vehicle.owner == self.local => {}
            Some(_) => {
                warn!("Item effects only apply to locally owned vehicles, not {}", id);
                return;
            }
            None => {
                warn!("Item effect for unknown vehicle {}", id);
                return;
            }
        }

        let now = self.now;
        let items = self.settings.items.clone();
        match item {
            ItemKind::RedOil => self.with_vehicle(id, |vehicle| vehicle.speed.scale_permanent(items.red_oil_factor)),
            ItemKind::GreenOil => self.with_vehicle(id, |vehicle| vehicle.speed.scale_permanent(items.green_oil_factor)),
            ItemKind::Bomb => self.launch_bomb(id),
            ItemKind::Crown => {
                let until = now + secs(items.invincibility_duration);
                let flipped = self
                    .vehicles
                    .get_mut(&id)
                    .map(|vehicle| vehicle.effects.grant_invincibility(until))
                    .unwrap_or(false);
                if flipped {
                    self.send(
                        Delivery::Broadcast,
                        Message::SetInvincible {
                            vehicle: id,
                            invincible: true,
                            round: self.race.round(),
                        },
                    );
                    self.events.push(SessionEvent::InvincibilityChanged {
                        vehicle: id,
                        invincible: true,
                    });
                }
                self.timers
                    .schedule(until, TimerEvent::EndInvincibility { vehicle: id });
            }
            ItemKind::Booster => {
                if let Some(vehicle) = self.vehicles.get_mut(&id) {
                    let modifier = vehicle.speed.push(items.boost_factor);
                    self.timers.schedule(
                        now + secs(items.boost_duration),
                        TimerEvent::EndBoost { vehicle: id, modifier },
                    );
                }
            }
            ItemKind::Gold => {
                let gain = self.wallets.gain_local();
                self.send(
                    Delivery::Broadcast,
                    Message::WalletUpdate {
                        player: self.local,
                        count: gain.count,
                        round: self.race.round(),
                    },
                );
                self.events.push(SessionEvent::GoldChanged {
                    player: self.local,
                    count: gain.count,
                });
                if gain.reached_threshold {
                    info!("Player {} collected {} gold", self.local, gain.count);
                    self.claim_win();
                }
            }
            ItemKind::Hook => self.cast_hook(id),
        }

        let display = match item {
            ItemKind::Crown => items.invincibility_duration,
            _ => items.display_duration,
        };
        if let Some(vehicle) = self.vehicles.get_mut(&id) {
            let generation = vehicle.effects.show(item);
            self.timers
                .schedule(now + secs(display), TimerEvent::HideItem { vehicle: id, generation });
        }
        self.send(
            Delivery::Broadcast,
            Message::ItemShown {
                vehicle: id,
                item: Some(item),
                round: self.race.round(),
            },
        );
        debug!("Vehicle {} used {:?}", id, item);
        self.events.push(SessionEvent::ItemApplied { vehicle: id, item });
    }

    fn with_vehicle(&mut self, id: VehicleId, f: impl FnOnce(&mut Vehicle)) {
        if let Some(vehicle) = self.vehicles.get_mut(&id) {
            f(vehicle);
        }
    }

    fn rival_of(&self, id: VehicleId) -> Option<(VehicleId, Vec3)> {
        let origin = self.vehicles.get(&id)?.position();
        let target = nearest_rival(
            id,
            origin,
            self.vehicles.values().map(|vehicle| (vehicle.id, vehicle.position())),
        )?;
        Some((target, origin))
    }

    fn launch_bomb(&mut self, caster: VehicleId) {
        let Some((target, origin)) = self.rival_of(caster) else {
            debug!("No rival for the bomb of vehicle {}", caster);
            return;
        };
        let id = (u64::from(self.local) << 32) | self.next_projectile;
        self.next_projectile += 1;

        let items = &self.settings.items;
        self.projectiles.push(Projectile::launch(
            id,
            caster,
            target,
            origin,
            items.bomb_speed,
            items.bomb_trigger_distance,
            items.bomb_timeout,
        ));
        self.send(
            Delivery::Broadcast,
            Message::ProjectileLaunched {
                projectile: id,
                caster,
                target,
                position: origin,
            },
        );
        self.events.push(SessionEvent::ProjectileLaunched {
            projectile: id,
            caster,
            target,
        });
    }

    fn advance_projectiles(&mut self, dt: f32) {
        let mut flying = Vec::new();
        let mut detonations = Vec::new();
        for mut projectile in std::mem::take(&mut self.projectiles) {
            let target = self.vehicles.get(&projectile.target).map(Vehicle::position);
            match projectile.advance(target, dt) {
                ProjectileStep::Flying => flying.push(projectile),
                ProjectileStep::Detonate(position) => detonations.push((projectile, position)),
            }
        }
        self.projectiles = flying;

        for (projectile, position) in detonations {
            self.detonate(&projectile, position);
        }
    }

    fn detonate(&mut self, projectile: &Projectile, position: Vec3) {
        let items = &self.settings.items;
        let victims: Vec<(VehicleId, PlayerId, Vec3)> = self
            .vehicles
            .values()
            .filter(|vehicle| vehicle.id != projectile.caster && !vehicle.is_invincible())
            .filter(|vehicle| vehicle.position().distance(position) <= items.blast_radius)
            .map(|vehicle| (vehicle.id, vehicle.owner, vehicle.position()))
            .collect();
        let strength = items.hit_impulse;

        for (vehicle, owner, at) in victims {
            let impulse = knockback(position, at, strength);
            if owner == self.local {
                self.hit_local(vehicle, impulse);
            } else {
                self.send(Delivery::To(owner), Message::Hit { vehicle, impulse });
            }
        }

        self.send(
            Delivery::Broadcast,
            Message::Detonation {
                projectile: projectile.id,
                position,
            },
        );
        self.events.push(SessionEvent::Detonated {
            projectile: projectile.id,
            position,
        });
    }

    fn hit_local(&mut self, id: VehicleId, impulse: Vec3) {
        let now = self.now;
        let spin = self.settings.items.hit_spin;
        let lock = secs(self.settings.items.hit_lock);
        let Some(vehicle) = self.vehicles.get_mut(&id) else {
            return;
        };
        if vehicle.owner != self.local {
            warn!("Hit for vehicle {} owned by {}", id, vehicle.owner);
            return;
        }
        if !vehicle.movement_enabled() || vehicle.is_invincible() {
            debug!("Vehicle {} shrugs off a hit", id);
            return;
        }
        vehicle.apply_hit(impulse, spin, now, lock);
        self.events.push(SessionEvent::Hit { vehicle: id });
    }

    fn cast_hook(&mut self, caster: VehicleId) {
        let Some((target, _)) = self.rival_of(caster) else {
            debug!("No rival for the hook of vehicle {}", caster);
            return;
        };
        let Some(owner) = self.vehicles.get(&target).map(|vehicle| vehicle.owner) else {
            return;
        };
        if owner == self.local {
            self.start_pull(target, caster);
        } else {
            self.send(Delivery::To(owner), Message::PullRequest { target, caster });
        }
    }

    fn start_pull(&mut self, target: VehicleId, caster: VehicleId) {
        let items = &self.settings.items;
        let (offset, duration) = (items.hook_offset, items.hook_duration);
        let Some(vehicle) = self.vehicles.get_mut(&target) else {
            return;
        };
        if vehicle.owner != self.local || !vehicle.movement_enabled() {
            debug!("Vehicle {} cannot be pulled right now", target);
            return;
        }
        vehicle.release_control();
        vehicle.pull = Some(PullLink::new(caster, vehicle.position(), offset, duration));
        self.events.push(SessionEvent::PullStarted { target, caster });
    }
}
