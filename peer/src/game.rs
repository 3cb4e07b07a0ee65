use glam::Vec3;
use log::{debug, info};
use shared::session::{PeerSession, SessionEvent};
use shared::{PlayerId, VehicleId};
use std::f32::consts::TAU;

/// Anchors of the built-in demo track: a stretched oval with two gentle hills.
pub fn demo_track_anchors(radius: f32, count: usize) -> Vec<Vec3> {
    let count = count.max(4);
    (0..count)
        .map(|i| {
            let angle = i as f32 / count as f32 * TAU;
            Vec3::new(
                angle.cos() * radius * 1.5,
                (angle * 2.0).sin() * radius * 0.05,
                angle.sin() * radius,
            )
        })
        .collect()
}

/// One line of the scoreboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub player: PlayerId,
    pub lap_progress: f32,
    pub finished: bool,
    pub gold: u32,
}

/// Orders every vehicle by lap progress, leader of the race first.
pub fn standings(session: &PeerSession) -> Vec<Standing> {
    let mut standings: Vec<Standing> = session
        .vehicles()
        .map(|vehicle| Standing {
            player: vehicle.owner,
            lap_progress: vehicle.lap_progress(),
            finished: vehicle.is_finished(),
            gold: session.gold(vehicle.owner),
        })
        .collect();
    standings.sort_by(|a, b| b.lap_progress.total_cmp(&a.lap_progress));
    standings
}

/// Turns session events into log lines and keeps a few totals around.
#[derive(Debug, Default)]
pub struct RaceLog {
    local: PlayerId,
    respawns: u32,
    items: u32,
    hits: u32,
    finished_rounds: u32,
    last_winner: Option<PlayerId>,
}

impl RaceLog {
    pub fn new(local: PlayerId) -> Self {
        Self {
            local,
            ..Self::default()
        }
    }

    pub fn respawns(&self) -> u32 {
        self.respawns
    }

    pub fn items(&self) -> u32 {
        self.items
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn finished_rounds(&self) -> u32 {
        self.finished_rounds
    }

    pub fn last_winner(&self) -> Option<PlayerId> {
        self.last_winner
    }

    fn is_local(&self, vehicle: VehicleId) -> bool {
        vehicle == self.local
    }

    pub fn record(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::TrackReady {
                vehicles,
                pickups,
                obstacles,
            } => {
                info!(
                    "Track ready: {} vehicles, {} pickups, {} obstacles",
                    vehicles, pickups, obstacles
                );
            }
            SessionEvent::RaceStarted { round } => {
                info!("Round {} started, go!", round);
            }
            SessionEvent::Respawned {
                vehicle,
                reason,
                progress,
            } => {
                if self.is_local(*vehicle) {
                    self.respawns += 1;
                }
                info!("Vehicle {} respawned at {:.3} ({:?})", vehicle, progress, reason);
            }
            SessionEvent::ItemApplied { vehicle, item } => {
                if self.is_local(*vehicle) {
                    self.items += 1;
                }
                info!("Vehicle {} got {:?}", vehicle, item);
            }
            SessionEvent::ItemSkipped { vehicle } => {
                debug!("Vehicle {} already holds an item", vehicle);
            }
            SessionEvent::InvincibilityChanged { vehicle, invincible } => {
                debug!("Vehicle {} invincible: {}", vehicle, invincible);
            }
            SessionEvent::ProjectileLaunched {
                projectile,
                caster,
                target,
            } => {
                info!("Bomb {} launched by {} at {}", projectile, caster, target);
            }
            SessionEvent::Detonated { projectile, position } => {
                debug!("Bomb {} detonated at {:?}", projectile, position);
            }
            SessionEvent::Hit { vehicle } => {
                if self.is_local(*vehicle) {
                    self.hits += 1;
                }
                info!("Vehicle {} was hit", vehicle);
            }
            SessionEvent::PullStarted { target, caster } => {
                info!("Vehicle {} hooked by {}", target, caster);
            }
            SessionEvent::PullReleased { target } => {
                debug!("Vehicle {} released from hook", target);
            }
            SessionEvent::GoldChanged { player, count } => {
                info!("Player {} has {} gold", player, count);
            }
            SessionEvent::GameOver { winner, local_win } => {
                self.finished_rounds += 1;
                self.last_winner = Some(*winner);
                if *local_win {
                    info!("You win!");
                } else {
                    info!("Player {} wins", winner);
                }
            }
            SessionEvent::Restarted { round } => {
                info!("Race restarted, round {}", round);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::items::ItemKind;
    use shared::settings::Settings;

    #[test]
    fn test_demo_track_is_closed_oval() {
        let anchors = demo_track_anchors(3.0, 16);
        assert_eq!(anchors.len(), 16);
        assert!((anchors[0].x - 4.5).abs() < 1e-5);
        assert!(anchors.iter().all(|anchor| anchor.y.abs() <= 0.15 + 1e-5));
        assert_eq!(demo_track_anchors(3.0, 2).len(), 4);
    }

    #[test]
    fn test_race_log_counts_local_events() {
        let mut log = RaceLog::new(1);
        log.record(&SessionEvent::ItemApplied {
            vehicle: 1,
            item: ItemKind::Booster,
        });
        log.record(&SessionEvent::ItemApplied {
            vehicle: 2,
            item: ItemKind::Gold,
        });
        log.record(&SessionEvent::Hit { vehicle: 1 });
        log.record(&SessionEvent::GameOver {
            winner: 2,
            local_win: false,
        });

        assert_eq!(log.items(), 1);
        assert_eq!(log.hits(), 1);
        assert_eq!(log.finished_rounds(), 1);
        assert_eq!(log.last_winner(), Some(2));
    }

    #[test]
    fn test_standings_follow_roster() {
        let mut settings = Settings::default();
        settings.track.pickup_rows = 0;
        settings.track.obstacle_count = 0;
        let mut session = PeerSession::new(1, 1, settings).unwrap().with_seed(3);
        session.finalize_track(demo_track_anchors(3.0, 12), vec![2, 1]);

        let board = standings(&session);
        assert_eq!(board.len(), 2);
        assert!(board.iter().all(|standing| !standing.finished && standing.gold == 0));
    }
}
