//! Win and restart arbitration.
//!
//! Any peer may claim a win, only the leader commits one. The leader checks
//! its `ended` latch before acting, so when several claims race each other
//! the first one to arrive wins and the rest are dropped. Restarts work the
//! same way with a round counter: a request names the round it wants to end,
//! and everything tagged with an older round is ignored.

use crate::protocol::{Delivery, Envelope, Message};
use crate::PlayerId;
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RaceState {
    pub ended: bool,
    pub winner: Option<PlayerId>,
    pub round: u32,
}

/// What the session has to do after the lifecycle accepted something.
#[derive(Debug, Clone, PartialEq)]
pub enum RaceCommand {
    Send(Envelope),
    ApplyGameOver { winner: PlayerId },
    ApplyRestart { round: u32 },
}

#[derive(Debug, Clone)]
pub struct RaceLifecycle {
    local: PlayerId,
    leader: PlayerId,
    state: RaceState,
    live: bool,
}

impl RaceLifecycle {
    pub fn new(local: PlayerId, leader: PlayerId) -> Self {
        Self {
            local,
            leader,
            state: RaceState::default(),
            live: false,
        }
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn is_leader(&self) -> bool {
        self.local == self.leader
    }

    pub fn leader(&self) -> PlayerId {
        self.leader
    }

    pub fn is_ended(&self) -> bool {
        self.state.ended
    }

    pub fn round(&self) -> u32 {
        self.state.round
    }

    /// Restarts are accepted once vehicles exist.
    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// The local player crossed the goal or hit the gold threshold.
    pub fn claim_win(&mut self, winner: PlayerId) -> Vec<RaceCommand> {
        if self.state.ended {
            debug!("Race already over, not claiming win for {}", winner);
            return Vec::new();
        }
        if self.is_leader() {
            return self.commit_win(winner);
        }
        vec![RaceCommand::Send(Envelope::new(
            Delivery::Leader,
            Message::WinRequest {
                winner,
                round: self.state.round,
            },
        ))]
    }

    pub fn on_win_request(&mut self, from: PlayerId, winner: PlayerId, round: u32) -> Vec<RaceCommand> {
        if !self.is_leader() {
            warn!("Win request from {} reached non-leader {}", from, self.local);
            return Vec::new();
        }
        if round != self.state.round {
            debug!("Dropping win request for round {} (current {})", round, self.state.round);
            return Vec::new();
        }
        self.commit_win(winner)
    }

    fn commit_win(&mut self, winner: PlayerId) -> Vec<RaceCommand> {
        if self.state.ended {
            debug!("Dropping late win for {}, winner already {:?}", winner, self.state.winner);
            return Vec::new();
        }
        self.state.ended = true;
        self.state.winner = Some(winner);
        info!("Player {} wins round {}", winner, self.state.round);
        vec![
            RaceCommand::Send(Envelope::new(
                Delivery::Broadcast,
                Message::GameOver {
                    winner,
                    round: self.state.round,
                },
            )),
            RaceCommand::ApplyGameOver { winner },
        ]
    }

    pub fn on_game_over(&mut self, from: PlayerId, winner: PlayerId, round: u32) -> Vec<RaceCommand> {
        if from != self.leader {
            warn!("Ignoring game over from non-leader {}", from);
            return Vec::new();
        }
        if round != self.state.round || self.state.ended {
            return Vec::new();
        }
        self.state.ended = true;
        self.state.winner = Some(winner);
        vec![RaceCommand::ApplyGameOver { winner }]
    }

    pub fn request_restart(&mut self) -> Vec<RaceCommand> {
        if !self.live {
            debug!("Restart requested before vehicles exist");
            return Vec::new();
        }
        if self.is_leader() {
            return self.execute_restart();
        }
        vec![RaceCommand::Send(Envelope::new(
            Delivery::Leader,
            Message::RestartRequest {
                round: self.state.round,
            },
        ))]
    }

    pub fn on_restart_request(&mut self, from: PlayerId, round: u32) -> Vec<RaceCommand> {
        if !self.is_leader() {
            warn!("Restart request from {} reached non-leader {}", from, self.local);
            return Vec::new();
        }
        if !self.live {
            debug!("Ignoring restart request from {}, match not live", from);
            return Vec::new();
        }
        if round != self.state.round {
            debug!("Duplicate restart request for round {} from {}", round, from);
            return Vec::new();
        }
        self.execute_restart()
    }

    fn execute_restart(&mut self) -> Vec<RaceCommand> {
        self.state = RaceState {
            ended: false,
            winner: None,
            round: self.state.round + 1,
        };
        info!("Starting round {}", self.state.round);
        vec![
            RaceCommand::Send(Envelope::new(
                Delivery::Broadcast,
                Message::Restart {
                    round: self.state.round,
                },
            )),
            RaceCommand::ApplyRestart {
                round: self.state.round,
            },
        ]
    }

    pub fn on_restart(&mut self, from: PlayerId, round: u32) -> Vec<RaceCommand> {
        if from != self.leader {
            warn!("Ignoring restart from non-leader {}", from);
            return Vec::new();
        }
        if round <= self.state.round {
            return Vec::new();
        }
        self.state = RaceState {
            ended: false,
            winner: None,
            round,
        };
        vec![RaceCommand::ApplyRestart { round }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(commands: &[RaceCommand]) -> Vec<Message> {
        commands
            .iter()
            .filter_map(|command| match command {
                RaceCommand::Send(envelope) => Some(envelope.message.clone()),
                _ => None,
            })
            .collect()
    }

    fn live(local: PlayerId, leader: PlayerId) -> RaceLifecycle {
        let mut race = RaceLifecycle::new(local, leader);
        race.set_live(true);
        race
    }

    #[test]
    fn test_leader_commits_own_win() {
        let mut leader = live(1, 1);
        let commands = leader.claim_win(1);
        assert_eq!(sent(&commands), vec![Message::GameOver { winner: 1, round: 0 }]);
        assert!(commands.contains(&RaceCommand::ApplyGameOver { winner: 1 }));
        assert!(leader.claim_win(1).is_empty());
    }

    #[test]
    fn test_follower_requests_win() {
        let mut follower = live(2, 1);
        let commands = follower.claim_win(2);
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            RaceCommand::Send(envelope) => {
                assert_eq!(envelope.delivery, Delivery::Leader);
                assert_eq!(envelope.message, Message::WinRequest { winner: 2, round: 0 });
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(!follower.is_ended());
    }

    #[test]
    fn test_first_win_request_wins() {
        let mut leader = live(1, 1);
        let first = leader.on_win_request(3, 3, 0);
        let second = leader.on_win_request(2, 2, 0);

        assert_eq!(sent(&first), vec![Message::GameOver { winner: 3, round: 0 }]);
        assert!(second.is_empty());
        assert_eq!(leader.state().winner, Some(3));
    }

    #[test]
    fn test_game_over_is_idempotent() {
        let mut follower = live(2, 1);
        assert_eq!(
            follower.on_game_over(1, 3, 0),
            vec![RaceCommand::ApplyGameOver { winner: 3 }]
        );
        assert!(follower.on_game_over(1, 2, 0).is_empty());
        assert_eq!(follower.state().winner, Some(3));
    }

    #[test]
    fn test_duplicate_restart_requests() {
        let mut leader = live(1, 1);
        leader.claim_win(1);

        let first = leader.on_restart_request(2, 0);
        let second = leader.on_restart_request(3, 0);
        assert_eq!(sent(&first), vec![Message::Restart { round: 1 }]);
        assert!(second.is_empty());
        assert_eq!(leader.round(), 1);
        assert!(!leader.is_ended());
    }

    #[test]
    fn test_restart_requires_live_match() {
        let mut leader = RaceLifecycle::new(1, 1);
        assert!(leader.request_restart().is_empty());
        assert!(leader.on_restart_request(2, 0).is_empty());
        assert_eq!(leader.round(), 0);
    }

    #[test]
    fn test_stale_messages_after_restart() {
        let mut follower = live(2, 1);
        follower.on_game_over(1, 1, 0);
        assert_eq!(follower.on_restart(1, 1), vec![RaceCommand::ApplyRestart { round: 1 }]);
        assert!(follower.on_restart(1, 1).is_empty());
        assert!(follower.on_game_over(1, 1, 0).is_empty());
        assert!(!follower.is_ended());

        let mut leader = live(1, 1);
        leader.request_restart();
        assert!(leader.on_win_request(2, 2, 0).is_empty());
        assert!(!leader.is_ended());
    }

    #[test]
    fn test_non_leader_ignores_requests() {
        let mut follower = live(2, 1);
        assert!(follower.on_win_request(3, 3, 0).is_empty());
        assert!(follower.on_restart_request(3, 0).is_empty());
        assert!(follower.on_game_over(3, 3, 0).is_empty());
    }
}
