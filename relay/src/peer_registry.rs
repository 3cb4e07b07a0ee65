//! Peer bookkeeping for the relay
//!
//! This module tracks who is connected and decides where each message goes:
//! - Peer ids are handed out in join order, the first peer becomes leader
//! - Liveness is tracked per peer and stale peers are dropped
//! - Buffered messages are kept and replayed to peers that join later
//!
//! The registry never inspects message payloads. Ordering between any two
//! peers is whatever the per-peer outbound channel gives us, which is FIFO.

use log::{debug, info, warn};
use shared::protocol::{Delivery, Message, Packet};
use shared::PlayerId;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Queue feeding the writer task of one connection.
pub type Outbound = mpsc::UnboundedSender<Packet>;

/// A peer that completed the hello handshake
#[derive(Debug)]
pub struct RegisteredPeer {
    /// Id assigned by the relay, doubles as the player id
    pub id: PlayerId,
    /// Display name sent in the hello packet
    pub name: String,
    /// Last time anything arrived from this peer
    pub last_seen: Instant,
    outbound: Outbound,
}

impl RegisteredPeer {
    pub fn new(id: PlayerId, name: String, outbound: Outbound) -> Self {
        Self {
            id,
            name,
            last_seen: Instant::now(),
            outbound,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Queues a packet; false once the connection's writer has gone away.
    pub fn send(&self, packet: Packet) -> bool {
        self.outbound.send(packet).is_ok()
    }
}

/// All registered peers plus the replay buffer
pub struct PeerRegistry {
    peers: BTreeMap<PlayerId, RegisteredPeer>,
    next_peer_id: PlayerId,
    max_peers: usize,
    leader: Option<PlayerId>,
    buffered: Vec<(PlayerId, Message)>,
}

impl PeerRegistry {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: BTreeMap::new(),
            next_peer_id: 1,
            max_peers,
            leader: None,
            buffered: Vec::new(),
        }
    }

    /// Registers a peer, or returns None when the relay is full.
    ///
    /// The very first peer to register becomes leader for the lifetime of
    /// the relay.
    pub fn register(&mut self, name: String, outbound: Outbound) -> Option<PlayerId> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let id = self.next_peer_id;
        self.next_peer_id += 1;
        if self.leader.is_none() {
            self.leader = Some(id);
            info!("Peer {} ({}) is the leader", id, name);
        }

        info!("Peer {} ({}) joined", id, name);
        self.peers.insert(id, RegisteredPeer::new(id, name, outbound));
        Some(id)
    }

    pub fn remove(&mut self, id: PlayerId) -> bool {
        match self.peers.remove(&id) {
            Some(peer) => {
                info!("Peer {} ({}) left", peer.id, peer.name);
                if self.leader == Some(id) {
                    warn!("Leader {} left, wins and restarts can no longer be committed", id);
                }
                true
            }
            None => false,
        }
    }

    pub fn touch(&mut self, id: PlayerId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.touch();
        }
    }

    /// Removes and returns every peer silent for longer than `timeout`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<PlayerId> {
        let timed_out: Vec<PlayerId> = self
            .peers
            .values()
            .filter(|peer| peer.is_timed_out(timeout))
            .map(|peer| peer.id)
            .collect();

        for id in &timed_out {
            warn!("Peer {} timed out", id);
            self.remove(*id);
        }
        timed_out
    }

    pub fn leader(&self) -> Option<PlayerId> {
        self.leader
    }

    pub fn roster(&self) -> Vec<PlayerId> {
        self.peers.keys().copied().collect()
    }

    pub fn welcome(&self, id: PlayerId) -> Option<Packet> {
        let leader = self.leader?;
        self.peers.contains_key(&id).then(|| Packet::Welcome {
            peer_id: id,
            leader,
            roster: self.roster(),
        })
    }

    pub fn send_to(&self, id: PlayerId, packet: Packet) -> bool {
        match self.peers.get(&id) {
            Some(peer) => peer.send(packet),
            None => false,
        }
    }

    /// Sends a relay-originated packet to everybody except `exclude`.
    pub fn announce(&self, packet: &Packet, exclude: Option<PlayerId>) -> usize {
        self.peers
            .values()
            .filter(|peer| Some(peer.id) != exclude)
            .filter(|peer| peer.send(packet.clone()))
            .count()
    }

    /// Forwards a message according to its delivery mode and returns how
    /// many peers it was handed to.
    pub fn route(&mut self, from: PlayerId, delivery: Delivery, message: Message) -> usize {
        match delivery {
            Delivery::Broadcast => self.forward_to_others(from, &message),
            Delivery::Buffered => {
                self.buffered.push((from, message.clone()));
                self.forward_to_others(from, &message)
            }
            Delivery::Leader => match self.leader {
                Some(leader) if leader != from => {
                    usize::from(self.send_to(leader, Packet::Deliver { from, message }))
                }
                Some(_) => {
                    debug!("Leader {} addressed itself, dropping", from);
                    0
                }
                None => 0,
            },
            Delivery::To(target) => {
                if self.send_to(target, Packet::Deliver { from, message }) {
                    1
                } else {
                    debug!("Dropping message from {} to unknown peer {}", from, target);
                    0
                }
            }
        }
    }

    fn forward_to_others(&self, from: PlayerId, message: &Message) -> usize {
        self.announce(
            &Packet::Deliver {
                from,
                message: message.clone(),
            },
            Some(from),
        )
    }

    /// Replays every buffered message to a newly joined peer, oldest first.
    pub fn replay_buffered(&self, to: PlayerId) -> usize {
        self.buffered
            .iter()
            .filter(|(from, _)| *from != to)
            .filter(|(from, message)| {
                self.send_to(
                    to,
                    Packet::Deliver {
                        from: *from,
                        message: message.clone(),
                    },
                )
            })
            .count()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn join(registry: &mut PeerRegistry, name: &str) -> (PlayerId, UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(name.to_string(), tx).unwrap();
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Packet>) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_first_peer_leads() {
        let mut registry = PeerRegistry::new(4);
        let (a, _ra) = join(&mut registry, "a");
        let (b, _rb) = join(&mut registry, "b");

        assert_eq!((a, b), (1, 2));
        assert_eq!(registry.leader(), Some(1));
        assert_eq!(
            registry.welcome(b),
            Some(Packet::Welcome {
                peer_id: 2,
                leader: 1,
                roster: vec![1, 2],
            })
        );
    }

    #[test]
    fn test_capacity() {
        let mut registry = PeerRegistry::new(1);
        let (_a, _ra) = join(&mut registry, "a");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(registry.register("b".to_string(), tx).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let mut registry = PeerRegistry::new(4);
        let (a, mut ra) = join(&mut registry, "a");
        let (_b, mut rb) = join(&mut registry, "b");
        let (_c, mut rc) = join(&mut registry, "c");

        let delivered = registry.route(a, Delivery::Broadcast, Message::Restart { round: 1 });
        assert_eq!(delivered, 2);
        assert!(drain(&mut ra).is_empty());
        assert_eq!(
            drain(&mut rb),
            vec![Packet::Deliver {
                from: a,
                message: Message::Restart { round: 1 },
            }]
        );
        assert_eq!(drain(&mut rc).len(), 1);
    }

    #[test]
    fn test_leader_and_direct_delivery() {
        let mut registry = PeerRegistry::new(4);
        let (a, mut ra) = join(&mut registry, "a");
        let (b, mut rb) = join(&mut registry, "b");

        assert_eq!(
            registry.route(b, Delivery::Leader, Message::RestartRequest { round: 0 }),
            1
        );
        assert_eq!(drain(&mut ra).len(), 1);
        assert_eq!(
            registry.route(a, Delivery::Leader, Message::RestartRequest { round: 0 }),
            0
        );

        assert_eq!(
            registry.route(a, Delivery::To(b), Message::PullRequest { target: b, caster: a }),
            1
        );
        assert_eq!(drain(&mut rb).len(), 1);
        assert_eq!(
            registry.route(a, Delivery::To(99), Message::Restart { round: 1 }),
            0
        );
    }

    #[test]
    fn test_buffered_replay_for_late_joiner() {
        let mut registry = PeerRegistry::new(4);
        let (a, _ra) = join(&mut registry, "a");
        let track = Message::TrackFinalized {
            anchors: Vec::new(),
            roster: vec![a],
            obstacles: Vec::new(),
        };
        registry.route(a, Delivery::Buffered, track.clone());
        assert_eq!(registry.buffered_len(), 1);

        let (late, mut rl) = join(&mut registry, "late");
        assert_eq!(registry.replay_buffered(late), 1);
        assert_eq!(
            drain(&mut rl),
            vec![Packet::Deliver {
                from: a,
                message: track,
            }]
        );
    }

    #[test]
    fn test_timeouts() {
        let mut registry = PeerRegistry::new(4);
        let (a, _ra) = join(&mut registry, "a");
        let (b, _rb) = join(&mut registry, "b");

        if let Some(peer) = registry.peers.get_mut(&a) {
            peer.last_seen = Instant::now() - Duration::from_secs(10);
        }
        assert_eq!(registry.check_timeouts(Duration::from_secs(5)), vec![a]);
        assert_eq!(registry.roster(), vec![b]);
        assert_eq!(registry.leader(), Some(a));
    }

    #[test]
    fn test_closed_outbound_is_not_counted() {
        let mut registry = PeerRegistry::new(4);
        let (a, _ra) = join(&mut registry, "a");
        let (_b, rb) = join(&mut registry, "b");
        drop(rb);
        assert_eq!(registry.route(a, Delivery::Broadcast, Message::Restart { round: 1 }), 0);
    }
}
