//! Peer transport: connects to the relay and drives a [`PeerSession`]

use crate::game::{demo_track_anchors, standings, RaceLog};
use crate::input::{Autopilot, TrackSurfaceProbe};
use log::{debug, error, info, warn};
use shared::motion::{GroundProbe, NoGround};
use shared::progress::ProgressEstimator;
use shared::protocol::{read_packet, write_packet, Envelope, Packet};
use shared::session::{PeerSession, SessionEvent};
use shared::{PlayerId, Settings, PROTOCOL_VERSION};
use std::collections::BTreeSet;
use std::io;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};

const WELCOME_TIMEOUT: Duration = Duration::from_secs(5);

/// Knobs of a headless peer that are not part of the race rules
#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub name: String,
    /// Leader only: how many peers must be connected before the track is finalized
    pub min_peers: usize,
    /// Ask for a restart this long after a race ended
    pub restart_after: Option<Duration>,
    /// Leave after this many finished races
    pub max_rounds: Option<u32>,
    pub seed: Option<u64>,
    pub lookahead: f32,
    pub track_radius: f32,
    pub track_anchors: usize,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            name: "peer".to_string(),
            min_peers: 2,
            restart_after: None,
            max_rounds: None,
            seed: None,
            lookahead: 0.02,
            track_radius: 3.0,
            track_anchors: 16,
        }
    }
}

pub struct Peer {
    outbound: mpsc::UnboundedSender<Packet>,
    inbound: mpsc::UnboundedReceiver<Packet>,

    peer_id: PlayerId,
    roster: BTreeSet<PlayerId>,
    session: PeerSession,
    options: PeerOptions,

    autopilot: Autopilot,
    surface: Option<TrackSurfaceProbe>,
    race_log: RaceLog,
    restart_at: Option<Instant>,
}

impl Peer {
    /// Connects to the relay and waits for the welcome packet.
    pub async fn connect(
        relay_addr: &str,
        settings: Settings,
        options: PeerOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to relay at {}...", relay_addr);
        let stream = TcpStream::connect(relay_addr).await?;
        stream.set_nodelay(true)?;
        let (outbound, mut inbound) = spawn_connection(stream);

        let hello = Packet::Hello {
            protocol_version: PROTOCOL_VERSION,
            name: options.name.clone(),
        };
        if outbound.send(hello).is_err() {
            return Err("relay connection closed before hello".into());
        }

        let (peer_id, leader, roster) = loop {
            match timeout(WELCOME_TIMEOUT, inbound.recv()).await {
                Ok(Some(Packet::Welcome {
                    peer_id,
                    leader,
                    roster,
                })) => break (peer_id, leader, roster),
                Ok(Some(Packet::Disconnect { reason })) => {
                    return Err(format!("relay refused connection: {}", reason).into());
                }
                Ok(Some(other)) => {
                    debug!("Ignoring {:?} before welcome", other);
                }
                Ok(None) => return Err("relay closed the connection".into()),
                Err(_) => return Err("timed out waiting for welcome".into()),
            }
        };

        info!(
            "Connected as peer {} (leader {}, {} peers online)",
            peer_id,
            leader,
            roster.len()
        );

        let mut session = PeerSession::new(peer_id, leader, settings)?;
        if let Some(seed) = options.seed {
            session = session.with_seed(seed);
        }

        let mut peer = Peer {
            outbound,
            inbound,
            peer_id,
            roster: roster.into_iter().collect(),
            session,
            autopilot: Autopilot::new(options.lookahead),
            surface: None,
            race_log: RaceLog::new(peer_id),
            restart_at: None,
            options,
        };
        peer.maybe_finalize_track();
        Ok(peer)
    }

    pub fn id(&self) -> PlayerId {
        self.peer_id
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    pub fn race_log(&self) -> &RaceLog {
        &self.race_log
    }

    fn send_packet(&self, packet: Packet) {
        if self.outbound.send(packet).is_err() {
            warn!("Relay writer closed, dropping packet");
        }
    }

    fn send_envelopes(&self, envelopes: Vec<Envelope>) {
        for envelope in envelopes {
            self.send_packet(Packet::from(envelope));
        }
    }

    /// Leader only: freezes the demo track once enough peers are online.
    fn maybe_finalize_track(&mut self) {
        if !self.session.is_leader() || self.session.has_track() {
            return;
        }
        if self.roster.len() < self.options.min_peers {
            info!(
                "Waiting for peers ({}/{})",
                self.roster.len(),
                self.options.min_peers
            );
            return;
        }

        let anchors = demo_track_anchors(self.options.track_radius, self.options.track_anchors);
        let roster: Vec<PlayerId> = self.roster.iter().copied().collect();
        let envelopes = self.session.finalize_track(anchors, roster);
        self.send_envelopes(envelopes);
    }

    /// Returns false when the relay ended the connection.
    fn handle_packet(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::Deliver { from, message } => {
                let envelopes = self.session.apply_message(from, message);
                self.send_envelopes(envelopes);
            }
            Packet::PeerJoined { peer } => {
                info!("Peer {} joined", peer);
                self.roster.insert(peer);
                self.maybe_finalize_track();
            }
            Packet::PeerLeft { peer } => {
                info!("Peer {} left", peer);
                self.roster.remove(&peer);
                self.session.remove_player(peer);
                if peer == self.session.leader() {
                    warn!("The leader left, races can no longer end or restart");
                }
            }
            Packet::Disconnect { reason } => {
                warn!("Disconnected by relay: {}", reason);
                return false;
            }
            other => {
                warn!("Unexpected packet from relay: {:?}", other);
            }
        }
        true
    }

    fn attach_track(&mut self) {
        if self.surface.is_some() {
            return;
        }
        if let Some(curve) = self.session.curve() {
            let estimator = ProgressEstimator::new(self.session.settings().track.progress_samples);
            self.autopilot.follow(curve.clone());
            self.surface = Some(TrackSurfaceProbe::new(curve, estimator));
        }
    }

    fn step(&mut self, dt: f32) {
        self.attach_track();

        if let Some(deadline) = self.restart_at {
            if Instant::now() >= deadline {
                self.restart_at = None;
                let envelopes = self.session.request_restart();
                self.send_envelopes(envelopes);
            }
        }

        let ground: &dyn GroundProbe = match &self.surface {
            Some(surface) => surface,
            None => &NoGround,
        };
        let envelopes = self.session.tick(dt, &mut self.autopilot, ground);
        self.send_envelopes(envelopes);

        for event in self.session.drain_events() {
            self.race_log.record(&event);
            if let SessionEvent::GameOver { .. } = event {
                for standing in standings(&self.session) {
                    info!(
                        "  player {}: {:.2} laps, {} gold{}",
                        standing.player,
                        standing.lap_progress,
                        standing.gold,
                        if standing.finished { ", finished" } else { "" }
                    );
                }
                if let Some(delay) = self.options.restart_after {
                    self.restart_at = Some(Instant::now() + delay);
                }
            }
        }
    }

    fn rounds_done(&self) -> bool {
        matches!(self.options.max_rounds, Some(max) if self.race_log.finished_rounds() >= max)
    }

    /// Runs until the relay goes away or the configured number of races is done.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let net = self.session.settings().net.clone();
        let dt = 1.0 / net.tick_rate as f32;

        let mut tick_interval = interval(Duration::from_secs_f32(dt));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut snapshot_interval = interval(Duration::from_secs_f32(1.0 / net.snapshot_rate as f32));
        snapshot_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat_interval = interval(Duration::from_secs_f32(net.heartbeat_interval));

        loop {
            tokio::select! {
                packet = self.inbound.recv() => {
                    match packet {
                        Some(packet) => {
                            if !self.handle_packet(packet) {
                                break;
                            }
                        }
                        None => {
                            error!("Lost connection to relay");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.step(dt);
                    if self.rounds_done() {
                        info!("Finished {} races, leaving", self.race_log.finished_rounds());
                        self.send_packet(Packet::Disconnect {
                            reason: "Done racing".to_string(),
                        });
                        break;
                    }
                },

                _ = snapshot_interval.tick() => {
                    if self.session.has_started() {
                        if let Some(envelope) = self.session.local_snapshot() {
                            self.send_packet(Packet::from(envelope));
                        }
                    }
                },

                _ = heartbeat_interval.tick() => {
                    let timestamp = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or(Duration::from_secs(0))
                        .as_millis() as u64;
                    self.send_packet(Packet::Heartbeat { timestamp });
                },
            }
        }

        Ok(())
    }
}

/// Splits the stream into a reader task feeding `inbound` and a writer task
/// draining `outbound`.
fn spawn_connection(
    stream: TcpStream,
) -> (mpsc::UnboundedSender<Packet>, mpsc::UnboundedReceiver<Packet>) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Packet>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Packet>();

    tokio::spawn(async move {
        while let Some(packet) = outbound_rx.recv().await {
            if let Err(e) = write_packet(&mut writer, &packet).await {
                error!("Error sending packet: {}", e);
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match read_packet(&mut reader).await {
                Ok(packet) => {
                    if inbound_tx.send(packet).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::UnexpectedEof {
                        error!("Error receiving packet: {}", e);
                    }
                    break;
                }
            }
        }
    });

    (outbound_tx, inbound_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_options() {
        let options = PeerOptions::default();
        assert_eq!(options.min_peers, 2);
        assert!(options.restart_after.is_none());
        assert!(options.lookahead > 0.0);
    }

    #[tokio::test]
    async fn test_connect_receives_welcome() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let fake_relay = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let hello = read_packet(&mut stream).await.unwrap();
            assert!(matches!(hello, Packet::Hello { protocol_version, .. } if protocol_version == PROTOCOL_VERSION));
            let welcome = Packet::Welcome {
                peer_id: 2,
                leader: 1,
                roster: vec![1, 2],
            };
            write_packet(&mut stream, &welcome).await.unwrap();
            stream
        });

        let peer = Peer::connect(&addr.to_string(), Settings::default(), PeerOptions::default())
            .await
            .unwrap();
        assert_eq!(peer.id(), 2);
        assert!(!peer.session().is_leader());
        assert!(!peer.session().has_track());
        drop(fake_relay.await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused_by_full_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_packet(&mut stream).await;
            let refusal = Packet::Disconnect {
                reason: "Relay full".to_string(),
            };
            let _ = write_packet(&mut stream, &refusal).await;
        });

        let result = Peer::connect(&addr.to_string(), Settings::default(), PeerOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_lone_leader_finalizes_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let fake_relay = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_packet(&mut stream).await.unwrap();
            let welcome = Packet::Welcome {
                peer_id: 1,
                leader: 1,
                roster: vec![1],
            };
            write_packet(&mut stream, &welcome).await.unwrap();
            read_packet(&mut stream).await.unwrap()
        });

        let options = PeerOptions {
            min_peers: 1,
            seed: Some(9),
            ..PeerOptions::default()
        };
        let peer = Peer::connect(&addr.to_string(), Settings::default(), options)
            .await
            .unwrap();
        assert!(peer.session().has_track());

        let sent = fake_relay.await.unwrap();
        assert!(matches!(
            sent,
            Packet::Send {
                message: shared::Message::TrackFinalized { .. },
                ..
            }
        ));
    }
}
