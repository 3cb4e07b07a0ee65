//! Relay network layer handling TCP connections and message routing

use crate::peer_registry::{Outbound, PeerRegistry};
use log::{debug, error, info, warn};
use shared::protocol::{read_packet, write_packet, Packet};
use shared::{PlayerId, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::interval;

pub type ConnectionId = u64;

/// Messages sent from connection tasks to the routing loop
#[derive(Debug)]
pub enum RelayEvent {
    Connected {
        connection: ConnectionId,
        addr: SocketAddr,
        outbound: Outbound,
    },
    PacketReceived {
        connection: ConnectionId,
        packet: Packet,
    },
    Closed {
        connection: ConnectionId,
    },
}

struct Connection {
    addr: SocketAddr,
    outbound: Outbound,
    peer: Option<PlayerId>,
}

/// Relay accepting peers and forwarding their messages
pub struct Relay {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: PeerRegistry,
    connections: HashMap<ConnectionId, Connection>,
    peer_timeout: Duration,

    relay_tx: mpsc::UnboundedSender<RelayEvent>,
    relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
}

impl Relay {
    pub async fn bind(addr: &str, max_peers: usize, peer_timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Relay listening on {}", local_addr);

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();

        Ok(Relay {
            listener,
            local_addr,
            registry: PeerRegistry::new(max_peers),
            connections: HashMap::new(),
            peer_timeout,
            relay_tx,
            relay_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the reader and writer tasks of one accepted connection
    fn spawn_connection(
        stream: TcpStream,
        addr: SocketAddr,
        connection: ConnectionId,
        relay_tx: mpsc::UnboundedSender<RelayEvent>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }
        let (mut reader, mut writer) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Packet>();

        if relay_tx
            .send(RelayEvent::Connected {
                connection,
                addr,
                outbound,
            })
            .is_err()
        {
            return;
        }

        tokio::spawn(async move {
            while let Some(packet) = outbound_rx.recv().await {
                if let Err(e) = write_packet(&mut writer, &packet).await {
                    warn!("Failed to write to {}: {}", addr, e);
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match read_packet(&mut reader).await {
                    Ok(packet) => {
                        if relay_tx
                            .send(RelayEvent::PacketReceived { connection, packet })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        if e.kind() == io::ErrorKind::UnexpectedEof {
                            debug!("Connection {} from {} closed", connection, addr);
                        } else {
                            warn!("Dropping connection {} from {}: {}", connection, addr, e);
                        }
                        let _ = relay_tx.send(RelayEvent::Closed { connection });
                        break;
                    }
                }
            }
        });
    }

    fn send(&self, connection: ConnectionId, packet: Packet) {
        if let Some(conn) = self.connections.get(&connection) {
            if conn.outbound.send(packet).is_err() {
                debug!("Writer for connection {} already gone", connection);
            }
        }
    }

    /// Processes one packet from a connection
    fn handle_packet(&mut self, connection: ConnectionId, packet: Packet) {
        let Some(peer) = self.connections.get(&connection).map(|conn| conn.peer) else {
            return;
        };

        if let Some(id) = peer {
            self.registry.touch(id);
        }

        match (packet, peer) {
            (
                Packet::Hello {
                    protocol_version,
                    name,
                },
                None,
            ) => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "Rejecting connection {}: protocol {} (expected {})",
                        connection, protocol_version, PROTOCOL_VERSION
                    );
                    self.send(
                        connection,
                        Packet::Disconnect {
                            reason: "Protocol version mismatch".to_string(),
                        },
                    );
                    return;
                }

                let outbound = match self.connections.get(&connection) {
                    Some(conn) => conn.outbound.clone(),
                    None => return,
                };
                match self.registry.register(name, outbound) {
                    Some(id) => {
                        if let Some(conn) = self.connections.get_mut(&connection) {
                            conn.peer = Some(id);
                            info!("Connection {} from {} is peer {}", connection, conn.addr, id);
                        }
                        if let Some(welcome) = self.registry.welcome(id) {
                            self.registry.send_to(id, welcome);
                        }
                        self.registry
                            .announce(&Packet::PeerJoined { peer: id }, Some(id));
                        let replayed = self.registry.replay_buffered(id);
                        if replayed > 0 {
                            debug!("Replayed {} buffered messages to peer {}", replayed, id);
                        }
                    }
                    None => {
                        self.send(
                            connection,
                            Packet::Disconnect {
                                reason: "Relay full".to_string(),
                            },
                        );
                    }
                }
            }

            (Packet::Hello { .. }, Some(id)) => {
                warn!("Peer {} sent a second hello", id);
            }

            (Packet::Heartbeat { .. }, Some(_)) => {}

            (Packet::Send { delivery, message }, Some(id)) => {
                let delivered = self.registry.route(id, delivery, message);
                debug!("Routed message from peer {} ({:?}) to {} peers", id, delivery, delivered);
            }

            (Packet::Disconnect { reason }, Some(id)) => {
                info!("Peer {} disconnecting: {}", id, reason);
                self.drop_peer(id);
            }

            (other, peer) => {
                warn!(
                    "Unexpected packet on connection {} (peer {:?}): {:?}",
                    connection, peer, other
                );
            }
        }
    }

    fn drop_peer(&mut self, id: PlayerId) {
        if self.registry.remove(id) {
            self.registry.announce(&Packet::PeerLeft { peer: id }, None);
        }
        self.connections.retain(|_, conn| conn.peer != Some(id));
    }

    fn handle_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected {
                connection,
                addr,
                outbound,
            } => {
                debug!("Connection {} accepted from {}", connection, addr);
                self.connections.insert(
                    connection,
                    Connection {
                        addr,
                        outbound,
                        peer: None,
                    },
                );
            }
            RelayEvent::PacketReceived { connection, packet } => {
                self.handle_packet(connection, packet);
            }
            RelayEvent::Closed { connection } => {
                if let Some(conn) = self.connections.remove(&connection) {
                    if let Some(id) = conn.peer {
                        self.drop_peer(id);
                    }
                }
            }
        }
    }

    /// Main relay loop: accepts connections, routes packets, drops silent peers
    pub async fn run(mut self) -> io::Result<()> {
        let mut timeout_interval = interval(Duration::from_secs(1));
        let mut next_connection: ConnectionId = 1;

        info!("Relay started");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            Self::spawn_connection(stream, addr, next_connection, self.relay_tx.clone());
                            next_connection += 1;
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                event = self.relay_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }

                _ = timeout_interval.tick() => {
                    for id in self.registry.check_timeouts(self.peer_timeout) {
                        self.registry.announce(&Packet::PeerLeft { peer: id }, None);
                        self.connections.retain(|_, conn| conn.peer != Some(id));
                    }
                }
            }
        }

        info!("Relay stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relay_binds_ephemeral_port() {
        let relay = Relay::bind("127.0.0.1:0", 4, Duration::from_secs(5)).await.unwrap();
        assert_ne!(relay.local_addr().port(), 0);
    }
}
