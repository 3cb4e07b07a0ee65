//! Messages exchanged between peers and the relay, and their framing.
//!
//! Every packet travels as a big-endian `u32` length followed by a bincode
//! payload. The relay never looks inside [`Message`]; it only reads the
//! [`Delivery`] of a [`Packet::Send`] to decide who receives it.

use crate::items::ItemKind;
use crate::{PlayerId, VehicleId};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected before allocating.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// Every other connected peer.
    Broadcast,
    /// Every other peer, and replayed to anyone who joins later.
    Buffered,
    /// The peer that committed wins and restarts.
    Leader,
    /// A single peer, usually the owner of a vehicle.
    To(PlayerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub vehicle: VehicleId,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub progress: f32,
    pub lap_progress: f32,
}

/// Peer-to-peer payload. Handlers on the receiving side must tolerate
/// duplicates and stale rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// The leader's final track, starting grid and obstacle positions.
    TrackFinalized {
        anchors: Vec<Vec3>,
        roster: Vec<PlayerId>,
        obstacles: Vec<Vec3>,
    },
    Snapshot(VehicleSnapshot),
    WinRequest { winner: PlayerId, round: u32 },
    GameOver { winner: PlayerId, round: u32 },
    RestartRequest { round: u32 },
    Restart { round: u32 },
    SetInvincible {
        vehicle: VehicleId,
        invincible: bool,
        round: u32,
    },
    ItemShown {
        vehicle: VehicleId,
        item: Option<ItemKind>,
        round: u32,
    },
    PickupConsumed { pickup: u32 },
    ProjectileLaunched {
        projectile: u64,
        caster: VehicleId,
        target: VehicleId,
        position: Vec3,
    },
    Detonation { projectile: u64, position: Vec3 },
    Hit { vehicle: VehicleId, impulse: Vec3 },
    PullRequest { target: VehicleId, caster: VehicleId },
    WalletUpdate { player: PlayerId, count: u32, round: u32 },
}

/// A message plus where it should go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub delivery: Delivery,
    pub message: Message,
}

impl Envelope {
    pub fn new(delivery: Delivery, message: Message) -> Self {
        Self { delivery, message }
    }

    pub fn broadcast(message: Message) -> Self {
        Self::new(Delivery::Broadcast, message)
    }
}

/// Wire packets between a peer and the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// First packet of every connection.
    Hello { protocol_version: u32, name: String },
    Welcome {
        peer_id: PlayerId,
        leader: PlayerId,
        roster: Vec<PlayerId>,
    },
    PeerJoined { peer: PlayerId },
    PeerLeft { peer: PlayerId },
    Heartbeat { timestamp: u64 },
    Send { delivery: Delivery, message: Message },
    Deliver { from: PlayerId, message: Message },
    Disconnect { reason: String },
}

impl From<Envelope> for Packet {
    fn from(envelope: Envelope) -> Self {
        Packet::Send {
            delivery: envelope.delivery,
            message: envelope.message,
        }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
    #[error("malformed packet: {0}")]
    Codec(#[from] bincode::Error),
}

impl Packet {
    pub fn serialize(&self) -> Result<Vec<u8>, WireError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Length header plus payload, ready to be written to a stream.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let payload = self.serialize()?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(payload.len()));
        }
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

/// Validates a length header read from a stream.
pub fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, WireError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    Ok(len)
}

fn invalid_data(error: WireError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Reads one length-prefixed packet
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Packet> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = frame_len(header).map_err(invalid_data)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Packet::deserialize(&payload).map_err(invalid_data)
}

/// Writes one length-prefixed packet
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> io::Result<()> {
    let frame = packet.to_frame().map_err(invalid_data)?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let packet = Packet::Heartbeat { timestamp: 42 };
        let frame = packet.to_frame().unwrap();
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);

        let len = frame_len(header).unwrap();
        assert_eq!(len, frame.len() - FRAME_HEADER_LEN);
        assert_eq!(Packet::deserialize(&frame[FRAME_HEADER_LEN..]).unwrap(), packet);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        assert!(matches!(frame_len(header), Err(WireError::FrameTooLarge(_))));
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let packet = Packet::Send {
            delivery: Delivery::Buffered,
            message: Message::TrackFinalized {
                anchors: vec![Vec3::ONE; MAX_FRAME_LEN / 4],
                roster: vec![1],
                obstacles: Vec::new(),
            },
        };
        assert!(matches!(packet.to_frame(), Err(WireError::FrameTooLarge(_))));
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        assert!(matches!(
            Packet::deserialize(&[0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(WireError::Codec(_))
        ));
    }

    #[test]
    fn test_envelope_becomes_send() {
        let envelope = Envelope::new(Delivery::To(4), Message::Hit {
            vehicle: 4,
            impulse: Vec3::X,
        });
        match Packet::from(envelope) {
            Packet::Send { delivery, .. } => assert_eq!(delivery, Delivery::To(4)),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_packet_over_duplex_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let packet = Packet::Send {
            delivery: Delivery::Leader,
            message: Message::WinRequest { winner: 3, round: 0 },
        };

        write_packet(&mut client, &packet).await.unwrap();
        write_packet(&mut client, &Packet::Heartbeat { timestamp: 5 }).await.unwrap();

        assert_eq!(read_packet(&mut server).await.unwrap(), packet);
        assert_eq!(
            read_packet(&mut server).await.unwrap(),
            Packet::Heartbeat { timestamp: 5 }
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_is_invalid_data() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        client.write_all(&header).await.unwrap();

        let error = read_packet(&mut server).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_closed_stream_is_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let error = read_packet(&mut server).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }
}
