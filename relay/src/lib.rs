//! # Race Relay Library
//!
//! The relay is the only process every peer connects to. It owns no game
//! state at all: each peer simulates its own vehicle and the relay merely
//! forwards messages between them.
//!
//! ## Core Responsibilities
//!
//! ### Peer Admission
//! A peer opens a TCP connection and sends `Hello`. The relay checks the
//! protocol version, assigns the next peer id and answers with `Welcome`,
//! which carries the id, the leader and the current roster. The first peer
//! ever admitted is the leader for the lifetime of the relay.
//!
//! ### Message Routing
//! Every `Send` packet names a delivery mode:
//! - `Broadcast` goes to every other peer
//! - `Buffered` goes to every other peer and is replayed to late joiners
//! - `Leader` goes to the leader only
//! - `To(id)` goes to one peer
//!
//! Peers receive the payload wrapped in `Deliver { from, message }`.
//!
//! ### Liveness
//! Any packet refreshes a peer. Peers silent for longer than the configured
//! timeout are dropped and the others are told with `PeerLeft`.
//!
//! ## Architecture Design
//!
//! Each connection gets a reader task and a writer task. Readers push
//! events into one unbounded channel, the routing loop owns all state and
//! hands outgoing packets to per-connection writer queues. Ordering between
//! two peers is therefore FIFO.
//!
//! ## Module Organization
//!
//! ### Peer Registry Module (`peer_registry`)
//! Peer ids, leader assignment, timeouts, routing and the replay buffer.
//!
//! ### Network Module (`network`)
//! The TCP listener, connection tasks, frame IO and the routing loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use relay::network::Relay;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = Relay::bind("127.0.0.1:8080", 8, Duration::from_secs(5)).await?;
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod peer_registry;
