//! # Race Peer Library
//!
//! A headless racing peer. It connects to the relay, owns exactly one
//! vehicle and simulates it locally, while every other vehicle is mirrored
//! from the snapshots its owner broadcasts.
//!
//! ## Architecture Overview
//!
//! All race rules live in [`shared::session::PeerSession`], a plain state
//! object that never touches a socket. This crate is the thin layer around
//! it:
//!
//! ### Owner Simulation
//! The local vehicle is stepped at a fixed tick. Progress, laps, track
//! adherence, pickups and obstacles are all evaluated here and only the
//! outcome is shared with the others.
//!
//! ### Snapshot Mirroring
//! Remote vehicles ease toward the latest snapshot of their owner, so
//! mirrored motion stays smooth between snapshots.
//!
//! ### Leader Decisions
//! Wins and restarts are committed by the leader peer only. Everybody else
//! sends requests and applies whatever the leader broadcasts.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! - The built-in demo track
//! - Scoreboard ordering
//! - Logging of session events
//!
//! ### Input Module (`input`)
//! - `Autopilot`, which steers toward a point ahead on the track
//! - `TrackSurfaceProbe`, which uses the curve as the road surface
//!
//! ### Network Module (`network`)
//! - TCP connection to the relay with length-prefixed bincode frames
//! - Hello/welcome handshake and leader track finalization
//! - The `tokio::select!` loop: inbound frames, ticks, snapshots, heartbeats
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::network::{Peer, PeerOptions};
//! use shared::Settings;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(None)?;
//!     let mut peer = Peer::connect("127.0.0.1:8080", settings, PeerOptions::default()).await?;
//!     peer.run().await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
