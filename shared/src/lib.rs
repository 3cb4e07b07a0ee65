//! # Shared Race Simulation Library
//!
//! Everything a peer needs to simulate a networked race along a closed track
//! curve lives here. The relay and the peer binaries only move bytes and feed
//! time into the types defined in this crate.
//!
//! ## Core Responsibilities
//!
//! ### Track Progress
//! Vehicles are located on the closed track by sampling the curve
//! ([`progress`]) and their continuous lap count is accumulated across the
//! start/finish seam ([`lap`]).
//!
//! ### Track Adherence
//! Vehicles that leave the road or end up on their roof are put back on the
//! track at their last safe progress ([`adherence`]).
//!
//! ### Race Lifecycle
//! Wins and restarts are committed by a single leader peer and broadcast to
//! everyone else ([`race`]). Duplicate and late requests are ignored by
//! checking a latch before acting.
//!
//! ### Item Effects
//! Pickups roll a random effect: speed modifiers, invincibility, a homing
//! bomb, a pull hook or a replicated gold counter ([`items`], [`wallet`],
//! [`hazards`]).
//!
//! ## Architecture Design
//!
//! ### One State Object Per Peer
//! [`session::PeerSession`] owns every vehicle, timer and piece of race state
//! of one peer. It exposes `tick()` and `apply_message()` and returns the
//! messages it wants sent; the transport around it is deliberately thin.
//!
//! ### Authoritative Owners
//! Each vehicle is simulated only by the peer that owns it. Everyone else
//! receives snapshots and eases toward them.
//!
//! ### Ordered Pairs, No Global Order
//! The transport guarantees delivery order per sender/receiver pair only,
//! which is why every state-changing handler is idempotent.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use shared::motion::{FixedDirection, FlatGround};
//! use shared::session::PeerSession;
//! use shared::settings::Settings;
//! use glam::Vec3;
//!
//! let mut session = PeerSession::new(1, 1, Settings::default())?;
//! let anchors = vec![
//!     Vec3::new(3.0, 0.0, 0.0),
//!     Vec3::new(0.0, 0.0, 3.0),
//!     Vec3::new(-3.0, 0.0, 0.0),
//!     Vec3::new(0.0, 0.0, -3.0),
//! ];
//! let mut outgoing = session.finalize_track(anchors, vec![1, 2]);
//!
//! let mut input = FixedDirection(Vec3::Z);
//! let ground = FlatGround { height: 0.0 };
//! loop {
//!     outgoing.extend(session.tick(1.0 / 50.0, &mut input, &ground));
//!     // hand `outgoing` to the transport, feed received messages into
//!     // `session.apply_message(from, message)`
//!     outgoing.clear();
//! }
//! # Ok::<(), shared::settings::SettingsError>(())
//! ```

pub mod adherence;
pub mod curve;
pub mod hazards;
pub mod items;
pub mod lap;
pub mod motion;
pub mod progress;
pub mod protocol;
pub mod race;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod vehicle;
pub mod wallet;

/// Identifies a peer taking part in the match.
pub type PlayerId = u32;

/// Identifies a vehicle. Each player drives exactly one vehicle, which carries
/// the player's id.
pub type VehicleId = u32;

/// Bumped whenever [`protocol::Packet`] or [`protocol::Message`] change shape.
pub const PROTOCOL_VERSION: u32 = 1;

pub use curve::{CatmullRomLoop, CurveSample, TrackCurve};
pub use protocol::{Delivery, Envelope, Message, Packet};
pub use session::{PeerSession, SessionEvent};
pub use settings::Settings;
