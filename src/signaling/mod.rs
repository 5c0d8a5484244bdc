//! # Signaling Module
//!
//! Routes session-negotiation messages between paired participants.
//!
//! ## Key Components:
//! - **protocol**: JSON frames exchanged with clients
//! - **relay**: pure event → deliveries logic on top of the matching coordinator
//! - **server**: the actor that serializes all events and talks to sockets

pub mod protocol;  // Wire messages
pub mod relay;     // Inbound event → outbound deliveries
pub mod server;    // Matchmaking actor

pub use protocol::{ClientMessage, ServerMessage};
pub use relay::SignalingEvent;
pub use server::{ClientEvent, Connect, Deliver, Disconnect, GetStats, MatchmakingServer};
