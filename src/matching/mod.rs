//! # Matching Module
//!
//! Decides who talks to whom. Participants ask for a partner, wait in a FIFO queue
//! if nobody is available, and are paired one-to-one with the longest-waiting
//! participant when someone new arrives.
//!
//! ## Key Components:
//! - **WaitingQueue**: participants waiting for a partner, oldest first
//! - **PairingRegistry**: symmetric pairings and per-side handshake progress
//! - **MatchingCoordinator**: the only thing allowed to mutate the two above
//!
//! ## Participant Lifecycle:
//! `Idle → Waiting → Paired(pending) → Paired(established) → Idle`
//!
//! Skip, end and disconnect all return a participant to `Idle`; skip immediately
//! asks for a new partner again.

pub mod coordinator;  // Join / skip / end / disconnect semantics
pub mod queue;        // FIFO waiting queue
pub mod registry;     // Symmetric pairing map + handshake state

pub use coordinator::{MatchingCoordinator, MatchingStats, ParticipantState};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque participant identifier assigned by the transport layer.
///
/// The matching core never generates or inspects these; it only compares them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
