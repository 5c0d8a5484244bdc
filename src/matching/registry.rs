//! # Pairing Registry
//!
//! Symmetric map of current pairings plus the handshake progress of each side.
//!
//! ## Representation:
//! A pairing {A, B} is stored as two directed entries A→B and B→A. Each side also
//! gets a `HandshakeState` record. Both maps always have exactly the same keys and
//! every directed entry has its reciprocal; anything else is a bug in this module.

use super::ParticipantId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Handshake progress for one side of a pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeState {
    pub partner_id: ParticipantId,
    /// Set once the negotiation answer for this pairing has been relayed. Never reverts.
    pub established: bool,
    pub paired_at: DateTime<Utc>,
}

/// Why a `pair` call was refused. The registry is left untouched in every case.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingConflict {
    /// One of the two participants already has a partner
    AlreadyPaired(ParticipantId),
    /// A participant cannot be paired with itself
    SelfPairing(ParticipantId),
}

impl fmt::Display for PairingConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingConflict::AlreadyPaired(id) => write!(f, "participant {} is already paired", id),
            PairingConflict::SelfPairing(id) => write!(f, "participant {} cannot pair with itself", id),
        }
    }
}

impl std::error::Error for PairingConflict {}

#[derive(Debug, Default)]
pub struct PairingRegistry {
    partners: HashMap<ParticipantId, ParticipantId>,
    handshakes: HashMap<ParticipantId, HandshakeState>,
}

impl PairingRegistry {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair two idle participants.
    ///
    /// ## State Transition:
    /// Both sides go to `Paired(pending)` with `established = false`.
    pub fn pair(&mut self, a: &ParticipantId, b: &ParticipantId) -> Result<(), PairingConflict> {
        if a == b {
            return Err(PairingConflict::SelfPairing(a.clone()));
        }
        if self.partners.contains_key(a) {
            return Err(PairingConflict::AlreadyPaired(a.clone()));
        }
        if self.partners.contains_key(b) {
            return Err(PairingConflict::AlreadyPaired(b.clone()));
        }

        let paired_at = Utc::now();
        self.partners.insert(a.clone(), b.clone());
        self.partners.insert(b.clone(), a.clone());
        self.handshakes.insert(
            a.clone(),
            HandshakeState {
                partner_id: b.clone(),
                established: false,
                paired_at,
            },
        );
        self.handshakes.insert(
            b.clone(),
            HandshakeState {
                partner_id: a.clone(),
                established: false,
                paired_at,
            },
        );
        Ok(())
    }

    pub fn partner_of(&self, id: &ParticipantId) -> Option<&ParticipantId> {
        self.partners.get(id)
    }

    pub fn is_paired(&self, id: &ParticipantId) -> bool {
        self.partners.contains_key(id)
    }

    /// Tear down the pairing that `id` belongs to, returning the former partner.
    ///
    /// Calling this on an unpaired participant returns `None` and changes nothing.
    pub fn unpair(&mut self, id: &ParticipantId) -> Option<ParticipantId> {
        let partner = self.partners.remove(id)?;
        self.handshakes.remove(id);

        // Only drop the reciprocal entry if it still points back at us
        if self.partners.get(&partner) == Some(id) {
            self.partners.remove(&partner);
            self.handshakes.remove(&partner);
        }

        Some(partner)
    }

    /// True only if `claimed_partner` is the current partner of `id` (and vice versa).
    ///
    /// This is the guard that rejects late negotiation messages for a pairing that
    /// has already been torn down.
    pub fn is_mutual_partner(&self, id: &ParticipantId, claimed_partner: &ParticipantId) -> bool {
        self.partners.get(id) == Some(claimed_partner)
            && self.partners.get(claimed_partner) == Some(id)
    }

    /// Mark one side's handshake as established. Returns `false` if `id` is not paired.
    pub fn mark_established(&mut self, id: &ParticipantId) -> bool {
        match self.handshakes.get_mut(id) {
            Some(state) => {
                state.established = true;
                true
            }
            None => false,
        }
    }

    pub fn handshake(&self, id: &ParticipantId) -> Option<&HandshakeState> {
        self.handshakes.get(id)
    }

    /// Number of distinct pairings.
    pub fn pair_count(&self) -> usize {
        self.partners.len() / 2
    }

    /// Number of pairings whose answer has been relayed.
    pub fn established_pair_count(&self) -> usize {
        self.handshakes.values().filter(|state| state.established).count() / 2
    }

    /// Check symmetry and key-set agreement between the two maps.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.partners.len() != self.handshakes.len() {
            return Err(format!(
                "registry has {} partner entries but {} handshake records",
                self.partners.len(),
                self.handshakes.len()
            ));
        }

        for (id, partner) in &self.partners {
            if self.partners.get(partner) != Some(id) {
                return Err(format!("one-sided pairing {} -> {}", id, partner));
            }
            match self.handshakes.get(id) {
                Some(state) if &state.partner_id == partner => {}
                Some(state) => {
                    return Err(format!(
                        "handshake for {} names {} but registry names {}",
                        id, state.partner_id, partner
                    ))
                }
                None => return Err(format!("missing handshake record for {}", id)),
            }
        }

        Ok(())
    }
}
