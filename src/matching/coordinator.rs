//! # Matching Coordinator
//!
//! Owns the waiting queue and the pairing registry and implements the pairing
//! lifecycle on top of them. Nothing else in the crate touches those structures.
//!
//! ## Operations:
//! - **request_pairing**: match with the longest-waiting participant, or start waiting
//! - **end_pairing**: leave the queue and/or tear down the current pairing
//! - **skip**: `end_pairing` followed by `request_pairing` for the same participant
//! - **validate**: guard against negotiation messages for a superseded pairing
//!
//! Every operation is total: calling it in any state either does the transition or
//! is a no-op returning `None`. There are no error paths for callers to handle.
//!
//! ## Concurrency:
//! The coordinator is a plain struct with `&mut self` methods. Serialization is the
//! caller's job; in this crate it is owned by a single actor, so each operation
//! runs to completion before the next one starts.

use super::queue::WaitingQueue;
use super::registry::PairingRegistry;
use super::ParticipantId;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};

/// Snapshot of pool sizes, as reported to clients and the HTTP stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MatchingStats {
    pub waiting_count: usize,
    pub pair_count: usize,
}

/// Where a participant currently is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantState {
    Idle,
    Waiting,
    Paired {
        partner: ParticipantId,
        established: bool,
    },
}

#[derive(Debug, Default)]
pub struct MatchingCoordinator {
    queue: WaitingQueue,
    registry: PairingRegistry,
}

impl MatchingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a partner.
    ///
    /// ## Behavior:
    /// - Already paired: returns `None`, nothing changes
    /// - Already waiting: returns `None`, keeps its place in the queue
    /// - Someone waiting: pairs with the oldest waiting participant and returns it
    /// - Nobody waiting: joins the queue and returns `None`
    pub fn request_pairing(&mut self, id: &ParticipantId) -> Option<ParticipantId> {
        if self.registry.is_paired(id) {
            debug!(participant = %id, "Pairing requested while already paired, ignoring");
            return None;
        }
        if self.queue.contains(id) {
            debug!(participant = %id, "Pairing requested while already waiting, ignoring");
            return None;
        }

        let (partner, waited_ms) = match self.queue.dequeue_oldest() {
            Some(entry) => {
                let waited_ms = (Utc::now() - entry.enqueued_at).num_milliseconds();
                (entry.participant_id, waited_ms)
            }
            None => {
                self.queue.enqueue(id.clone());
                info!(participant = %id, waiting = self.queue.len(), "Participant waiting for a partner");
                return None;
            }
        };

        if let Err(conflict) = self.registry.pair(id, &partner) {
            // Queue and registry are disjoint, so this only fires on a bug
            error!(participant = %id, peer = %partner, error = %conflict, "Pairing refused");
            self.queue.enqueue(id.clone());
            self.debug_check();
            return None;
        }

        info!(participant = %id, peer = %partner, peer_waited_ms = waited_ms, "Participants paired");
        self.debug_check();
        Some(partner)
    }

    /// Leave the queue and end the current pairing, returning the former partner.
    ///
    /// Used for an explicit end and for transport disconnects alike. Safe to call
    /// any number of times.
    pub fn end_pairing(&mut self, id: &ParticipantId) -> Option<ParticipantId> {
        if self.queue.remove(id) {
            debug!(participant = %id, "Removed participant from waiting queue");
        }

        let lasted_ms = self
            .registry
            .handshake(id)
            .map(|handshake| (Utc::now() - handshake.paired_at).num_milliseconds());
        let partner = self.registry.unpair(id);
        if let (Some(partner), Some(lasted_ms)) = (&partner, lasted_ms) {
            info!(participant = %id, peer = %partner, lasted_ms, "Pairing ended");
        }

        self.debug_check();
        partner
    }

    /// End the current pairing and immediately ask for a new partner.
    ///
    /// Returns `(former_partner, new_partner)`. The former partner is left idle;
    /// putting it back in the pool is up to the caller once it has been told.
    pub fn skip(&mut self, id: &ParticipantId) -> (Option<ParticipantId>, Option<ParticipantId>) {
        let former = self.end_pairing(id);
        let next = self.request_pairing(id);
        (former, next)
    }

    pub fn partner_of(&self, id: &ParticipantId) -> Option<ParticipantId> {
        self.registry.partner_of(id).cloned()
    }

    /// True only if `claimed_partner` is still `id`'s current partner.
    pub fn validate(&self, id: &ParticipantId, claimed_partner: &ParticipantId) -> bool {
        self.registry.is_mutual_partner(id, claimed_partner)
    }

    pub fn mark_established(&mut self, id: &ParticipantId) {
        if !self.registry.mark_established(id) {
            debug!(participant = %id, "Cannot mark handshake established: not paired");
        }
    }

    pub fn stats(&self) -> MatchingStats {
        MatchingStats {
            waiting_count: self.queue.len(),
            pair_count: self.registry.pair_count(),
        }
    }

    pub fn established_pair_count(&self) -> usize {
        self.registry.established_pair_count()
    }

    pub fn participant_state(&self, id: &ParticipantId) -> ParticipantState {
        if let Some(handshake) = self.registry.handshake(id) {
            return ParticipantState::Paired {
                partner: handshake.partner_id.clone(),
                established: handshake.established,
            };
        }
        if self.queue.contains(id) {
            return ParticipantState::Waiting;
        }
        ParticipantState::Idle
    }

    /// Verify the structural invariants across queue and registry.
    ///
    /// ## Checks:
    /// - registry is symmetric and agrees with the handshake records
    /// - no participant is both waiting and paired
    pub fn check_invariants(&self) -> Result<(), String> {
        self.registry.check_consistency()?;

        if let Some(entry) = self
            .queue
            .iter()
            .find(|entry| self.registry.is_paired(&entry.participant_id))
        {
            return Err(format!(
                "participant {} is both waiting and paired",
                entry.participant_id
            ));
        }

        Ok(())
    }

    fn debug_check(&self) {
        debug_assert!(
            self.check_invariants().is_ok(),
            "matching invariants violated: {:?}",
            self.check_invariants()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    fn assert_consistent(coordinator: &MatchingCoordinator) {
        if let Err(violation) = coordinator.check_invariants() {
            panic!("invariant violated: {}", violation);
        }
    }

    #[test]
    fn test_first_request_waits_second_is_matched() {
        let mut coordinator = MatchingCoordinator::new();

        assert_eq!(coordinator.request_pairing(&id("a")), None);
        assert_eq!(coordinator.participant_state(&id("a")), ParticipantState::Waiting);

        assert_eq!(coordinator.request_pairing(&id("b")), Some(id("a")));
        assert_eq!(
            coordinator.stats(),
            MatchingStats { waiting_count: 0, pair_count: 1 }
        );
        assert_consistent(&coordinator);
    }

    #[test]
    fn test_longest_waiting_is_matched_first() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.queue.enqueue(id("a"));
        coordinator.queue.enqueue(id("b"));

        assert_eq!(coordinator.request_pairing(&id("c")), Some(id("a")));
        assert_eq!(coordinator.participant_state(&id("b")), ParticipantState::Waiting);
        assert_consistent(&coordinator);
    }

    #[test]
    fn test_request_while_paired_is_ignored() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.request_pairing(&id("a"));
        coordinator.request_pairing(&id("b"));
        coordinator.request_pairing(&id("c"));

        assert_eq!(coordinator.request_pairing(&id("a")), None);
        assert_eq!(coordinator.partner_of(&id("a")), Some(id("b")));
        assert_eq!(
            coordinator.stats(),
            MatchingStats { waiting_count: 1, pair_count: 1 }
        );
        assert_consistent(&coordinator);
    }

    #[test]
    fn test_request_while_waiting_never_self_pairs() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.request_pairing(&id("a"));

        assert_eq!(coordinator.request_pairing(&id("a")), None);
        assert_eq!(coordinator.participant_state(&id("a")), ParticipantState::Waiting);
        assert_eq!(coordinator.stats().waiting_count, 1);
        assert_consistent(&coordinator);
    }

    #[test]
    fn test_end_pairing_twice() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.request_pairing(&id("a"));
        coordinator.request_pairing(&id("b"));

        assert_eq!(coordinator.end_pairing(&id("a")), Some(id("b")));
        assert_eq!(coordinator.end_pairing(&id("a")), None);

        assert_eq!(coordinator.participant_state(&id("a")), ParticipantState::Idle);
        assert_eq!(coordinator.participant_state(&id("b")), ParticipantState::Idle);
        assert_eq!(coordinator.stats(), MatchingStats::default());
        assert_consistent(&coordinator);
    }

    #[test]
    fn test_end_pairing_while_waiting_leaves_queue() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.request_pairing(&id("a"));

        assert_eq!(coordinator.end_pairing(&id("a")), None);
        assert_eq!(coordinator.stats().waiting_count, 0);

        // Nobody left to match with, so b waits instead of pairing with a ghost
        assert_eq!(coordinator.request_pairing(&id("b")), None);
    }

    #[test]
    fn test_skip_rematches_with_waiting_participant() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.request_pairing(&id("a"));
        coordinator.request_pairing(&id("b"));
        coordinator.request_pairing(&id("c"));

        let (former, next) = coordinator.skip(&id("a"));
        assert_eq!(former, Some(id("b")));
        assert_eq!(next, Some(id("c")));

        // The skipped partner is not put back in the pool by skip itself
        assert_eq!(coordinator.participant_state(&id("b")), ParticipantState::Idle);
        assert_consistent(&coordinator);
    }

    #[test]
    fn test_skip_with_nobody_waiting_enqueues() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.request_pairing(&id("a"));
        coordinator.request_pairing(&id("b"));

        let (former, next) = coordinator.skip(&id("b"));
        assert_eq!(former, Some(id("a")));
        assert_eq!(next, None);
        assert_eq!(coordinator.participant_state(&id("b")), ParticipantState::Waiting);
        assert_consistent(&coordinator);
    }

    #[test]
    fn test_skip_while_idle_just_requests() {
        let mut coordinator = MatchingCoordinator::new();
        let (former, next) = coordinator.skip(&id("a"));

        assert_eq!(former, None);
        assert_eq!(next, None);
        assert_eq!(coordinator.participant_state(&id("a")), ParticipantState::Waiting);
    }

    #[test]
    fn test_validate_after_partner_moves_on() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.request_pairing(&id("a"));
        coordinator.request_pairing(&id("b"));
        assert!(coordinator.validate(&id("a"), &id("b")));

        coordinator.end_pairing(&id("b"));
        assert!(!coordinator.validate(&id("a"), &id("b")));
        assert!(!coordinator.validate(&id("b"), &id("a")));
    }

    #[test]
    fn test_established_pairs_are_counted() {
        let mut coordinator = MatchingCoordinator::new();
        coordinator.request_pairing(&id("a"));
        coordinator.request_pairing(&id("b"));
        coordinator.mark_established(&id("a"));
        coordinator.mark_established(&id("b"));
        coordinator.request_pairing(&id("c"));

        assert_eq!(
            coordinator.participant_state(&id("a")),
            ParticipantState::Paired { partner: id("b"), established: true }
        );
        assert_eq!(coordinator.established_pair_count(), 1);
        assert_eq!(
            coordinator.stats(),
            MatchingStats { waiting_count: 1, pair_count: 1 }
        );
    }

    #[test]
    fn test_symmetry_holds_through_mixed_operations() {
        let mut coordinator = MatchingCoordinator::new();
        let ids: Vec<ParticipantId> = (0..8).map(|i| id(&format!("p{}", i))).collect();

        for (step, participant) in ids.iter().cycle().take(40).enumerate() {
            match step % 5 {
                0 | 1 => {
                    coordinator.request_pairing(participant);
                }
                2 => {
                    coordinator.skip(participant);
                }
                3 => {
                    coordinator.end_pairing(participant);
                }
                _ => coordinator.mark_established(participant),
            }
            assert_consistent(&coordinator);

            for other in &ids {
                if let Some(partner) = coordinator.partner_of(other) {
                    assert_eq!(coordinator.partner_of(&partner).as_ref(), Some(other));
                }
            }
        }
    }
}
