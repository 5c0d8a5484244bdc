//! # Signaling Relay
//!
//! Turns one inbound event from one participant into the ordered list of messages
//! that must go out, calling into the `MatchingCoordinator` for every decision.
//!
//! ## Design:
//! The relay is a plain synchronous function of (coordinator, sender, event). It
//! knows nothing about sockets or actors; whoever owns it is responsible for
//! delivering the returned messages in order. That keeps every protocol rule
//! testable without a live connection.
//!
//! ## Skip ordering:
//! When A skips B, B must learn that its pairing ended before it can be announced
//! as anyone else's partner. The relay therefore never re-queues B itself. It
//! returns B as a follow-up (`RelayOutcome::requeue`) and the owner calls
//! [`SignalingRelay::requeue`] once the `skipped-by-peer` notice has been
//! dispatched.

use super::protocol::{ClientMessage, ServerMessage};
use crate::matching::{MatchingCoordinator, MatchingStats, ParticipantId, ParticipantState};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Everything that can happen to a participant, as seen by the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    JoinRequest,
    Skip,
    End,
    Offer(Value),
    Answer(Value),
    Candidate(Value),
    StatsRequest,
    /// The transport lost the connection
    Disconnect,
}

impl SignalingEvent {
    /// Map a client frame to a signaling event. Heartbeat frames are not signaling.
    pub fn from_client(message: ClientMessage) -> Option<Self> {
        match message {
            ClientMessage::JoinRequest => Some(SignalingEvent::JoinRequest),
            ClientMessage::Skip => Some(SignalingEvent::Skip),
            ClientMessage::End => Some(SignalingEvent::End),
            ClientMessage::NegotiationOffer { offer } => Some(SignalingEvent::Offer(offer)),
            ClientMessage::NegotiationAnswer { answer } => Some(SignalingEvent::Answer(answer)),
            ClientMessage::NegotiationCandidate { candidate } => Some(SignalingEvent::Candidate(candidate)),
            ClientMessage::StatsRequest => Some(SignalingEvent::StatsRequest),
            ClientMessage::Pong { .. } => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SignalingEvent::JoinRequest => "join-request",
            SignalingEvent::Skip => "skip",
            SignalingEvent::End => "end",
            SignalingEvent::Offer(_) => "negotiation-offer",
            SignalingEvent::Answer(_) => "negotiation-answer",
            SignalingEvent::Candidate(_) => "negotiation-candidate",
            SignalingEvent::StatsRequest => "stats-request",
            SignalingEvent::Disconnect => "transport-disconnect",
        }
    }
}

/// One outbound message and who it is for.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ParticipantId,
    pub message: ServerMessage,
}

impl Delivery {
    fn new(to: &ParticipantId, message: ServerMessage) -> Self {
        Self {
            to: to.clone(),
            message,
        }
    }
}

/// Result of handling one event.
#[derive(Debug, Default, PartialEq)]
pub struct RelayOutcome {
    /// Messages to send, in this exact order
    pub deliveries: Vec<Delivery>,
    /// A skipped participant to put back in the pool after `deliveries` went out
    pub requeue: Option<ParticipantId>,
}

#[derive(Debug, Default)]
pub struct SignalingRelay {
    coordinator: MatchingCoordinator,
}

impl SignalingRelay {
    pub fn new(coordinator: MatchingCoordinator) -> Self {
        Self { coordinator }
    }

    /// Read-only view of the pairing state.
    #[cfg(test)]
    pub fn coordinator(&self) -> &MatchingCoordinator {
        &self.coordinator
    }

    pub fn stats(&self) -> MatchingStats {
        self.coordinator.stats()
    }

    /// Handle one event from `sender`.
    pub fn handle(&mut self, sender: &ParticipantId, event: SignalingEvent) -> RelayOutcome {
        debug!(participant = %sender, event = event.name(), "Handling signaling event");

        match event {
            SignalingEvent::JoinRequest => RelayOutcome {
                deliveries: self.join(sender),
                requeue: None,
            },
            SignalingEvent::Skip => self.skip(sender),
            SignalingEvent::End => RelayOutcome {
                deliveries: self.end(sender),
                requeue: None,
            },
            SignalingEvent::Offer(offer) => RelayOutcome {
                deliveries: self.relay_offer(sender, offer),
                requeue: None,
            },
            SignalingEvent::Answer(answer) => RelayOutcome {
                deliveries: self.relay_answer(sender, answer),
                requeue: None,
            },
            SignalingEvent::Candidate(candidate) => RelayOutcome {
                deliveries: self.relay_candidate(sender, candidate),
                requeue: None,
            },
            SignalingEvent::StatsRequest => {
                let stats = self.coordinator.stats();
                RelayOutcome {
                    deliveries: vec![Delivery::new(
                        sender,
                        ServerMessage::Stats {
                            waiting_count: stats.waiting_count,
                            pair_count: stats.pair_count,
                        },
                    )],
                    requeue: None,
                }
            }
            SignalingEvent::Disconnect => RelayOutcome {
                deliveries: self.disconnect(sender),
                requeue: None,
            },
        }
    }

    /// Put a skipped participant back in the pool.
    ///
    /// Only acts on a participant that is still idle. If it already rejoined,
    /// got paired, or was otherwise moved on since it was skipped, nothing is sent.
    pub fn requeue(&mut self, participant: &ParticipantId) -> Vec<Delivery> {
        if self.coordinator.participant_state(participant) != ParticipantState::Idle {
            debug!(participant = %participant, "Skipped participant no longer idle, not re-queuing");
            return Vec::new();
        }

        info!(participant = %participant, "Re-queuing skipped participant");
        self.join(participant)
    }

    fn join(&mut self, participant: &ParticipantId) -> Vec<Delivery> {
        let peer = self.coordinator.request_pairing(participant);
        Self::pairing_result(participant, peer)
    }

    /// `paired` to both sides if `participant` just got a peer, else `pending` to it.
    fn pairing_result(participant: &ParticipantId, peer: Option<ParticipantId>) -> Vec<Delivery> {
        match peer {
            Some(peer) => vec![
                Delivery::new(
                    participant,
                    ServerMessage::Paired {
                        peer: peer.clone(),
                        initiator: true,
                    },
                ),
                Delivery::new(
                    &peer,
                    ServerMessage::Paired {
                        peer: participant.clone(),
                        initiator: false,
                    },
                ),
            ],
            None => vec![Delivery::new(participant, ServerMessage::Pending)],
        }
    }

    fn skip(&mut self, sender: &ParticipantId) -> RelayOutcome {
        let (former, next) = self.coordinator.skip(sender);

        let mut deliveries = Vec::new();
        if let Some(former) = &former {
            deliveries.push(Delivery::new(former, ServerMessage::SkippedByPeer));
        }
        deliveries.extend(Self::pairing_result(sender, next));

        RelayOutcome {
            deliveries,
            requeue: former,
        }
    }

    fn end(&mut self, sender: &ParticipantId) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        if let Some(former) = self.coordinator.end_pairing(sender) {
            deliveries.push(Delivery::new(&former, ServerMessage::PeerEnded));
        }
        deliveries.push(Delivery::new(sender, ServerMessage::Ended));
        deliveries
    }

    fn disconnect(&mut self, sender: &ParticipantId) -> Vec<Delivery> {
        match self.coordinator.end_pairing(sender) {
            Some(former) => vec![Delivery::new(&former, ServerMessage::PeerDisconnected)],
            None => Vec::new(),
        }
    }

    /// Current partner of `sender`, if the pairing is still mutual.
    fn valid_partner(&self, sender: &ParticipantId) -> Option<ParticipantId> {
        self.coordinator
            .partner_of(sender)
            .filter(|partner| self.coordinator.validate(sender, partner))
    }

    fn relay_offer(&mut self, sender: &ParticipantId, offer: Value) -> Vec<Delivery> {
        match self.valid_partner(sender) {
            Some(partner) => {
                debug!(participant = %sender, peer = %partner, "Relaying offer");
                vec![Delivery::new(
                    &partner,
                    ServerMessage::Offer {
                        offer,
                        from: sender.clone(),
                    },
                )]
            }
            None => {
                warn!(participant = %sender, "Offer for a pairing that no longer exists");
                vec![Delivery::new(sender, ServerMessage::PairingInvalid)]
            }
        }
    }

    fn relay_answer(&mut self, sender: &ParticipantId, answer: Value) -> Vec<Delivery> {
        match self.valid_partner(sender) {
            Some(partner) => {
                self.coordinator.mark_established(sender);
                self.coordinator.mark_established(&partner);
                info!(
                    participant = %sender,
                    peer = %partner,
                    established_pairs = self.coordinator.established_pair_count(),
                    "Handshake established"
                );
                vec![Delivery::new(
                    &partner,
                    ServerMessage::Answer {
                        answer,
                        from: sender.clone(),
                    },
                )]
            }
            None => {
                warn!(participant = %sender, "Answer for a pairing that no longer exists");
                vec![Delivery::new(sender, ServerMessage::PairingInvalid)]
            }
        }
    }

    fn relay_candidate(&mut self, sender: &ParticipantId, candidate: Value) -> Vec<Delivery> {
        match self.valid_partner(sender) {
            Some(partner) => vec![Delivery::new(
                &partner,
                ServerMessage::Candidate {
                    candidate,
                    from: sender.clone(),
                },
            )],
            None => {
                // Trickled candidates routinely arrive after teardown
                debug!(participant = %sender, "Dropping candidate for a pairing that no longer exists");
                Vec::new()
            }
        }
    }
}
