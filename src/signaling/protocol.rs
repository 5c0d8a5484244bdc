//! # Signaling Wire Protocol
//!
//! JSON messages exchanged over the `/ws` WebSocket. Every frame is an object
//! tagged by a kebab-case `"type"` field, with snake_case payload fields.
//!
//! ## Client → Server:
//! `join-request`, `skip`, `end`, `negotiation-offer`, `negotiation-answer`,
//! `negotiation-candidate`, `stats-request`, `pong`
//!
//! ## Server → Client:
//! `connected`, `pending`, `paired`, `skipped-by-peer`, `peer-ended`,
//! `peer-disconnected`, `ended`, `pairing-invalid`, `offer`, `answer`,
//! `candidate`, `stats`, `ping`, `error`
//!
//! Offer, answer and candidate bodies are opaque JSON and are relayed verbatim.

use crate::matching::ParticipantId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Ask to be paired with someone
    JoinRequest,
    /// Leave the current partner and look for a new one
    Skip,
    /// Leave the current partner (or the queue) and stop looking
    End,
    NegotiationOffer { offer: Value },
    NegotiationAnswer { answer: Value },
    NegotiationCandidate { candidate: Value },
    StatsRequest,
    /// Heartbeat reply to a server `ping`
    Pong { timestamp: u64 },
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every connection: the id the transport assigned
    Connected { participant_id: ParticipantId },
    /// Nobody available yet; you are in the waiting queue
    Pending,
    /// You have a partner. Exactly one side gets `initiator: true` and should
    /// create the offer.
    Paired { peer: ParticipantId, initiator: bool },
    SkippedByPeer,
    PeerEnded,
    PeerDisconnected,
    /// Confirmation of your own `end`
    Ended,
    /// Your negotiation message referenced a pairing that no longer exists
    PairingInvalid,
    Offer { offer: Value, from: ParticipantId },
    Answer { answer: Value, from: ParticipantId },
    Candidate { candidate: Value, from: ParticipantId },
    Stats { waiting_count: usize, pair_count: usize },
    Ping { timestamp: u64 },
    Error { code: String, message: String },
}

impl ServerMessage {
    /// True for messages that carry a relayed negotiation payload.
    pub fn is_relay(&self) -> bool {
        matches!(
            self,
            ServerMessage::Offer { .. } | ServerMessage::Answer { .. } | ServerMessage::Candidate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_messages_parse_from_wire() {
        let join: ClientMessage = serde_json::from_str(r#"{"type":"join-request"}"#).unwrap();
        assert_eq!(join, ClientMessage::JoinRequest);

        let offer: ClientMessage = serde_json::from_str(
            r#"{"type":"negotiation-offer","offer":{"type":"offer","sdp":"v=0"}}"#,
        )
        .unwrap();
        assert_eq!(
            offer,
            ClientMessage::NegotiationOffer {
                offer: json!({"type": "offer", "sdp": "v=0"})
            }
        );

        let stats: ClientMessage = serde_json::from_str(r#"{"type":"stats-request"}"#).unwrap();
        assert_eq!(stats, ClientMessage::StatsRequest);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"start-calling"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"negotiation-answer"}"#).is_err());
    }

    #[test]
    fn test_server_messages_wire_shape() {
        let paired = serde_json::to_value(ServerMessage::Paired {
            peer: ParticipantId::from("abc"),
            initiator: true,
        })
        .unwrap();
        assert_eq!(paired, json!({"type": "paired", "peer": "abc", "initiator": true}));

        let candidate = serde_json::to_value(ServerMessage::Candidate {
            candidate: json!({"candidate": "candidate:1 1 udp"}),
            from: ParticipantId::from("abc"),
        })
        .unwrap();
        assert_eq!(
            candidate,
            json!({"type": "candidate", "candidate": {"candidate": "candidate:1 1 udp"}, "from": "abc"})
        );

        let skipped = serde_json::to_value(ServerMessage::SkippedByPeer).unwrap();
        assert_eq!(skipped, json!({"type": "skipped-by-peer"}));

        let stats = serde_json::to_value(ServerMessage::Stats { waiting_count: 1, pair_count: 2 }).unwrap();
        assert_eq!(stats, json!({"type": "stats", "waiting_count": 1, "pair_count": 2}));
    }
}
