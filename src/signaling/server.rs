//! # Matchmaking Server Actor
//!
//! Single actor that owns the signaling relay (and through it all pairing state)
//! plus the table of connected sockets. Every WebSocket actor forwards its events
//! here, so pairing operations are processed one at a time, in mailbox order.
//!
//! ## Actor Model:
//! - Sockets register with `Connect` and leave with `Disconnect`
//! - Client frames arrive as `ClientEvent`
//! - Outbound messages go back to sockets as `Deliver` via their `Recipient`
//! - No handler awaits anything; delivery is a mailbox push
//!
//! ## Deferred re-queue:
//! After a skip, the skipped participant is re-queued by a separate operation that
//! runs after its `skipped-by-peer` notice has been pushed to its mailbox. With a
//! non-zero `matching.requeue_delay_ms` it is scheduled with `run_later` instead of
//! running straight away. A scheduled re-queue is cancelled as soon as that
//! participant joins, skips, ends or disconnects on its own.

use super::protocol::ServerMessage;
use super::relay::{Delivery, SignalingEvent, SignalingRelay};
use crate::matching::{MatchingCoordinator, MatchingStats, ParticipantId};
use crate::state::AppState;
use actix::prelude::*;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// A server message on its way to one socket.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct Deliver(pub ServerMessage);

/// A new socket joined. The socket will receive its messages through `addr`.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub participant: ParticipantId,
    pub addr: Recipient<Deliver>,
}

/// A socket went away.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub participant: ParticipantId,
}

/// A signaling event from a connected participant.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ClientEvent {
    pub participant: ParticipantId,
    pub event: SignalingEvent,
}

/// Query the current pool sizes.
#[derive(Message)]
#[rtype(result = "MatchingStats")]
pub struct GetStats;

pub struct MatchmakingServer {
    relay: SignalingRelay,
    sessions: HashMap<ParticipantId, Recipient<Deliver>>,
    /// Deferred re-queues that have not fired yet
    pending_requeues: HashMap<ParticipantId, SpawnHandle>,
    app_state: AppState,
}

impl MatchmakingServer {
    pub fn new(app_state: AppState) -> Self {
        Self {
            relay: SignalingRelay::new(MatchingCoordinator::new()),
            sessions: HashMap::new(),
            pending_requeues: HashMap::new(),
            app_state,
        }
    }

    /// Push deliveries to their sockets, in order.
    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            self.record(&delivery.message);

            match self.sessions.get(&delivery.to) {
                Some(addr) => addr.do_send(Deliver(delivery.message)),
                None => {
                    // Gone between the decision and the send; nothing to do
                    debug!(participant = %delivery.to, "Dropping message for disconnected participant");
                }
            }
        }
    }

    fn record(&self, message: &ServerMessage) {
        match message {
            // Each new pairing produces one initiator message
            ServerMessage::Paired { initiator: true, .. } => self.app_state.record_pairing_created(),
            ServerMessage::PairingInvalid => self.app_state.record_message_rejected(),
            message if message.is_relay() => self.app_state.record_message_relayed(),
            _ => {}
        }
    }

    fn schedule_requeue(&mut self, participant: ParticipantId, ctx: &mut Context<Self>) {
        let delay = Duration::from_millis(self.app_state.get_config().matching.requeue_delay_ms);

        if delay.is_zero() {
            self.requeue(&participant);
        } else {
            debug!(participant = %participant, delay_ms = delay.as_millis() as u64, "Scheduling re-queue");
            self.cancel_requeue(&participant, ctx);
            let handle = ctx.run_later(delay, {
                let participant = participant.clone();
                move |act, _ctx| {
                    act.pending_requeues.remove(&participant);
                    act.requeue(&participant);
                }
            });
            self.pending_requeues.insert(participant, handle);
        }
    }

    /// Drop a scheduled re-queue for `participant`, if there is one.
    fn cancel_requeue(&mut self, participant: &ParticipantId, ctx: &mut Context<Self>) {
        if let Some(handle) = self.pending_requeues.remove(participant) {
            ctx.cancel_future(handle);
            debug!(participant = %participant, "Cancelled scheduled re-queue");
        }
    }

    fn requeue(&mut self, participant: &ParticipantId) {
        if !self.sessions.contains_key(participant) {
            debug!(participant = %participant, "Skipped participant disconnected before re-queue");
            return;
        }

        let deliveries = self.relay.requeue(participant);
        self.dispatch(deliveries);
    }
}

impl Actor for MatchmakingServer {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("Matchmaking server started");
    }
}

impl Handler<Connect> for MatchmakingServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _ctx: &mut Self::Context) {
        info!(participant = %msg.participant, connected = self.sessions.len() + 1, "Participant connected");
        self.sessions.insert(msg.participant, msg.addr);
    }
}

impl Handler<Disconnect> for MatchmakingServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, ctx: &mut Self::Context) {
        if self.sessions.remove(&msg.participant).is_none() {
            return;
        }
        self.cancel_requeue(&msg.participant, ctx);
        info!(participant = %msg.participant, connected = self.sessions.len(), "Participant disconnected");

        let outcome = self.relay.handle(&msg.participant, SignalingEvent::Disconnect);
        self.dispatch(outcome.deliveries);
    }
}

impl Handler<ClientEvent> for MatchmakingServer {
    type Result = ();

    fn handle(&mut self, msg: ClientEvent, ctx: &mut Self::Context) {
        if !self.sessions.contains_key(&msg.participant) {
            debug!(participant = %msg.participant, "Event from unregistered participant ignored");
            return;
        }

        // The participant's own choice replaces any pending re-queue
        if matches!(
            msg.event,
            SignalingEvent::JoinRequest | SignalingEvent::Skip | SignalingEvent::End
        ) {
            self.cancel_requeue(&msg.participant, ctx);
        }

        let outcome = self.relay.handle(&msg.participant, msg.event);
        self.dispatch(outcome.deliveries);

        if let Some(skipped) = outcome.requeue {
            self.schedule_requeue(skipped, ctx);
        }
    }
}

impl Handler<GetStats> for MatchmakingServer {
    type Result = MessageResult<GetStats>;

    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.relay.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Test double for a socket: records every message it is sent.
    struct Probe {
        received: Arc<Mutex<Vec<ServerMessage>>>,
    }

    impl Actor for Probe {
        type Context = Context<Self>;
    }

    impl Handler<Deliver> for Probe {
        type Result = ();

        fn handle(&mut self, msg: Deliver, _ctx: &mut Self::Context) {
            self.received.lock().unwrap().push(msg.0);
        }
    }

    /// Answered only after every `Deliver` queued before it has been handled.
    #[derive(Message)]
    #[rtype(result = "()")]
    struct Flush;

    impl Handler<Flush> for Probe {
        type Result = ();

        fn handle(&mut self, _msg: Flush, _ctx: &mut Self::Context) {}
    }

    struct Harness {
        server: Addr<MatchmakingServer>,
        inboxes: HashMap<String, Arc<Mutex<Vec<ServerMessage>>>>,
        probes: Vec<Addr<Probe>>,
    }

    impl Harness {
        fn start(config: AppConfig) -> Self {
            Self {
                server: MatchmakingServer::new(AppState::new(config)).start(),
                inboxes: HashMap::new(),
                probes: Vec::new(),
            }
        }

        fn connect(&mut self, name: &str) {
            let received = Arc::new(Mutex::new(Vec::new()));
            let probe = Probe { received: received.clone() }.start();
            self.server.do_send(Connect {
                participant: ParticipantId::from(name),
                addr: probe.clone().recipient(),
            });
            self.inboxes.insert(name.to_string(), received);
            self.probes.push(probe);
        }

        fn send(&self, name: &str, event: SignalingEvent) {
            self.server.do_send(ClientEvent {
                participant: ParticipantId::from(name),
                event,
            });
        }

        fn disconnect(&self, name: &str) {
            self.server.do_send(Disconnect {
                participant: ParticipantId::from(name),
            });
        }

        /// Wait until the server and then every probe have drained their mailboxes.
        async fn settle(&self) -> MatchingStats {
            let stats = self.server.send(GetStats).await.unwrap();
            for probe in &self.probes {
                probe.send(Flush).await.unwrap();
            }
            stats
        }

        fn inbox(&self, name: &str) -> Vec<ServerMessage> {
            self.inboxes[name].lock().unwrap().clone()
        }
    }

    fn paired(peer: &str, initiator: bool) -> ServerMessage {
        ServerMessage::Paired {
            peer: ParticipantId::from(peer),
            initiator,
        }
    }

    #[actix::test]
    async fn test_two_participants_are_paired() {
        let mut harness = Harness::start(AppConfig::default());
        harness.connect("a");
        harness.connect("b");

        harness.send("a", SignalingEvent::JoinRequest);
        harness.send("b", SignalingEvent::JoinRequest);
        let stats = harness.settle().await;

        assert_eq!(stats, MatchingStats { waiting_count: 0, pair_count: 1 });
        assert_eq!(harness.inbox("a"), vec![ServerMessage::Pending, paired("b", false)]);
        assert_eq!(harness.inbox("b"), vec![paired("a", true)]);
    }

    #[actix::test]
    async fn test_skipped_peer_learns_before_new_pairing() {
        let mut harness = Harness::start(AppConfig::default());
        for name in ["a", "b", "c"] {
            harness.connect(name);
        }
        harness.send("a", SignalingEvent::JoinRequest);
        harness.send("b", SignalingEvent::JoinRequest);
        harness.send("a", SignalingEvent::Skip);
        harness.send("c", SignalingEvent::JoinRequest);
        let stats = harness.settle().await;

        // a skipped b and went back to waiting, b was re-queued after its notice and
        // matched with a, then c arrived to an empty pool
        assert_eq!(stats, MatchingStats { waiting_count: 1, pair_count: 1 });
        assert_eq!(
            harness.inbox("b"),
            vec![paired("a", true), ServerMessage::SkippedByPeer, paired("a", true)]
        );
        assert_eq!(harness.inbox("c"), vec![ServerMessage::Pending]);
    }

    #[actix::test]
    async fn test_deferred_requeue_runs_after_delay() {
        let mut config = AppConfig::default();
        config.matching.requeue_delay_ms = 50;
        let mut harness = Harness::start(config);
        for name in ["a", "b", "c"] {
            harness.connect(name);
        }
        harness.send("a", SignalingEvent::JoinRequest);
        harness.send("b", SignalingEvent::JoinRequest);
        harness.send("c", SignalingEvent::JoinRequest);
        harness.send("a", SignalingEvent::Skip);

        // a is matched with the waiting c right away; b is not back yet
        let stats = harness.settle().await;
        assert_eq!(stats, MatchingStats { waiting_count: 0, pair_count: 1 });
        assert_eq!(harness.inbox("b").last(), Some(&ServerMessage::SkippedByPeer));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = harness.settle().await;
        assert_eq!(stats, MatchingStats { waiting_count: 1, pair_count: 1 });
        assert_eq!(harness.inbox("b").last(), Some(&ServerMessage::Pending));
    }

    #[actix::test]
    async fn test_disconnect_before_deferred_requeue() {
        let mut config = AppConfig::default();
        config.matching.requeue_delay_ms = 50;
        let mut harness = Harness::start(config);
        harness.connect("a");
        harness.connect("b");
        harness.send("a", SignalingEvent::JoinRequest);
        harness.send("b", SignalingEvent::JoinRequest);
        harness.send("a", SignalingEvent::Skip);
        harness.disconnect("b");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = harness.settle().await;

        // Only a remains, waiting; b never re-entered the pool
        assert_eq!(stats, MatchingStats { waiting_count: 1, pair_count: 0 });
    }

    #[actix::test]
    async fn test_end_cancels_deferred_requeue() {
        let mut config = AppConfig::default();
        config.matching.requeue_delay_ms = 50;
        let mut harness = Harness::start(config);
        harness.connect("a");
        harness.connect("b");
        harness.send("a", SignalingEvent::JoinRequest);
        harness.send("b", SignalingEvent::JoinRequest);
        harness.send("a", SignalingEvent::Skip);
        harness.send("b", SignalingEvent::End);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = harness.settle().await;

        // b asked to stop, so it must not come back and match the waiting a
        assert_eq!(stats, MatchingStats { waiting_count: 1, pair_count: 0 });
        assert_eq!(
            harness.inbox("b"),
            vec![paired("a", true), ServerMessage::SkippedByPeer, ServerMessage::Ended]
        );
    }

    #[actix::test]
    async fn test_join_replaces_deferred_requeue() {
        let mut config = AppConfig::default();
        config.matching.requeue_delay_ms = 50;
        let mut harness = Harness::start(config);
        for name in ["a", "b", "c"] {
            harness.connect(name);
        }
        harness.send("a", SignalingEvent::JoinRequest);
        harness.send("b", SignalingEvent::JoinRequest);
        harness.send("a", SignalingEvent::Skip);
        harness.send("b", SignalingEvent::JoinRequest);
        harness.send("b", SignalingEvent::End);
        harness.send("c", SignalingEvent::JoinRequest);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = harness.settle().await;

        // b re-joined (matched with a), then ended; the old timer must not bring it
        // back to match the waiting c
        assert_eq!(stats, MatchingStats { waiting_count: 1, pair_count: 0 });
        assert_eq!(harness.inbox("b").last(), Some(&ServerMessage::Ended));
        assert_eq!(harness.inbox("c"), vec![ServerMessage::Pending]);
    }

    #[actix::test]
    async fn test_offer_after_partner_disconnects() {
        let mut harness = Harness::start(AppConfig::default());
        harness.connect("a");
        harness.connect("b");
        harness.send("a", SignalingEvent::JoinRequest);
        harness.send("b", SignalingEvent::JoinRequest);
        harness.send("a", SignalingEvent::Offer(json!("x")));
        harness.disconnect("b");
        harness.send("a", SignalingEvent::Offer(json!("y")));
        harness.settle().await;

        assert_eq!(
            harness.inbox("b"),
            vec![
                paired("a", true),
                ServerMessage::Offer { offer: json!("x"), from: ParticipantId::from("a") },
            ]
        );
        assert_eq!(
            harness.inbox("a"),
            vec![
                ServerMessage::Pending,
                paired("b", false),
                ServerMessage::PeerDisconnected,
                ServerMessage::PairingInvalid,
            ]
        );
    }

    #[actix::test]
    async fn test_events_from_unknown_participant_are_ignored() {
        let mut harness = Harness::start(AppConfig::default());
        harness.connect("a");
        harness.send("ghost", SignalingEvent::JoinRequest);
        harness.send("a", SignalingEvent::JoinRequest);
        let stats = harness.settle().await;

        assert_eq!(stats, MatchingStats { waiting_count: 1, pair_count: 0 });
        assert_eq!(harness.inbox("a"), vec![ServerMessage::Pending]);
    }
}
