//! # WebSocket Signaling Handler
//!
//! Transport for the signaling protocol. Clients connect to `/ws`, receive their
//! participant id, and then exchange JSON frames (see `signaling::protocol`).
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: refused with 503 if the connection limit is reached
//! 2. **Registration**: the socket gets a fresh UUID and registers with the
//!    matchmaking server, then sends `connected` to the client
//! 3. **Signaling**: every valid client frame is forwarded to the matchmaking server
//! 4. **Heartbeat**: a `ping` every interval; silent clients are dropped
//! 5. **Teardown**: on close the server is told, which ends any pairing
//!
//! Each connection is its own actor. It holds no pairing state; it only translates
//! between WebSocket frames and matchmaking server messages.

use crate::error::AppError;
use crate::matching::ParticipantId;
use crate::signaling::{ClientEvent, ClientMessage, Connect, Deliver, Disconnect, MatchmakingServer, ServerMessage, SignalingEvent};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket actor for one participant.
pub struct ParticipantSocket {
    /// Transport-assigned id, opaque to the matching core
    participant_id: ParticipantId,

    server: Addr<MatchmakingServer>,

    app_state: AppState,

    /// Last time anything was heard from the client
    last_heartbeat: Instant,

    heartbeat_interval: Duration,

    client_timeout: Duration,
}

impl ParticipantSocket {
    pub fn new(app_state: AppState, server: Addr<MatchmakingServer>) -> Self {
        let websocket = app_state.get_config().websocket;

        Self {
            participant_id: ParticipantId::new(Uuid::new_v4().to_string()),
            server,
            app_state,
            last_heartbeat: Instant::now(),
            heartbeat_interval: websocket.heartbeat_interval(),
            client_timeout: websocket.client_timeout(),
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(participant = %self.participant_id, "Failed to serialize message: {}", err),
        }
    }

    /// Send error message to client.
    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(participant = %self.participant_id, "WebSocket error {}: {}", code, message);
        self.send_message(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                self.send_error(ctx, "invalid_message", &format!("Invalid message: {}", err));
                return;
            }
        };

        match SignalingEvent::from_client(message) {
            Some(event) => self.server.do_send(ClientEvent {
                participant: self.participant_id.clone(),
                event,
            }),
            None => {
                // pong
                self.last_heartbeat = Instant::now();
            }
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(participant = %act.participant_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }

            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            act.send_message(ctx, &ServerMessage::Ping { timestamp });
            ctx.ping(b"");
        });
    }
}

impl Actor for ParticipantSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(participant = %self.participant_id, "WebSocket connection started");

        self.server.do_send(Connect {
            participant: self.participant_id.clone(),
            addr: ctx.address().recipient(),
        });
        self.send_message(
            ctx,
            &ServerMessage::Connected {
                participant_id: self.participant_id.clone(),
            },
        );
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(participant = %self.participant_id, "WebSocket connection stopped");

        self.server.do_send(Disconnect {
            participant: self.participant_id.clone(),
        });
        self.app_state.close_connection();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ParticipantSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "unsupported_frame", "Binary frames are not supported");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(participant = %self.participant_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(participant = %self.participant_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(participant = %self.participant_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Deliver> for ParticipantSocket {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        debug!(participant = %self.participant_id, message = ?msg.0, "Delivering message");
        self.send_message(ctx, &msg.0);
    }
}

/// WebSocket endpoint handler.
///
/// Upgrades the HTTP request to a WebSocket handled by a `ParticipantSocket` actor.
pub async fn signaling_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    server: web::Data<Addr<MatchmakingServer>>,
) -> Result<HttpResponse, actix_web::Error> {
    debug!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    if !app_state.try_open_connection() {
        let max_connections = app_state.get_config().performance.max_connections;
        warn!(max_connections, "Refusing WebSocket upgrade: connection limit reached");
        return Err(AppError::ServiceUnavailable(format!(
            "Connection limit of {} reached",
            max_connections
        ))
        .into());
    }

    let socket = ParticipantSocket::new(app_state.get_ref().clone(), server.get_ref().clone());
    ws::start(socket, &req, stream).map_err(|err| {
        // Handshake failed, the actor never started
        app_state.close_connection();
        err
    })
}
