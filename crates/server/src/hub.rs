//! Sans-io protocol core.
//!
//! The hub holds the session registry and the connection→player bindings,
//! and turns each incoming request into an ack for the caller plus an
//! ordered list of room-scoped messages. It never touches a socket; the
//! net layer owns delivery.

use std::collections::HashMap;
use std::sync::Arc;

use tabletop_sim::{
    ConnectionId, Millis, Player, PlayerId, Response, Scenario, SessionMode, SessionRegistry,
    SyncError, engine, normalize_code,
};
use tabletop_wire::{
    Ack, AdvanceStep, ChatBroadcast, ChatRequest, ClientRequest, DecisionMade, DecisionRequest,
    ErrorProto, GetStateRequest, JoinRequest, PeekRequest, PlayerJoined, PlayerLeft,
    ServerMessage, SimulationCompleted, SimulationStarted, SnapshotProto, StartRequest,
};
use tracing::{debug, info, warn};

/// One message to deliver to one connection, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: ConnectionId,
    pub message: ServerMessage,
}

/// Which session/player a connection is currently bound to. Set on a
/// successful join, dropped on disconnect.
#[derive(Debug, Clone)]
struct Binding {
    code: String,
    player_id: PlayerId,
}

/// The protocol state machine for one server process.
#[derive(Debug, Default)]
pub struct Hub {
    registry: SessionRegistry,
    bindings: HashMap<ConnectionId, Binding>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one request. Returns the ack for the caller and the
    /// broadcasts it triggered, in the order they must be delivered.
    pub fn handle_request(
        &mut self,
        conn: ConnectionId,
        request: ClientRequest,
        now_ms: Millis,
    ) -> (Ack, Vec<Outgoing>) {
        match request {
            ClientRequest::Peek(req) => (self.peek(req), Vec::new()),
            ClientRequest::Join(req) => self.join(conn, req, now_ms),
            ClientRequest::Start(req) => self.start(req, now_ms),
            ClientRequest::Decision(req) => self.decision(conn, req, now_ms),
            ClientRequest::GetState(req) => (self.get_state(req), Vec::new()),
            ClientRequest::Chat(req) => self.chat(req, now_ms),
            ClientRequest::Ping(_) => (Ack::ok(), Vec::new()),
        }
    }

    /// A connection dropped. Remove its player, release the role slot,
    /// garbage-collect the session if it emptied, and tell the room.
    pub fn handle_disconnect(&mut self, conn: ConnectionId) -> Vec<Outgoing> {
        let Some(binding) = self.bindings.remove(&conn) else {
            return Vec::new();
        };
        // A reconnect rebinds the player to a newer connection before the
        // old socket's disconnect drains through the queue. That stale
        // disconnect must not unseat the player.
        if let Ok(session) = self.registry.get(&binding.code) {
            if session
                .player(&binding.player_id)
                .is_some_and(|p| p.connection_id != conn)
            {
                debug!(code = %binding.code, player = %binding.player_id, "stale disconnect ignored");
                return Vec::new();
            }
        }
        let outcome = self.registry.remove_player(&binding.code, &binding.player_id);
        if outcome.removed.is_none() {
            return Vec::new();
        }
        info!(
            code = %binding.code,
            player = %binding.player_id,
            session_dropped = outcome.session_dropped,
            "player disconnected"
        );
        self.broadcast(
            &binding.code,
            ServerMessage::PlayerLeft(PlayerLeft {
                code: binding.code.clone(),
                player_id: binding.player_id,
            }),
            None,
        )
    }

    // ------------------------------------------------------------------
    // Request handlers
    // ------------------------------------------------------------------

    fn peek(&self, req: PeekRequest) -> Ack {
        match self.registry.get(&req.code) {
            Ok(session) => Ack {
                snapshot: Some(session.into()),
                ..Ack::ok()
            },
            Err(e) => reject(&e),
        }
    }

    fn join(
        &mut self,
        conn: ConnectionId,
        req: JoinRequest,
        now_ms: Millis,
    ) -> (Ack, Vec<Outgoing>) {
        let code = normalize_code(&req.code);
        let Some(identity) = req.player else {
            return (malformed("join request carries no player"), Vec::new());
        };
        if identity.id.is_empty() {
            return (malformed("player id must not be empty"), Vec::new());
        }

        if self.registry.get(&code).is_err() {
            // Only the host may create a session on first join.
            if !req.is_host {
                return (reject(&SyncError::session_not_found(&code)), Vec::new());
            }
            let Some(scenario) = req.scenario else {
                return (malformed("host join carries no scenario"), Vec::new());
            };
            let mode = SessionMode::parse(&req.mode).unwrap_or(SessionMode::Multi);
            let host = Player::new(
                identity.id.clone(),
                identity.name.clone(),
                identity.role.clone(),
                conn,
                true,
                now_ms,
            );
            let scenario = Arc::new(Scenario::from(scenario));
            let role_slots = req.role_slots.into_iter().map(Into::into).collect();
            if let Err(e) =
                self.registry
                    .create(&code, host, scenario, mode, role_slots, now_ms)
            {
                return (reject(&e), Vec::new());
            }
            info!(code = %code, host = %identity.id, mode = %mode.as_str(), "session created");
        } else {
            let session = match self.registry.get_mut(&code) {
                Ok(s) => s,
                Err(e) => return (reject(&e), Vec::new()),
            };
            if let Some(player) = session.player_mut(&identity.id) {
                // Reconnect: rebind the player to the fresh connection.
                player.connection_id = conn;
                player.last_activity_ms = now_ms;
            } else {
                // Single mode holds exactly one player for its lifetime.
                if session.mode == SessionMode::Single {
                    return (
                        reject(&SyncError::Unauthorized {
                            actor: identity.id.clone(),
                            action: "join a single-player session",
                        }),
                        Vec::new(),
                    );
                }
                if !session.role_available(&identity.role, &identity.id) {
                    return (
                        reject(&SyncError::RoleUnavailable(identity.role.clone())),
                        Vec::new(),
                    );
                }
                session.seat(Player::new(
                    identity.id.clone(),
                    identity.name.clone(),
                    identity.role.clone(),
                    conn,
                    false,
                    now_ms,
                ));
                info!(code = %code, player = %identity.id, role = %identity.role, "player joined");
            }
        }

        let (snapshot, joined, single) = match self.registry.get(&code) {
            Ok(session) => {
                let snapshot: SnapshotProto = session.into();
                let Some(player) = session.player(&identity.id) else {
                    return (reject(&SyncError::player_not_found(identity.id)), Vec::new());
                };
                (
                    snapshot,
                    PlayerJoined {
                        player: Some(player.into()),
                    },
                    session.mode == SessionMode::Single,
                )
            }
            Err(e) => return (reject(&e), Vec::new()),
        };

        // A connection holds one seat at a time: joining elsewhere
        // implicitly leaves the previous room, so no player is orphaned
        // with a binding that can never disconnect.
        let leaves_previous = self
            .bindings
            .get(&conn)
            .is_some_and(|prev| prev.code != code || prev.player_id != identity.id);
        let mut outgoing = if leaves_previous {
            self.handle_disconnect(conn)
        } else {
            Vec::new()
        };
        self.bindings.insert(
            conn,
            Binding {
                code: code.clone(),
                player_id: identity.id.clone(),
            },
        );

        // The rest of the room learns about the new player; the caller
        // gets the full snapshot in the ack instead.
        outgoing.extend(self.broadcast(&code, ServerMessage::PlayerJoined(joined), Some(conn)));
        if single {
            // Nothing to wait for: a single-player session starts the
            // moment its player is seated.
            outgoing.extend(self.broadcast(
                &code,
                ServerMessage::SimulationStarted(SimulationStarted {
                    snapshot: Some(snapshot.clone()),
                }),
                None,
            ));
        }

        (
            Ack {
                snapshot: Some(snapshot),
                player_id: identity.id,
                ..Ack::ok()
            },
            outgoing,
        )
    }

    fn start(&mut self, req: StartRequest, now_ms: Millis) -> (Ack, Vec<Outgoing>) {
        let code = normalize_code(&req.code);
        let session = match self.registry.get_mut(&code) {
            Ok(s) => s,
            Err(e) => return (reject(&e), Vec::new()),
        };
        if !session.is_member(&req.player_id) {
            return (reject(&SyncError::player_not_found(req.player_id)), Vec::new());
        }
        if let Err(e) = engine::start(session, &req.player_id, now_ms) {
            return (reject(&e), Vec::new());
        }
        info!(code = %code, host = %req.player_id, "simulation started");
        let snapshot: SnapshotProto = (&*session).into();
        let outgoing = self.broadcast(
            &code,
            ServerMessage::SimulationStarted(SimulationStarted {
                snapshot: Some(snapshot),
            }),
            None,
        );
        (Ack::ok(), outgoing)
    }

    fn decision(
        &mut self,
        conn: ConnectionId,
        req: DecisionRequest,
        now_ms: Millis,
    ) -> (Ack, Vec<Outgoing>) {
        let code = normalize_code(&req.code);
        let Some(response) = req.response else {
            return (malformed("decision request carries no response"), Vec::new());
        };
        // The acting connection may only submit for the player it is
        // bound to; membership alone is not enough to act for others.
        if let Some(binding) = self.bindings.get(&conn) {
            if binding.player_id != req.player_id {
                return (
                    reject(&SyncError::Unauthorized {
                        actor: binding.player_id.clone(),
                        action: "submit another player's decision",
                    }),
                    Vec::new(),
                );
            }
        }
        let session = match self.registry.get_mut(&code) {
            Ok(s) => s,
            Err(e) => return (reject(&e), Vec::new()),
        };

        let response = Response::from(response);
        if let Err(e) = engine::validate_response(session, &req.player_id, &response) {
            debug!(code = %code, player = %req.player_id, error = %e, "decision rejected");
            return (reject(&e), Vec::new());
        }
        let broadcast_response: tabletop_wire::ResponseProto = (&response).into();
        if let Err(e) = engine::record_response(session, &req.player_id, response, now_ms) {
            return (reject(&e), Vec::new());
        }

        // Advance while the session borrow is live; messages assemble after.
        let advanced = if engine::all_answered(session) {
            let outcome = engine::advance(session);
            let mode = session.mode.as_str().to_string();
            let snapshot: SnapshotProto = (&*session).into();
            Some((outcome, mode, snapshot))
        } else {
            None
        };

        let mut outgoing = self.broadcast(
            &code,
            ServerMessage::DecisionMade(DecisionMade {
                player_id: req.player_id.clone(),
                response: Some(broadcast_response),
            }),
            None,
        );

        if let Some((outcome, mode, snapshot)) = advanced {
            // Ordered pair per advanced player: the advance notice always
            // precedes the refreshed snapshot on every connection.
            for (player_id, step) in &outcome.advanced {
                debug!(code = %code, player = %player_id, step, "advancing player");
                outgoing.extend(self.broadcast(
                    &code,
                    ServerMessage::AdvanceStep(AdvanceStep {
                        player_id: player_id.clone(),
                        step: *step as u64,
                        mode: mode.clone(),
                    }),
                    None,
                ));
                outgoing.extend(self.broadcast(
                    &code,
                    ServerMessage::SimulationState(snapshot.clone()),
                    None,
                ));
            }
            if outcome.completed {
                info!(code = %code, "simulation completed");
                outgoing.extend(self.broadcast(
                    &code,
                    ServerMessage::SimulationCompleted(SimulationCompleted {
                        code: code.clone(),
                        players: snapshot.players.clone(),
                    }),
                    None,
                ));
            }
        }

        (Ack::ok(), outgoing)
    }

    fn get_state(&self, req: GetStateRequest) -> Ack {
        let session = match self.registry.get(&req.code) {
            Ok(s) => s,
            Err(e) => return reject(&e),
        };
        if !session.is_member(&req.player_id) {
            return reject(&SyncError::player_not_found(req.player_id));
        }
        Ack {
            snapshot: Some(session.into()),
            ..Ack::ok()
        }
    }

    fn chat(&mut self, req: ChatRequest, now_ms: Millis) -> (Ack, Vec<Outgoing>) {
        let code = normalize_code(&req.code);
        let Some(mut message) = req.message else {
            return (malformed("chat request carries no message"), Vec::new());
        };
        if message.text.is_empty() || message.player_id.is_empty() {
            return (malformed("chat message needs text and a player id"), Vec::new());
        }
        let session = match self.registry.get(&code) {
            Ok(s) => s,
            Err(e) => return (reject(&e), Vec::new()),
        };
        if !session.is_member(&message.player_id) {
            return (
                reject(&SyncError::player_not_found(message.player_id)),
                Vec::new(),
            );
        }
        // Relay only: the server stamps the time and keeps nothing.
        message.timestamp_ms = now_ms;
        let outgoing = self.broadcast(
            &code,
            ServerMessage::ChatMessage(ChatBroadcast {
                message: Some(message),
            }),
            None,
        );
        (Ack::ok(), outgoing)
    }

    // ------------------------------------------------------------------
    // Room fan-out
    // ------------------------------------------------------------------

    /// Connections currently bound to a session code, in stable order.
    fn room_conns(&self, code: &str) -> Vec<ConnectionId> {
        let mut conns: Vec<ConnectionId> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.code == code)
            .map(|(conn, _)| *conn)
            .collect();
        conns.sort_unstable();
        conns
    }

    fn broadcast(
        &self,
        code: &str,
        message: ServerMessage,
        except: Option<ConnectionId>,
    ) -> Vec<Outgoing> {
        self.room_conns(code)
            .into_iter()
            .filter(|conn| Some(*conn) != except)
            .map(|to| Outgoing {
                to,
                message: message.clone(),
            })
            .collect()
    }

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}

fn reject(error: &SyncError) -> Ack {
    warn!(kind = error.kind(), "request rejected: {error}");
    Ack {
        error: Some(error.into()),
        ..Ack::ok()
    }
}

fn malformed(detail: &str) -> Ack {
    warn!("malformed request: {detail}");
    Ack {
        error: Some(ErrorProto {
            kind: "invalid_input".into(),
            detail: detail.into(),
        }),
        ..Ack::ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
