//! The reconciler: pure merge logic over the local session view.
//!
//! Snapshots, broadcasts and the caller's own optimistic updates all
//! land here. Delivery may duplicate or reorder relative to what the UI
//! already applied, so every fold has two properties the tests pin
//! down: merging the same input twice equals merging it once, and a
//! merge never decreases a player's step or drops a known response.
//! Responses deduplicate by `(decision_id, timestamp_ms)`.

use std::collections::HashMap;

use tabletop_sim::{
    Player, PlayerId, Response, RoleSlot, Scenario, SessionMode, SessionStatus,
};
use tabletop_wire::{PlayerProto, ResponseProto, ServerMessage, SnapshotProto};

/// The client's copy of the session. Mutated only through the methods
/// below; the transport layer never writes fields directly.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalView {
    pub code: Option<String>,
    pub players: HashMap<PlayerId, Player>,
    pub scenario: Option<Scenario>,
    pub status: SessionStatus,
    pub mode: SessionMode,
    pub started_at_ms: Option<u64>,
    pub role_slots: Vec<RoleSlot>,
    pub host_id: Option<PlayerId>,
}

impl Default for LocalView {
    fn default() -> Self {
        Self {
            code: None,
            players: HashMap::new(),
            scenario: None,
            status: SessionStatus::Configuring,
            mode: SessionMode::Multi,
            started_at_ms: None,
            role_slots: Vec::new(),
            host_id: None,
        }
    }
}

/// Lifecycle order used for monotonic status adoption: a late-arriving
/// stale snapshot must not pull an active session back to waiting.
fn status_rank(status: SessionStatus) -> u8 {
    match status {
        SessionStatus::Configuring => 0,
        SessionStatus::Waiting => 1,
        SessionStatus::Active => 2,
        SessionStatus::Completed => 3,
    }
}

fn has_response(responses: &[Response], decision_id: &str, timestamp_ms: u64) -> bool {
    responses
        .iter()
        .any(|r| r.decision_id == decision_id && r.timestamp_ms == timestamp_ms)
}

impl LocalView {
    /// Fold a full snapshot in. Players merge (union of responses, max
    /// of steps); scenario, roster and host are adopted as the server's
    /// authoritative word; status only ever moves forward.
    pub fn merge_snapshot(&mut self, snapshot: &SnapshotProto) {
        self.code = Some(snapshot.code.clone());
        for incoming in &snapshot.players {
            self.merge_player(incoming);
        }
        if let Some(scenario) = &snapshot.scenario {
            self.scenario = Some(scenario.clone().into());
        }
        if let Ok(status) = snapshot.parse_status() {
            if status_rank(status) >= status_rank(self.status) {
                self.status = status;
            }
        }
        if let Ok(mode) = snapshot.parse_mode() {
            self.mode = mode;
        }
        if snapshot.started_at_ms.is_some() {
            self.started_at_ms = snapshot.started_at_ms;
        }
        self.role_slots = snapshot.role_slots.iter().cloned().map(Into::into).collect();
        if !snapshot.host_id.is_empty() {
            self.host_id = Some(snapshot.host_id.clone());
        }
    }

    /// Merge one incoming player record into the local set.
    pub fn merge_player(&mut self, incoming: &PlayerProto) {
        let incoming_step = incoming.current_step as usize;
        match self.players.get_mut(&incoming.id) {
            Some(local) => {
                for r in &incoming.responses {
                    if !has_response(&local.responses, &r.decision_id, r.timestamp_ms) {
                        local.responses.push(r.clone().into());
                    }
                }
                local.current_step = local.current_step.max(incoming_step);
                local.name = incoming.name.clone();
                local.role = incoming.role.clone();
                local.is_host = incoming.is_host;
                local.last_activity_ms = local.last_activity_ms.max(incoming.last_activity_ms);
            }
            None => {
                let mut player = Player::new(
                    incoming.id.clone(),
                    incoming.name.clone(),
                    incoming.role.clone(),
                    0,
                    incoming.is_host,
                    incoming.last_activity_ms,
                );
                player.current_step = incoming_step;
                player.responses = incoming.responses.iter().cloned().map(Into::into).collect();
                self.players.insert(player.id.clone(), player);
            }
        }
    }

    /// Fold an unsolicited broadcast in. Safe to call for every message
    /// the connection delivers, in any order, any number of times.
    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Ack(_) => {} // handled on the request path
            ServerMessage::PlayerJoined(m) => {
                if let Some(player) = &m.player {
                    self.merge_player(player);
                }
            }
            ServerMessage::PlayerLeft(m) => self.apply_player_left(&m.player_id),
            ServerMessage::SimulationStarted(m) => {
                if let Some(snapshot) = &m.snapshot {
                    self.merge_snapshot(snapshot);
                }
            }
            ServerMessage::DecisionMade(m) => {
                if let Some(response) = &m.response {
                    self.apply_decision_made(&m.player_id, response);
                }
            }
            ServerMessage::AdvanceStep(m) => {
                if let Some(player) = self.players.get_mut(&m.player_id) {
                    player.current_step = player.current_step.max(m.step as usize);
                }
            }
            ServerMessage::SimulationState(snapshot) => self.merge_snapshot(snapshot),
            ServerMessage::SimulationCompleted(_) => {
                self.status = SessionStatus::Completed;
            }
            ServerMessage::ChatMessage(_) => {} // relay only, nothing to fold
        }
    }

    fn apply_player_left(&mut self, player_id: &str) {
        self.players.remove(player_id);
        for slot in &mut self.role_slots {
            if slot.player_id.as_deref() == Some(player_id) {
                slot.player_id = None;
            }
        }
    }

    fn apply_decision_made(&mut self, player_id: &str, response: &ResponseProto) {
        if let Some(player) = self.players.get_mut(player_id) {
            if !has_response(&player.responses, &response.decision_id, response.timestamp_ms) {
                player.responses.push(response.clone().into());
            }
        }
    }

    /// Optimistically record the caller's own response before the server
    /// confirms it. The confirming broadcast and later snapshots carry
    /// the identical `(decision_id, timestamp_ms)` pair, so the merge
    /// absorbs rather than duplicates it.
    pub fn apply_local_decision(&mut self, player_id: &str, response: Response) {
        if let Some(player) = self.players.get_mut(player_id) {
            if !has_response(&player.responses, &response.decision_id, response.timestamp_ms) {
                player.responses.push(response);
            }
        }
    }

    /// Undo one optimistic response after the server rejected it.
    pub fn rollback_local_decision(
        &mut self,
        player_id: &str,
        decision_id: &str,
        timestamp_ms: u64,
    ) {
        if let Some(player) = self.players.get_mut(player_id) {
            player
                .responses
                .retain(|r| !(r.decision_id == decision_id && r.timestamp_ms == timestamp_ms));
        }
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }
}
