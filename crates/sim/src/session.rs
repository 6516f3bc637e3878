//! Session, player and response state.
//!
//! One `Session` exists per room code and is the single authoritative
//! copy of a running exercise. All mutation goes through the decision
//! engine or the registry; this module only defines the shapes and the
//! cheap invariant-preserving accessors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::scenario::Scenario;
use crate::{ConnectionId, DecisionId, Millis, PlayerId};

/// Normalize a human-typed room code: trimmed, uppercased.
///
/// Applied at every protocol entry point so lookups never depend on how
/// the code was shared out-of-band.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// How advancement is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Exactly one player; advancement never waits on anyone else.
    Single,
    /// Role-based group exercise; a step advances only when every
    /// present player has answered it.
    Multi,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "multi" => Some(Self::Multi),
            _ => None,
        }
    }
}

/// Session lifecycle. Monotonic: a session never moves backwards, and
/// `Completed` is terminal. (`Configuring` exists only before the host
/// creates the session; the server never stores it.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Configuring,
    Waiting,
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuring => "configuring",
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "configuring" => Some(Self::Configuring),
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// One role in a multi-mode exercise. At most one player holds a role
/// at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSlot {
    /// Role key, e.g. "CEO", "CISO".
    pub role: String,
    /// Human-facing label shown in the lobby.
    pub display_name: String,
    /// Player currently holding the slot, if any.
    pub player_id: Option<PlayerId>,
}

/// A player's recorded answer to one decision point. Immutable once
/// created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub decision_id: DecisionId,
    pub option_id: String,
    /// Integer in 1..=5, checked by the engine before recording.
    pub confidence_level: u32,
    /// Milliseconds the player took to answer.
    pub response_time_ms: u64,
    /// Resource ids the player self-declared as accessible.
    pub available_resources: Vec<String>,
    /// Client-side creation time; part of the dedup key on merge.
    pub timestamp_ms: Millis,
}

/// One participant, scoped to exactly one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub role: String,
    /// Current transport binding. Changes across reconnects.
    pub connection_id: ConnectionId,
    pub is_host: bool,
    /// Zero-based index into the scenario timeline. Advances only via
    /// the engine, by exactly 1 at a time. May equal `timeline.len()`
    /// once the player has finished.
    pub current_step: usize,
    /// Append-only. After the player answers their current step and
    /// before the engine advances them, `responses.len() == current_step + 1`.
    pub responses: Vec<Response>,
    pub last_activity_ms: Millis,
}

impl Player {
    pub fn new(
        id: PlayerId,
        name: String,
        role: String,
        connection_id: ConnectionId,
        is_host: bool,
        now_ms: Millis,
    ) -> Self {
        Self {
            id,
            name,
            role,
            connection_id,
            is_host,
            current_step: 0,
            responses: Vec::new(),
            last_activity_ms: now_ms,
        }
    }

    /// True once this player has answered the step they are currently on.
    pub fn has_answered_current(&self) -> bool {
        self.responses.len() > self.current_step
    }
}

/// The authoritative shared state for one exercise room.
#[derive(Debug, Clone)]
pub struct Session {
    /// Room code; primary key in the registry. Already normalized.
    pub code: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    /// Immutable scenario definition, shared with snapshots.
    pub scenario: Arc<Scenario>,
    /// Role roster for multi mode; empty in single mode.
    pub role_slots: Vec<RoleSlot>,
    pub players: HashMap<PlayerId, Player>,
    /// The player allowed to issue `start`.
    pub host_id: PlayerId,
    /// Set when status becomes `Active`.
    pub started_at_ms: Option<Millis>,
}

impl Session {
    /// Create a session with its host already seated. Single-mode
    /// sessions are born `Active` (nothing to wait for); multi-mode
    /// sessions wait for the host's explicit start.
    pub fn new(
        code: String,
        host: Player,
        scenario: Arc<Scenario>,
        mode: SessionMode,
        role_slots: Vec<RoleSlot>,
        now_ms: Millis,
    ) -> Self {
        let (status, started_at_ms) = match mode {
            SessionMode::Single => (SessionStatus::Active, Some(now_ms)),
            SessionMode::Multi => (SessionStatus::Waiting, None),
        };
        let host_id = host.id.clone();
        let mut session = Self {
            code,
            mode,
            status,
            scenario,
            role_slots,
            players: HashMap::new(),
            host_id,
            started_at_ms,
        };
        session.seat(host);
        session
    }

    /// Insert a player and claim their role slot. Callers must have
    /// checked role availability first (see `role_available`).
    pub fn seat(&mut self, player: Player) {
        if let Some(slot) = self.role_slots.iter_mut().find(|s| s.role == player.role) {
            slot.player_id = Some(player.id.clone());
        }
        self.players.insert(player.id.clone(), player);
    }

    /// Remove a player and release their role slot. Returns the removed
    /// player, if they were present.
    pub fn unseat(&mut self, player_id: &str) -> Option<Player> {
        let player = self.players.remove(player_id)?;
        for slot in &mut self.role_slots {
            if slot.player_id.as_deref() == Some(player_id) {
                slot.player_id = None;
            }
        }
        Some(player)
    }

    /// A role is available if no slot claims it for a different player.
    /// Unknown roles are treated as available: the roster is advisory
    /// for single mode and ad-hoc observers.
    pub fn role_available(&self, role: &str, for_player: &str) -> bool {
        self.role_slots
            .iter()
            .filter(|s| s.role == role)
            .all(|s| match &s.player_id {
                None => true,
                Some(holder) => holder == for_player,
            })
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.get_mut(player_id)
    }

    pub fn is_member(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Decision, DecisionOption};

    fn scenario(steps: usize) -> Arc<Scenario> {
        Arc::new(Scenario {
            id: "s".into(),
            title: "test".into(),
            timeline: (0..steps)
                .map(|i| Decision {
                    id: format!("d{i}"),
                    prompt: String::new(),
                    time_limit_secs: 60,
                    options: vec![DecisionOption {
                        id: "a".into(),
                        text: String::new(),
                    }],
                    required_resources: vec![],
                })
                .collect(),
        })
    }

    fn host() -> Player {
        Player::new("h1".into(), "Host".into(), "CEO".into(), 1, true, 0)
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  ab12cd "), "AB12CD");
        assert_eq!(normalize_code("XYZ"), "XYZ");
    }

    #[test]
    fn test_single_mode_is_born_active() {
        let s = Session::new("CODE".into(), host(), scenario(1), SessionMode::Single, vec![], 42);
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.started_at_ms, Some(42));
    }

    #[test]
    fn test_multi_mode_waits_for_start() {
        let slots = vec![RoleSlot {
            role: "CEO".into(),
            display_name: "Chief Executive".into(),
            player_id: None,
        }];
        let s = Session::new("CODE".into(), host(), scenario(1), SessionMode::Multi, slots, 42);
        assert_eq!(s.status, SessionStatus::Waiting);
        assert_eq!(s.started_at_ms, None);
        // Host's role slot was claimed on seat.
        assert_eq!(s.role_slots[0].player_id.as_deref(), Some("h1"));
    }

    #[test]
    fn test_unseat_releases_role_slot() {
        let slots = vec![RoleSlot {
            role: "CEO".into(),
            display_name: "Chief Executive".into(),
            player_id: None,
        }];
        let mut s =
            Session::new("CODE".into(), host(), scenario(1), SessionMode::Multi, slots, 0);
        assert!(!s.role_available("CEO", "p2"));
        let removed = s.unseat("h1").unwrap();
        assert_eq!(removed.id, "h1");
        assert!(s.role_available("CEO", "p2"));
        assert!(s.is_empty());
        // Idempotent.
        assert!(s.unseat("h1").is_none());
    }

    #[test]
    fn test_role_available_for_own_holder() {
        let slots = vec![RoleSlot {
            role: "CEO".into(),
            display_name: String::new(),
            player_id: None,
        }];
        let s = Session::new("CODE".into(), host(), scenario(1), SessionMode::Multi, slots, 0);
        // The holder themselves may re-request their role (reconnect path).
        assert!(s.role_available("CEO", "h1"));
        assert!(!s.role_available("CEO", "p2"));
        // Roles with no slot are advisory.
        assert!(s.role_available("Observer", "p2"));
    }
}
