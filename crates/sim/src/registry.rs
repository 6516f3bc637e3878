//! Session registry: the single shared mutable store of live sessions.
//!
//! Owned by the server process root and passed by reference into the
//! protocol layer, which serializes all access through one worker. There
//! is no hidden global map and no time-based expiry; a session lives
//! exactly as long as it has players.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SyncError;
use crate::scenario::Scenario;
use crate::session::{Player, RoleSlot, Session, SessionMode};
use crate::{Millis, PlayerId};

/// Keyed store of sessions, one per room code.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

/// What `remove_player` did, so the caller can broadcast accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemovalOutcome {
    /// The player that was removed, if the connection was seated.
    pub removed: Option<PlayerId>,
    /// True when the session was garbage-collected because its player
    /// set became empty.
    pub session_dropped: bool,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session under `code` with its host seated.
    pub fn create(
        &mut self,
        code: &str,
        host: Player,
        scenario: Arc<Scenario>,
        mode: SessionMode,
        role_slots: Vec<RoleSlot>,
        now_ms: Millis,
    ) -> Result<&mut Session, SyncError> {
        let code = crate::session::normalize_code(code);
        if self.sessions.contains_key(&code) {
            return Err(SyncError::AlreadyExists(code));
        }
        let session = Session::new(code.clone(), host, scenario, mode, role_slots, now_ms);
        Ok(self.sessions.entry(code).or_insert(session))
    }

    /// Read-only lookup. Used by peek/state queries; no side effects.
    pub fn get(&self, code: &str) -> Result<&Session, SyncError> {
        let code = crate::session::normalize_code(code);
        self.sessions
            .get(&code)
            .ok_or_else(|| SyncError::session_not_found(code))
    }

    pub fn get_mut(&mut self, code: &str) -> Result<&mut Session, SyncError> {
        let code = crate::session::normalize_code(code);
        self.sessions
            .get_mut(&code)
            .ok_or_else(|| SyncError::session_not_found(code))
    }

    /// Delete a session. Idempotent.
    pub fn remove(&mut self, code: &str) {
        self.sessions.remove(&crate::session::normalize_code(code));
    }

    /// Remove one player and garbage-collect the session if it empties.
    ///
    /// Unknown codes and unseated players are no-ops, so the disconnect
    /// path never errors.
    pub fn remove_player(&mut self, code: &str, player_id: &str) -> RemovalOutcome {
        let code = crate::session::normalize_code(code);
        let Some(session) = self.sessions.get_mut(&code) else {
            return RemovalOutcome::default();
        };
        let removed = session.unseat(player_id).map(|p| p.id);
        let session_dropped = removed.is_some() && session.is_empty();
        if session_dropped {
            self.sessions.remove(&code);
        }
        RemovalOutcome {
            removed,
            session_dropped,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
