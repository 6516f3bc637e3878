//! Error taxonomy for the session core.
//!
//! Every rejection the engine or registry can produce is a typed variant
//! here. Errors are recovered at the boundary where they occur and returned
//! to the immediate caller; nothing in this crate retries.

use thiserror::Error;

use crate::{DecisionId, PlayerId};

/// Rejection reasons surfaced to protocol callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Session code is already taken by a live session.
    #[error("session code {0} already exists")]
    AlreadyExists(String),

    /// Referenced session or player does not exist (stale code,
    /// garbage-collected session, unknown player id).
    #[error("{0} not found")]
    NotFound(NotFoundKind),

    /// Malformed decision submission. Never partially applied.
    #[error("invalid decision: {0}")]
    InvalidInput(#[from] InvalidDecision),

    /// Actor is not allowed to perform the operation.
    #[error("player {actor} may not {action}")]
    Unauthorized {
        actor: PlayerId,
        action: &'static str,
    },

    /// A multi-mode join requested a role slot already held by another
    /// player.
    #[error("role {0} is already assigned")]
    RoleUnavailable(String),
}

/// Which entity a `NotFound` refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundKind {
    Session(String),
    Player(PlayerId),
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session(code) => write!(f, "session {code}"),
            Self::Player(id) => write!(f, "player {id}"),
        }
    }
}

/// Detailed reason a candidate response failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidDecision {
    /// The candidate references a decision other than the one at the
    /// player's current step. Covers both stale and duplicate
    /// submissions: a step already answered is never accepted twice.
    #[error("decision {received} does not match current decision {expected}")]
    DecisionMismatch {
        expected: DecisionId,
        received: DecisionId,
    },

    /// The player already answered their current step and is waiting on
    /// the rest of the room to advance. Without this check a repeat
    /// submission would count toward the next step's gating.
    #[error("step {step} already has a recorded response")]
    AlreadyAnswered { step: usize },

    /// The player has already walked off the end of the timeline.
    #[error("timeline exhausted at step {step}")]
    TimelineExhausted { step: usize },

    /// The chosen option is not declared by the current decision point.
    #[error("option {0} is not valid for the current decision")]
    UnknownOption(String),

    /// Confidence must be an integer in 1..=5.
    #[error("confidence level {0} outside 1..=5")]
    ConfidenceOutOfRange(u32),
}

impl SyncError {
    /// Stable machine-readable tag carried on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized { .. } => "unauthorized",
            Self::RoleUnavailable(_) => "role_unavailable",
        }
    }

    pub fn session_not_found(code: impl Into<String>) -> Self {
        Self::NotFound(NotFoundKind::Session(code.into()))
    }

    pub fn player_not_found(id: impl Into<PlayerId>) -> Self {
        Self::NotFound(NotFoundKind::Player(id.into()))
    }
}
