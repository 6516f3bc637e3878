//! Tabletop Session Core
//!
//! This crate contains the authoritative session state for a crisis
//! tabletop exercise: the data model, the decision engine that validates
//! responses and advances players through the scenario timeline, and the
//! registry that owns every live session in the process.
//!
//! The crate performs no I/O and never reads the wall clock. Timestamps
//! are passed in by the protocol layer, which owns all external
//! communication. This keeps every state transition a pure, testable
//! function over `Session`.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod registry;
pub mod scenario;
pub mod session;

pub use engine::{AdvanceOutcome, advance, all_answered, record_response, start, validate_response};
pub use error::{InvalidDecision, NotFoundKind, SyncError};
pub use registry::{RemovalOutcome, SessionRegistry};
pub use scenario::{Decision, DecisionOption, Resource, Scenario, ScenarioProvider};
pub use session::{
    Player, Response, RoleSlot, Session, SessionMode, SessionStatus, normalize_code,
};

// ============================================================================
// Type Aliases
// ============================================================================

/// Participant identifier, generated client-side and stable for the life
/// of the participant's membership in one session.
pub type PlayerId = String;

/// Identifier of a decision point within a scenario timeline.
pub type DecisionId = String;

/// Process-local identifier of one live connection. Ephemeral: a player
/// who reconnects gets a fresh one.
pub type ConnectionId = u64;

/// Millisecond timestamp supplied by the caller (the core never reads
/// the clock itself).
pub type Millis = u64;
