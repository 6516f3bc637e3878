//! Tabletop Wire Protocol Types
//!
//! This crate defines the shared Protobuf message vocabulary carried over
//! the per-client channel, and the length-prefixed frame codec both ends
//! use. Server and client binaries both depend on this crate, so the two
//! sides can never drift apart.
//!
//! # Message discipline
//!
//! - Every client request travels in a `ClientEnvelope` with a non-zero
//!   `correlation` handle; the server answers it with exactly one `Ack`
//!   echoing the handle.
//! - Everything else from the server is an unsolicited broadcast
//!   (`correlation == 0`), scoped to the room the connection is bound to.
//! - Per-connection delivery is ordered; the advance notice for a player
//!   always precedes the refreshed snapshot on every connection.

#![deny(unsafe_code)]

pub mod convert;
pub mod framing;

use prost::{Message, Oneof};

pub use framing::{MAX_FRAME_LEN, read_frame, write_frame};

// ============================================================================
// Envelopes
// ============================================================================

/// Client → server envelope. `correlation` is caller-chosen, non-zero,
/// and unique among the caller's in-flight requests.
#[derive(Clone, PartialEq, Message)]
pub struct ClientEnvelope {
    #[prost(uint64, tag = "1")]
    pub correlation: u64,

    #[prost(oneof = "ClientRequest", tags = "2, 3, 4, 5, 6, 7, 8")]
    pub request: Option<ClientRequest>,
}

/// The request catalogue.
#[derive(Clone, PartialEq, Oneof)]
pub enum ClientRequest {
    /// Read-only snapshot of a session, no membership required.
    #[prost(message, tag = "2")]
    Peek(PeekRequest),
    /// Join (or, as host, create) a session.
    #[prost(message, tag = "3")]
    Join(JoinRequest),
    /// Host-only: move the session to `active`.
    #[prost(message, tag = "4")]
    Start(StartRequest),
    /// Submit a decision response for the caller's current step.
    #[prost(message, tag = "5")]
    Decision(DecisionRequest),
    /// Snapshot for a member; used to reconcile after reconnect.
    #[prost(message, tag = "6")]
    GetState(GetStateRequest),
    /// Relay a chat line to the room.
    #[prost(message, tag = "7")]
    Chat(ChatRequest),
    /// Keepalive.
    #[prost(message, tag = "8")]
    Ping(PingRequest),
}

/// Server → client envelope. `correlation` echoes the request being
/// acknowledged, or is 0 for an unsolicited broadcast.
#[derive(Clone, PartialEq, Message)]
pub struct ServerEnvelope {
    #[prost(uint64, tag = "1")]
    pub correlation: u64,

    #[prost(oneof = "ServerMessage", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10")]
    pub message: Option<ServerMessage>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum ServerMessage {
    /// Response to exactly one request.
    #[prost(message, tag = "2")]
    Ack(Ack),
    #[prost(message, tag = "3")]
    PlayerJoined(PlayerJoined),
    #[prost(message, tag = "4")]
    PlayerLeft(PlayerLeft),
    /// Session went `active`; carries the fresh snapshot.
    #[prost(message, tag = "5")]
    SimulationStarted(SimulationStarted),
    /// A member's response was recorded.
    #[prost(message, tag = "6")]
    DecisionMade(DecisionMade),
    /// One player moved to the next step. Always immediately followed on
    /// the same connection by a `SimulationState` snapshot.
    #[prost(message, tag = "7")]
    AdvanceStep(AdvanceStep),
    /// Full refreshed session snapshot.
    #[prost(message, tag = "8")]
    SimulationState(SnapshotProto),
    #[prost(message, tag = "9")]
    SimulationCompleted(SimulationCompleted),
    #[prost(message, tag = "10")]
    ChatMessage(ChatBroadcast),
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Clone, PartialEq, Message)]
pub struct PeekRequest {
    #[prost(string, tag = "1")]
    pub code: String,
}

/// Join as `player`. If the session does not exist yet, `is_host` must be
/// set and `scenario` (plus, for multi mode, `role_slots`) supplied; the
/// session is created with the caller as host.
#[derive(Clone, PartialEq, Message)]
pub struct JoinRequest {
    #[prost(string, tag = "1")]
    pub code: String,

    #[prost(message, optional, tag = "2")]
    pub player: Option<JoinPlayer>,

    #[prost(bool, tag = "3")]
    pub is_host: bool,

    /// "single" | "multi"; only read on create.
    #[prost(string, tag = "4")]
    pub mode: String,

    #[prost(message, optional, tag = "5")]
    pub scenario: Option<ScenarioProto>,

    #[prost(message, repeated, tag = "6")]
    pub role_slots: Vec<RoleSlotProto>,
}

/// The identity a joining client presents. Progress fields are always
/// server-assigned, so they are not part of the join payload.
#[derive(Clone, PartialEq, Message)]
pub struct JoinPlayer {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(string, tag = "3")]
    pub role: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct StartRequest {
    #[prost(string, tag = "1")]
    pub code: String,

    #[prost(string, tag = "2")]
    pub player_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct DecisionRequest {
    #[prost(string, tag = "1")]
    pub code: String,

    /// Must match a current member; the server binds identity by
    /// membership, not by capability token.
    #[prost(string, tag = "2")]
    pub player_id: String,

    #[prost(message, optional, tag = "3")]
    pub response: Option<ResponseProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetStateRequest {
    #[prost(string, tag = "1")]
    pub code: String,

    #[prost(string, tag = "2")]
    pub player_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChatRequest {
    #[prost(string, tag = "1")]
    pub code: String,

    #[prost(message, optional, tag = "2")]
    pub message: Option<ChatMessageProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PingRequest {
    // Empty; the ack itself is the signal.
}

// ============================================================================
// Acknowledgements & broadcasts
// ============================================================================

/// Response to one request. `error` unset means success. Snapshot-bearing
/// acks (peek, join, get_state) set `snapshot`; join also echoes the
/// seated `player_id`.
#[derive(Clone, PartialEq, Message)]
pub struct Ack {
    #[prost(message, optional, tag = "1")]
    pub error: Option<ErrorProto>,

    #[prost(message, optional, tag = "2")]
    pub snapshot: Option<SnapshotProto>,

    #[prost(string, tag = "3")]
    pub player_id: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Typed rejection carried on the wire. `kind` is the stable tag from
/// `SyncError::kind`; `detail` is the human-readable rendering.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorProto {
    #[prost(string, tag = "1")]
    pub kind: String,

    #[prost(string, tag = "2")]
    pub detail: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PlayerJoined {
    #[prost(message, optional, tag = "1")]
    pub player: Option<PlayerProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PlayerLeft {
    #[prost(string, tag = "1")]
    pub code: String,

    #[prost(string, tag = "2")]
    pub player_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SimulationStarted {
    #[prost(message, optional, tag = "1")]
    pub snapshot: Option<SnapshotProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DecisionMade {
    #[prost(string, tag = "1")]
    pub player_id: String,

    #[prost(message, optional, tag = "2")]
    pub response: Option<ResponseProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AdvanceStep {
    #[prost(string, tag = "1")]
    pub player_id: String,

    /// The step the player just reached.
    #[prost(uint64, tag = "2")]
    pub step: u64,

    #[prost(string, tag = "3")]
    pub mode: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SimulationCompleted {
    #[prost(string, tag = "1")]
    pub code: String,

    #[prost(message, repeated, tag = "2")]
    pub players: Vec<PlayerProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChatBroadcast {
    #[prost(message, optional, tag = "1")]
    pub message: Option<ChatMessageProto>,
}

/// Chat line. `timestamp_ms` is stamped server-side on relay; anything
/// the client put there is overwritten.
#[derive(Clone, PartialEq, Message)]
pub struct ChatMessageProto {
    #[prost(string, tag = "1")]
    pub player_id: String,

    #[prost(string, tag = "2")]
    pub player_name: String,

    #[prost(string, tag = "3")]
    pub text: String,

    #[prost(uint64, tag = "4")]
    pub timestamp_ms: u64,
}

// ============================================================================
// State payloads
// ============================================================================

/// Full serialization of a session, as sent to clients. Players are
/// ordered by id ascending so identical states serialize identically.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotProto {
    #[prost(string, tag = "1")]
    pub code: String,

    #[prost(message, repeated, tag = "2")]
    pub players: Vec<PlayerProto>,

    #[prost(message, optional, tag = "3")]
    pub scenario: Option<ScenarioProto>,

    /// "waiting" | "active" | "completed".
    #[prost(string, tag = "4")]
    pub status: String,

    /// "single" | "multi".
    #[prost(string, tag = "5")]
    pub mode: String,

    #[prost(uint64, optional, tag = "6")]
    pub started_at_ms: Option<u64>,

    #[prost(message, repeated, tag = "7")]
    pub role_slots: Vec<RoleSlotProto>,

    #[prost(string, tag = "8")]
    pub host_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PlayerProto {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(string, tag = "3")]
    pub role: String,

    #[prost(bool, tag = "4")]
    pub is_host: bool,

    #[prost(uint64, tag = "5")]
    pub current_step: u64,

    #[prost(message, repeated, tag = "6")]
    pub responses: Vec<ResponseProto>,

    #[prost(uint64, tag = "7")]
    pub last_activity_ms: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseProto {
    #[prost(string, tag = "1")]
    pub decision_id: String,

    #[prost(string, tag = "2")]
    pub option_id: String,

    #[prost(uint32, tag = "3")]
    pub confidence_level: u32,

    #[prost(uint64, tag = "4")]
    pub response_time_ms: u64,

    #[prost(string, repeated, tag = "5")]
    pub available_resources: Vec<String>,

    #[prost(uint64, tag = "6")]
    pub timestamp_ms: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoleSlotProto {
    #[prost(string, tag = "1")]
    pub role: String,

    #[prost(string, tag = "2")]
    pub display_name: String,

    #[prost(string, optional, tag = "3")]
    pub player_id: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ScenarioProto {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub title: String,

    #[prost(message, repeated, tag = "3")]
    pub timeline: Vec<DecisionProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DecisionProto {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub prompt: String,

    #[prost(uint32, tag = "3")]
    pub time_limit_secs: u32,

    #[prost(message, repeated, tag = "4")]
    pub options: Vec<OptionProto>,

    #[prost(message, repeated, tag = "5")]
    pub required_resources: Vec<ResourceProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OptionProto {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub text: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResourceProto {
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(bool, tag = "3")]
    pub required: bool,
}

// ============================================================================
// Tests
// ============================================================================
