//! Tabletop Client
//!
//! The client half of the synchronization protocol: a connection that
//! speaks framed envelopes with request/ack correlation, and a
//! reconciler that folds server pushes into a local session view without
//! ever losing or duplicating data.
//!
//! The reconciler is deliberately a set of pure functions over
//! [`LocalView`]: snapshots may arrive out of order relative to
//! optimistic local updates, so every merge is idempotent and never
//! regresses a player's progress. The transport wrapper
//! ([`SessionClient`]) owns reconnects (capped attempts, fixed delay)
//! and request timeouts; a dropped connection keeps the local view
//! intact so a `resume()` can reconcile via `get_state`.

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod ids;
pub mod reconciler;

pub use client::SessionClient;
pub use error::ClientError;
pub use ids::{generate_player_id, generate_room_code};
pub use reconciler::LocalView;

use std::time::Duration;

/// How long a request waits for its ack before the caller sees a
/// timeout. The server never rolls back an effect whose ack was lost;
/// reconcile with `get_state` instead of assuming failure.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reconnect attempts before `connect` gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);
