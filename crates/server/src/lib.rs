//! Tabletop Synchronization Server
//!
//! The server owns the authoritative copy of every live session. It is
//! split in two layers:
//!
//! - [`hub`]: a sans-io protocol core. One request in, one ack plus an
//!   ordered list of outgoing messages out. All session mutation happens
//!   here, synchronously, with no reference to the transport.
//! - [`net`]: the tokio front end. One task per connection reads frames
//!   and forwards them to a single hub worker task; the worker applies
//!   them one at a time against the shared registry, so no two mutations
//!   ever interleave, and fans the resulting messages out through each
//!   connection's ordered write queue.
//!
//! Broadcast ordering is structural rather than timed: for every advanced
//! player the hub emits the advance notice immediately followed by the
//! refreshed snapshot, and per-connection queues preserve that order all
//! the way to the peer.

#![deny(unsafe_code)]

pub mod hub;
pub mod net;

pub use hub::{Hub, Outgoing};
pub use net::{ServerConfig, run, serve};

/// Default listen address. Override with `--bind` / `TABLETOP_BIND`.
pub const DEFAULT_BIND: &str = "0.0.0.0:4750";
