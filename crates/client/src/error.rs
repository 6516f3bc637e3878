//! Client-side error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure while connecting or framing.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected the request with a typed reason.
    #[error("rejected ({kind}): {detail}")]
    Rejected { kind: String, detail: String },

    /// No ack arrived within `REQUEST_TIMEOUT`. The effect may still
    /// have been committed server-side.
    #[error("request timed out")]
    Timeout,

    /// The channel dropped mid-request; reconcile after reconnecting.
    #[error("connection closed")]
    ConnectionClosed,

    /// Gave up after the capped number of reconnect attempts.
    #[error("failed to connect after {attempts} attempts")]
    ConnectFailed { attempts: u32 },

    /// Operation needs an established session membership first.
    #[error("not joined to a session")]
    NotJoined,

    /// Peer sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

impl ClientError {
    pub fn from_wire(error: tabletop_wire::ErrorProto) -> Self {
        Self::Rejected {
            kind: error.kind,
            detail: error.detail,
        }
    }
}
