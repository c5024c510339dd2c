//! Error taxonomy for the membership protocol.
//!
//! Per-message and per-probe errors never escape the task that produced them:
//! they are logged and folded into the state machine. Only a failure to bind
//! the local socket is fatal.

use std::net::SocketAddr;

pub type Result<T> = std::result::Result<T, MembershipError>;

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// Malformed payload, or an address field that does not resolve.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A send or receive on the datagram transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The local listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl MembershipError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMessage(reason.into())
    }

    pub fn is_invalid_message(&self) -> bool {
        matches!(self, Self::InvalidMessage(_))
    }
}
