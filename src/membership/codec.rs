//! Message Codec
//!
//! JSON wire form, one message per datagram:
//! `{"type": "Ping", "from": "127.0.0.1:3000", "who": ""}`.

use super::types::{Message, MessageType, PeerAddress};
use crate::error::{MembershipError, Result};

use std::net::SocketAddrV4;

/// Receive buffer size; every encoded message must fit in one datagram of this size.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

pub fn encode(kind: MessageType, who: Option<&PeerAddress>, from: &PeerAddress) -> Result<Vec<u8>> {
    encode_message(&Message::new(kind, who, from))
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(message)
        .map_err(|e| MembershipError::invalid(format!("cannot serialize: {}", e)))?;

    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(MembershipError::invalid(format!(
            "encoded message is {} bytes, limit is {}",
            bytes.len(),
            MAX_DATAGRAM_SIZE
        )));
    }

    Ok(bytes)
}

/// Parses and schema-checks a datagram. Address fields are left unresolved.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let message: Message = serde_json::from_slice(bytes)
        .map_err(|e| MembershipError::invalid(format!("malformed payload: {}", e)))?;

    if message.kind.is_announcement() && message.who.is_empty() {
        return Err(MembershipError::invalid(format!(
            "{:?} without a subject",
            message.kind
        )));
    }
    if !message.kind.is_announcement() && !message.who.is_empty() {
        return Err(MembershipError::invalid(format!(
            "{:?} must not carry a subject",
            message.kind
        )));
    }

    Ok(message)
}

/// Resolves an `ip:port` string into a peer address.
pub fn resolve(raw: &str) -> Result<PeerAddress> {
    raw.trim()
        .parse::<SocketAddrV4>()
        .map(PeerAddress::from)
        .map_err(|_| MembershipError::invalid(format!("unresolvable address {:?}", raw)))
}

impl Message {
    pub fn from_address(&self) -> Result<PeerAddress> {
        resolve(&self.from)
    }

    /// Only meaningful for `Alive`, `Suspect` and `Confirm`.
    pub fn who_address(&self) -> Result<PeerAddress> {
        if !self.kind.is_announcement() {
            return Err(MembershipError::invalid(format!(
                "{:?} has no subject",
                self.kind
            )));
        }
        resolve(&self.who)
    }
}
