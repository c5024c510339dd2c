use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::SystemTime;

/// A resolved UDP/IPv4 endpoint identifying one cluster member.
///
/// The canonical `ip:port` string is what goes on the wire and what the
/// registry is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(SocketAddrV4);

impl PeerAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(ip, port))
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.0)
    }
}

impl From<SocketAddrV4> for PeerAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self(addr)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for PeerAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PeerState {
    Alive,
    Suspect,
    /// Never stored: a dead peer is evicted. Only appears in eviction logs.
    Dead,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Alive => "alive",
            PeerState::Suspect => "suspect",
            PeerState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Registry value for one tracked peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEntry {
    pub state: PeerState,
    /// Wall-clock start of suspicion, set only while `Suspect`.
    pub suspected_since: Option<SystemTime>,
}

impl PeerEntry {
    pub fn alive() -> Self {
        Self {
            state: PeerState::Alive,
            suspected_since: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    Ping,
    Ack,
    Alive,
    Suspect,
    Confirm,
}

impl MessageType {
    /// Announcements carry a subject in `who`; probes leave it empty.
    pub fn is_announcement(&self) -> bool {
        matches!(
            self,
            MessageType::Alive | MessageType::Suspect | MessageType::Confirm
        )
    }
}

/// The wire protocol unit: one message per datagram.
///
/// - `Ping/Ack`: direct liveness probe and its reply; `who` is empty.
/// - `Alive/Suspect/Confirm`: disseminate a state change about `who`.
///
/// Address fields stay as strings until a handler resolves them with
/// [`Message::from_address`] / [`Message::who_address`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub from: String,
    pub who: String,
}

impl Message {
    pub fn new(kind: MessageType, who: Option<&PeerAddress>, from: &PeerAddress) -> Self {
        Self {
            kind,
            from: from.to_string(),
            who: who.map(|w| w.to_string()).unwrap_or_default(),
        }
    }

    pub fn ping(from: &PeerAddress) -> Self {
        Self::new(MessageType::Ping, None, from)
    }

    pub fn ack(from: &PeerAddress) -> Self {
        Self::new(MessageType::Ack, None, from)
    }

    pub fn alive(who: &PeerAddress, from: &PeerAddress) -> Self {
        Self::new(MessageType::Alive, Some(who), from)
    }

    pub fn suspect(who: &PeerAddress, from: &PeerAddress) -> Self {
        Self::new(MessageType::Suspect, Some(who), from)
    }

    pub fn confirm(who: &PeerAddress, from: &PeerAddress) -> Self {
        Self::new(MessageType::Confirm, Some(who), from)
    }
}

/// A row of the local membership view, as reported to operators.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemberView {
    pub address: PeerAddress,
    pub state: PeerState,
    /// How long the peer has been under suspicion, if it is.
    pub suspected_for_ms: Option<u64>,
}
