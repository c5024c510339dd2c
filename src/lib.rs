//! Gossip Membership Library
//!
//! Decentralized cluster membership and failure detection (SWIM-style) over
//! UDP. Each process tracks its peers as `Alive`, `Suspect` or evicted, probes
//! them directly and gossips state changes so every view eventually converges.
//!
//! ## Modules
//! - **`membership`**: registry, wire codec, failure detector, gossip
//!   disseminator and the service that runs them.
//! - **`config`**: the configuration object and its command line.
//! - **`error`**: the error taxonomy shared by all of the above.

pub mod config;
pub mod error;
pub mod membership;

pub use config::Config;
pub use error::{MembershipError, Result};
pub use membership::service::MembershipService;
pub use membership::types::{Message, MessageType, PeerAddress, PeerState};
