//! Membership & Failure Detection Module
//!
//! Each node keeps its own view of which peers are alive, suspected or gone,
//! with no coordinator. Views converge through probing and gossip over UDP.
//!
//! ## Core Mechanisms
//! - **Probing**: every tracked peer is pinged on a fixed interval; a missing
//!   ack within `ack_timeout` turns it `Suspect`.
//! - **Suspicion**: a suspect that is not refuted (by an `Ack` or an `Alive`
//!   announcement) within `suspicion_timeout` is evicted and a `Confirm` is
//!   gossiped so other nodes evict it too.
//! - **Dissemination**: each state change is forwarded to one sampled peer;
//!   a periodic gossip round spreads the rest of the view.

pub mod codec;
pub mod detector;
pub mod gossip;
pub mod handlers;
pub mod registry;
pub mod service;
pub mod transport;
pub mod types;
