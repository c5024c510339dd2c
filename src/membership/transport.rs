//! Datagram transport.
//!
//! Sends are self-contained: the UDP implementation opens an ephemeral socket
//! per message, so concurrent senders share no connection state.

use super::types::PeerAddress;
use crate::error::Result;

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, target: &PeerAddress, payload: &[u8]) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransport;

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, target: &PeerAddress, payload: &[u8]) -> Result<()> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        let sent = socket.send_to(payload, target.socket_addr()).await?;

        tracing::trace!("Sent {} bytes to {}", sent, target);
        Ok(())
    }
}
