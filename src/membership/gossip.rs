//! Gossip Disseminator
//!
//! Forwards each local state change to one sampled peer. A fanout of one keeps
//! traffic constant per event; epidemic spread comes from every new learner
//! forwarding again. Callers only disseminate after a registry transition, so
//! duplicates die out instead of echoing around the cluster.

use super::codec;
use super::registry::PeerRegistry;
use super::transport::Transport;
use super::types::{MessageType, PeerAddress, PeerState};
use crate::error::Result;

use rand::seq::SliceRandom;
use std::sync::Arc;

pub struct Disseminator {
    registry: Arc<PeerRegistry>,
    transport: Arc<dyn Transport>,
}

impl Disseminator {
    pub fn new(registry: Arc<PeerRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub fn local(&self) -> &PeerAddress {
        self.registry.local()
    }

    /// Encodes and sends one message stamped with the local address.
    pub async fn send(
        &self,
        kind: MessageType,
        who: Option<&PeerAddress>,
        target: &PeerAddress,
    ) -> Result<()> {
        let payload = codec::encode(kind, who, self.local())?;
        self.transport.send(target, &payload).await?;

        match who {
            Some(who) => tracing::debug!("Sent {:?}({}) to {}", kind, who, target),
            None => tracing::debug!("Sent {:?} to {}", kind, target),
        }
        Ok(())
    }

    pub async fn announce_alive(
        &self,
        who: &PeerAddress,
        excluding: Option<&PeerAddress>,
    ) -> Option<PeerAddress> {
        self.announce(MessageType::Alive, who, excluding).await
    }

    pub async fn announce_suspect(
        &self,
        who: &PeerAddress,
        excluding: Option<&PeerAddress>,
    ) -> Option<PeerAddress> {
        self.announce(MessageType::Suspect, who, excluding).await
    }

    pub async fn announce_confirm(
        &self,
        who: &PeerAddress,
        excluding: Option<&PeerAddress>,
    ) -> Option<PeerAddress> {
        self.announce(MessageType::Confirm, who, excluding).await
    }

    /// Tells `peer` directly that the local node is alive.
    pub async fn introduce(&self, peer: &PeerAddress) -> bool {
        let local = *self.local();
        match self.send(MessageType::Alive, Some(&local), peer).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to introduce myself to {}: {}", peer, e);
                false
            }
        }
    }

    /// One anti-entropy round: tell a random peer about a random live member
    /// (possibly ourselves) other than the peer itself.
    pub async fn gossip_round(&self) -> Option<(PeerAddress, PeerAddress)> {
        let target = self.registry.sample(&[])?;

        let subject = self.pick_subject(&target)?;

        match self.send(MessageType::Alive, Some(&subject), &target).await {
            Ok(()) => Some((target, subject)),
            Err(e) => {
                tracing::warn!("Gossip round to {} failed: {}", target, e);
                None
            }
        }
    }

    fn pick_subject(&self, target: &PeerAddress) -> Option<PeerAddress> {
        let mut candidates: Vec<PeerAddress> = self
            .registry
            .view()
            .into_iter()
            .filter(|member| member.state == PeerState::Alive && member.address != *target)
            .map(|member| member.address)
            .collect();
        candidates.push(*self.local());

        candidates.choose(&mut rand::thread_rng()).copied()
    }

    /// Sends `kind(who)` to one peer other than `who` and the origin of the news.
    async fn announce(
        &self,
        kind: MessageType,
        who: &PeerAddress,
        excluding: Option<&PeerAddress>,
    ) -> Option<PeerAddress> {
        let mut excluded = vec![who];
        excluded.extend(excluding);

        let Some(target) = self.registry.sample(&excluded) else {
            tracing::debug!("No peer to tell about {:?}({})", kind, who);
            return None;
        };

        match self.send(kind, Some(who), &target).await {
            Ok(()) => {
                tracing::debug!("Disseminated {:?}({}) to {}", kind, who, target);
                Some(target)
            }
            Err(e) => {
                tracing::warn!("Failed to disseminate {:?}({}) to {}: {}", kind, who, target, e);
                None
            }
        }
    }
}
