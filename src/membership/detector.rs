//! Failure Detector
//!
//! Drives `Alive -> Suspect -> evicted` per peer. Every in-flight probe and
//! every running suspicion timer is keyed by its target address and owns a
//! oneshot signal, so concurrent probes of different peers never cross-signal.
//! Whichever side removes the map entry first wins the race (ack vs. ack
//! timeout, refutation vs. suspicion timeout); the loser becomes a no-op.

use super::gossip::Disseminator;
use super::registry::PeerRegistry;
use super::types::{MessageType, PeerAddress, PeerState};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Bookkeeping for one outstanding `Ping`.
#[derive(Debug)]
pub struct ProbeState {
    pub id: Uuid,
    pub target: PeerAddress,
    pub sent_at: Instant,
    pub deadline: Instant,
    ack: oneshot::Sender<()>,
}

/// A running suspicion timer.
#[derive(Debug)]
struct Suspicion {
    id: Uuid,
    since: SystemTime,
    refute: oneshot::Sender<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Acked,
    /// No ack before the deadline; the target was handed to suspicion.
    TimedOut,
    /// The ping could not be sent; handled like a timeout.
    SendFailed,
    /// A probe for this target was already in flight.
    Skipped,
    /// The probe was dropped by an eviction or shutdown.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspicionOutcome {
    Refuted,
    /// The peer was evicted and a `Confirm` disseminated.
    Expired,
    Cancelled,
}

pub struct FailureDetector {
    registry: Arc<PeerRegistry>,
    gossip: Arc<Disseminator>,
    ack_timeout: Duration,
    suspicion_timeout: Duration,
    probes: DashMap<PeerAddress, ProbeState>,
    suspicions: DashMap<PeerAddress, Suspicion>,
}

impl FailureDetector {
    pub fn new(
        registry: Arc<PeerRegistry>,
        gossip: Arc<Disseminator>,
        ack_timeout: Duration,
        suspicion_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            gossip,
            ack_timeout,
            suspicion_timeout,
            probes: DashMap::new(),
            suspicions: DashMap::new(),
        }
    }

    /// Spawns a probe task for every tracked peer without one in flight.
    pub fn probe_round(self: &Arc<Self>) -> usize {
        let mut started = 0;

        for target in self.registry.peers() {
            if self.probes.contains_key(&target) {
                continue;
            }

            let detector = self.clone();
            tokio::spawn(async move {
                let outcome = detector.probe(target).await;
                tracing::trace!("Probe of {} finished: {:?}", target, outcome);
            });
            started += 1;
        }

        started
    }

    /// One full probe cycle against `target`: ping, then wait for the ack or
    /// the deadline, whichever comes first.
    pub async fn probe(self: &Arc<Self>, target: PeerAddress) -> ProbeOutcome {
        let (ack, mut acked) = oneshot::channel();
        let id = Uuid::new_v4();
        let sent_at = Instant::now();

        match self.probes.entry(target) {
            Entry::Occupied(_) => return ProbeOutcome::Skipped,
            Entry::Vacant(vacant) => {
                vacant.insert(ProbeState {
                    id,
                    target,
                    sent_at,
                    deadline: sent_at + self.ack_timeout,
                    ack,
                });
            }
        }

        if let Err(e) = self.gossip.send(MessageType::Ping, None, &target).await {
            tracing::warn!("Failed to ping {}: {}", target, e);
            self.discard_probe(&target, id);
            self.suspect(&target, None).await;
            return ProbeOutcome::SendFailed;
        }

        match tokio::time::timeout(self.ack_timeout, &mut acked).await {
            Ok(Ok(())) => ProbeOutcome::Acked,
            Ok(Err(_)) => ProbeOutcome::Cancelled,
            Err(_) => {
                let Some(probe) = self.discard_probe(&target, id) else {
                    // The ack (or a cancellation) claimed the probe just before the deadline.
                    return match acked.try_recv() {
                        Ok(()) => ProbeOutcome::Acked,
                        Err(_) => ProbeOutcome::Cancelled,
                    };
                };

                tracing::info!(
                    "No ack from {} within {:?}",
                    probe.target,
                    probe.deadline - probe.sent_at
                );
                self.suspect(&target, None).await;
                ProbeOutcome::TimedOut
            }
        }
    }

    /// Signals the outstanding probe of `from`, if any.
    pub fn handle_ack(&self, from: &PeerAddress) -> bool {
        match self.probes.remove(from) {
            Some((_, probe)) => {
                tracing::debug!(
                    "Ack from {} after {:?}",
                    probe.target,
                    probe.sent_at.elapsed()
                );
                let _ = probe.ack.send(());
                true
            }
            None => false,
        }
    }

    /// `Alive -> Suspect`. On a real transition this starts the suspicion timer
    /// and disseminates `Suspect(target)`; repeated suspicion is a no-op.
    pub async fn suspect(
        self: &Arc<Self>,
        target: &PeerAddress,
        origin: Option<&PeerAddress>,
    ) -> bool {
        let since = SystemTime::now();

        if !self.registry.mark_suspect(target, since) {
            tracing::debug!("{} is already suspect or unknown", target);
            return false;
        }

        tracing::info!("Peer {} is now suspect", target);
        self.start_suspicion(*target, since);
        self.gossip.announce_suspect(target, origin).await;
        true
    }

    /// Cancels the suspicion timer of `target` and marks it alive again. A
    /// timer left over for a peer that is no longer tracked is dropped without
    /// bringing the peer back.
    pub fn refute(&self, target: &PeerAddress) -> bool {
        let Some((_, suspicion)) = self.suspicions.remove(target) else {
            return false;
        };

        let _ = suspicion.refute.send(());
        if !self.registry.clear_suspicion(target) {
            tracing::debug!("Dropped stale suspicion of untracked peer {}", target);
            return false;
        }

        let suspected_for = SystemTime::now()
            .duration_since(suspicion.since)
            .unwrap_or_default();
        tracing::info!("Peer {} refuted suspicion after {:?}", target, suspected_for);
        true
    }

    /// Drops any probe or suspicion timer for `target` without side effects.
    pub fn cancel(&self, target: &PeerAddress) {
        self.probes.remove(target);
        self.suspicions.remove(target);
    }

    pub fn is_probing(&self, target: &PeerAddress) -> bool {
        self.probes.contains_key(target)
    }

    pub fn is_suspecting(&self, target: &PeerAddress) -> bool {
        self.suspicions.contains_key(target)
    }

    pub fn probes_in_flight(&self) -> usize {
        self.probes.len()
    }

    fn start_suspicion(self: &Arc<Self>, target: PeerAddress, since: SystemTime) {
        let (refute, refuted) = oneshot::channel();
        let id = Uuid::new_v4();

        self.suspicions.insert(target, Suspicion { id, since, refute });

        let detector = self.clone();
        tokio::spawn(async move {
            let outcome = detector.await_suspicion(target, id, refuted).await;
            tracing::debug!("Suspicion of {} ended: {:?}", target, outcome);
        });
    }

    async fn await_suspicion(
        &self,
        target: PeerAddress,
        id: Uuid,
        mut refuted: oneshot::Receiver<()>,
    ) -> SuspicionOutcome {
        match tokio::time::timeout(self.suspicion_timeout, &mut refuted).await {
            Ok(Ok(())) => SuspicionOutcome::Refuted,
            Ok(Err(_)) => SuspicionOutcome::Cancelled,
            Err(_) => {
                if self
                    .suspicions
                    .remove_if(&target, |_, suspicion| suspicion.id == id)
                    .is_none()
                {
                    return match refuted.try_recv() {
                        Ok(()) => SuspicionOutcome::Refuted,
                        Err(_) => SuspicionOutcome::Cancelled,
                    };
                }

                if !self.registry.evict_if_suspect(&target) {
                    return SuspicionOutcome::Cancelled;
                }

                tracing::info!(
                    "Peer {} is now {} after {:?} of unrefuted suspicion (cluster size now {})",
                    target,
                    PeerState::Dead,
                    self.suspicion_timeout,
                    self.registry.size()
                );
                self.gossip.announce_confirm(&target, None).await;
                SuspicionOutcome::Expired
            }
        }
    }

    /// Removes the probe entry only if it is still the one identified by `id`.
    fn discard_probe(&self, target: &PeerAddress, id: Uuid) -> Option<ProbeState> {
        self.probes
            .remove_if(target, |_, probe| probe.id == id)
            .map(|(_, probe)| probe)
    }
}
