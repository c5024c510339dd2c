use super::codec::{self, MAX_DATAGRAM_SIZE};
use super::detector::FailureDetector;
use super::gossip::Disseminator;
use super::handlers;
use super::registry::PeerRegistry;
use super::transport::{Transport, UdpTransport};
use super::types::{MemberView, Message, MessageType, PeerAddress, PeerState};
use crate::config::Config;
use crate::error::{MembershipError, Result};

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Owns the listening socket, the registry and the background tasks of one node.
pub struct MembershipService {
    local: PeerAddress,
    seed: Option<PeerAddress>,
    config: Config,
    socket: Arc<UdpSocket>,
    registry: Arc<PeerRegistry>,
    gossip: Arc<Disseminator>,
    detector: Arc<FailureDetector>,
    shutdown: watch::Sender<bool>,
    http_addr: OnceLock<SocketAddr>,
}

impl MembershipService {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        Self::with_transport(config, Arc::new(UdpTransport)).await
    }

    /// Binds the listening socket and seeds the registry. Nothing is sent
    /// until [`start`](Self::start).
    pub async fn with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        let bind_addr = SocketAddr::from((config.host, config.port));
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| MembershipError::Bind {
                addr: bind_addr,
                source,
            })?;

        if config.host.is_unspecified() && config.advertise_host.is_none() {
            tracing::warn!(
                "Bound to {} without --advertise-host; peers on other hosts will see {}",
                config.host,
                config.advertised_host()
            );
        }
        let local = PeerAddress::new(config.advertised_host(), socket.local_addr()?.port());
        let registry = Arc::new(PeerRegistry::new(local));

        let seed = match config.initial_peer.as_deref() {
            Some(raw) => resolve_seed(raw, config.advertised_host()).await,
            None => None,
        };
        let seed = seed.filter(|seed| {
            if registry.add(seed) {
                tracing::info!("Seeded membership with {}", seed);
                true
            } else {
                tracing::warn!("Ignoring initial peer {}: it is this node", seed);
                false
            }
        });

        let gossip = Arc::new(Disseminator::new(registry.clone(), transport));
        let detector = Arc::new(FailureDetector::new(
            registry.clone(),
            gossip.clone(),
            config.ack_timeout,
            config.suspicion_timeout,
        ));
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            local,
            seed,
            config,
            socket: Arc::new(socket),
            registry,
            gossip,
            detector,
            shutdown,
            http_addr: OnceLock::new(),
        }))
    }

    /// Announces this node to the seed and spawns the background tasks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        tracing::info!("Listening at {}", self.local);

        if let Some(seed) = self.seed {
            tracing::info!("Joining cluster via {}", seed);
            self.gossip.introduce(&seed).await;
        } else {
            tracing::info!("Starting as seed node (founder)");
        }

        if let Some(port) = self.config.http_port {
            let listener = tokio::net::TcpListener::bind((self.config.host, port)).await?;
            let addr = listener.local_addr()?;
            let _ = self.http_addr.set(addr);
            let app = handlers::router(self.clone());
            let stop = stopped(self.shutdown.subscribe());

            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(stop)
                    .await
                {
                    tracing::error!("Status endpoint failed: {}", e);
                }
            });
            tracing::info!("Status endpoint listening on http://{}", addr);
        }

        tokio::spawn(self.clone().receive_loop());
        tokio::spawn(self.clone().probe_loop());
        tokio::spawn(self.clone().gossip_loop());
        tokio::spawn(self.clone().report_loop());

        tracing::info!("All background tasks started");
        Ok(())
    }

    /// Stops every background task; the node stops answering pings.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("Shutting down membership service at {}", self.local);
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn local(&self) -> &PeerAddress {
        &self.local
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn detector(&self) -> &Arc<FailureDetector> {
        &self.detector
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr.get().copied()
    }

    pub fn members(&self) -> Vec<MemberView> {
        self.registry.view()
    }

    pub fn alive_members(&self) -> Vec<PeerAddress> {
        self.registry
            .view()
            .into_iter()
            .filter(|member| member.state == PeerState::Alive)
            .map(|member| member.address)
            .collect()
    }

    /// Dispatches one decoded message. Errors are per-message and never fatal.
    pub async fn handle(&self, message: Message) -> Result<()> {
        let from = message.from_address()?;

        match message.kind {
            MessageType::Ping => self.handle_ping(&from).await,
            MessageType::Ack => {
                self.handle_ack(&from).await;
                Ok(())
            }
            MessageType::Alive => {
                let who = message.who_address()?;
                self.handle_alive(&from, &who).await;
                Ok(())
            }
            MessageType::Suspect => {
                let who = message.who_address()?;
                self.handle_suspect(&from, &who).await;
                Ok(())
            }
            MessageType::Confirm => {
                let who = message.who_address()?;
                self.handle_confirm(&from, &who).await;
                Ok(())
            }
        }
    }

    async fn handle_ping(&self, from: &PeerAddress) -> Result<()> {
        tracing::debug!("{} pinged me", from);
        self.gossip.send(MessageType::Ack, None, from).await
    }

    async fn handle_ack(&self, from: &PeerAddress) {
        let matched = self.detector.handle_ack(from);

        if self.detector.refute(from) {
            self.gossip.announce_alive(from, None).await;
        } else if !matched {
            tracing::debug!("Unmatched ack from {}, dropping", from);
        }
    }

    async fn handle_alive(&self, from: &PeerAddress, who: &PeerAddress) {
        if *who == self.local {
            tracing::debug!("{} says I am alive", from);
            return;
        }

        if self.detector.refute(who) {
            self.gossip.announce_alive(who, Some(from)).await;
            return;
        }

        if self.registry.mark_alive(who) {
            tracing::info!(
                "{} said {} is alive; cluster size now {}",
                from,
                who,
                self.registry.size()
            );
            self.gossip.announce_alive(who, Some(from)).await;
            self.gossip.introduce(who).await;
        } else {
            tracing::debug!("{} said {} is alive; already known", from, who);
        }
    }

    async fn handle_suspect(&self, from: &PeerAddress, who: &PeerAddress) {
        if *who == self.local {
            tracing::warn!("{} suspects me, refuting", from);
            self.gossip.introduce(from).await;
            return;
        }

        tracing::debug!("{} suspects {}", from, who);
        self.detector.suspect(who, Some(from)).await;
    }

    async fn handle_confirm(&self, from: &PeerAddress, who: &PeerAddress) {
        if *who == self.local {
            tracing::warn!("{} declared me dead, rejoining", from);
            self.gossip.introduce(from).await;
            return;
        }

        // Evict before dropping timers so a probe expiring in between finds
        // nothing left to suspect.
        let removed = self.registry.remove(who);
        self.detector.cancel(who);
        if removed {
            tracing::info!(
                "{} confirmed {} is {}; cluster size now {}",
                from,
                who,
                PeerState::Dead,
                self.registry.size()
            );
            self.gossip.announce_confirm(who, Some(from)).await;
        } else {
            tracing::debug!("{} confirmed {} dead; already evicted", from, who);
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let stop = stopped(self.shutdown.subscribe());
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => {
                        let message = match codec::decode(&buf[..len]) {
                            Ok(message) => message,
                            Err(e) => {
                                tracing::warn!("Dropping datagram from {}: {}", src, e);
                                continue;
                            }
                        };

                        tracing::debug!(
                            "Received {:?} from {} (who={:?})",
                            message.kind,
                            message.from,
                            message.who
                        );
                        if let Err(e) = self.handle(message).await {
                            tracing::warn!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to receive UDP packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        tracing::info!("Receive loop at {} stopped", self.local);
    }

    async fn probe_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.probe_interval);
        let stop = stopped(self.shutdown.subscribe());
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = interval.tick() => {
                    let started = self.detector.probe_round();
                    tracing::trace!("Started {} probes", started);
                }
            }
        }
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.gossip_interval);
        let stop = stopped(self.shutdown.subscribe());
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = interval.tick() => {
                    if let Some((target, subject)) = self.gossip.gossip_round().await {
                        tracing::trace!("Gossiped {} to {}", subject, target);
                    }
                }
            }
        }
    }

    async fn report_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.report_interval);
        let stop = stopped(self.shutdown.subscribe());
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = interval.tick() => {
                    let members = self.members();
                    tracing::info!(
                        "Cluster stats at {}: {} known peers",
                        self.local,
                        members.len()
                    );
                    for member in members {
                        tracing::info!("  - {} {}", member.address, member.state);
                    }
                }
            }
        }
    }
}

/// Resolves once the shutdown flag is raised.
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// A bare port means "same host as us"; otherwise `ip:port` or `hostname:port`.
async fn resolve_seed(raw: &str, host: Ipv4Addr) -> Option<PeerAddress> {
    let raw = raw.trim();

    if let Ok(port) = raw.parse::<u16>() {
        return Some(PeerAddress::new(host, port));
    }
    if let Ok(address) = codec::resolve(raw) {
        return Some(address);
    }

    match tokio::net::lookup_host(raw).await {
        Ok(mut addrs) => {
            let resolved = addrs.find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(PeerAddress::from(v4)),
                SocketAddr::V6(_) => None,
            });
            if resolved.is_none() {
                tracing::warn!("Initial peer {} has no IPv4 address", raw);
            }
            resolved
        }
        Err(e) => {
            tracing::warn!("Cannot resolve initial peer {}: {}", raw, e);
            None
        }
    }
}
