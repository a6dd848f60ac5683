//! Peer lifecycle: admission, handshake, connection targets, and the
//! periodic maintenance sweep (persistent-peer retry, feelers, timeouts).
use std::collections::HashMap;
use std::{net, net::SocketAddr};

use tracing::{debug, error};
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

use crate::{
    common::network::Network,
    common::time::Clock,
    fsm::banmgr::BanManager,
    fsm::discovery::{self, AddressManager, Source},
    fsm::handler::{DisconnectReason, PeerId, Whitelist},
    fsm::peer::{Peer, PeerState},
    net::{Disconnect as NetDisconnect, Link, LocalDuration, LocalTime},
    wire::{NetworkAddress, VersionMessage},
};

use super::output::{Connect, Disconnect, SetTimer, Wire};

/// Time to wait for the handshake (`version`/`verack`) to complete.
pub const HANDSHAKE_TIMEOUT: LocalDuration = LocalDuration::from_secs(60);
/// Time to wait for a new connection to establish.
pub const CONNECTION_TIMEOUT: LocalDuration = LocalDuration::from_secs(6);
/// Period of the idle maintenance sweep.
pub const IDLE_TIMEOUT: LocalDuration = LocalDuration::from_mins(1);
/// Interval between feeler connection attempts.
pub const FEELER_INTERVAL: LocalDuration = LocalDuration::from_mins(2);
/// Target number of concurrent outbound peer connections.
pub const TARGET_OUTBOUND_PEERS: usize = 8;
/// Maximum number of inbound peer connections.
pub const MAX_INBOUND_PEERS: usize = 125;
/// Maximum inbound connections accepted from a single IP address.
pub const MAX_INBOUND_PER_IP: usize = 2;
/// How far a peer's `version` timestamp may drift from our own clock before
/// we consider the handshake bogus.
pub const TIMESTAMP_ALLOWANCE_SEC: i64 = 2 * 60 * 60;

/// An event originating in the peer lifecycle manager.
#[derive(Debug, Clone)]
pub enum Event {
    /// A `version` message was received from a peer.
    VersionReceived { addr: PeerId, msg: VersionMessage },
    /// A peer has completed the handshake.
    Negotiated { addr: PeerId, link: Link, services: u64, user_agent: String, version: i32 },
    /// Connecting to a peer drawn from the given source.
    Connecting(PeerId, Source),
    /// A connection attempt failed.
    ConnectionFailed(PeerId, std::sync::Arc<std::io::Error>),
    /// A new connection was accepted or established, prior to handshake.
    Connected(PeerId, Link),
    /// A peer disconnected.
    Disconnected(PeerId, NetDisconnect<DisconnectReason>),
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionReceived { addr, msg } => {
                write!(f, "{}: received version {} (agent {})", addr, msg.version, msg.user_agent)
            }
            Self::Negotiated { addr, services, .. } => write!(f, "{}: negotiated, services {}", addr, services),
            Self::Connecting(addr, source) => write!(f, "connecting to {} from {:?}", addr, source),
            Self::Connected(addr, link) => write!(f, "{}: connected ({:?})", addr, link),
            Self::ConnectionFailed(addr, err) => write!(f, "{}: connection attempt failed: {}", addr, err),
            Self::Disconnected(addr, reason) => write!(f, "{}: disconnected ({})", addr, reason),
        }
    }
}

/// Peer lifecycle configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub protocol_version: u32,
    pub whitelist: Whitelist,
    pub services: u64,
    pub persistent: Vec<net::SocketAddr>,
    pub required_services: u64,
    pub target_outbound_peers: usize,
    pub max_inbound_peers: usize,
    pub max_inbound_per_ip: usize,
    pub retry_max_wait: LocalDuration,
    pub retry_min_wait: LocalDuration,
    pub user_agent: &'static str,
}

/// Manages peer connections and handshakes.
#[derive(Debug)]
pub struct PeerLifecycleManager<U, C> {
    pub config: Config,
    last_idle: Option<LocalTime>,
    last_feeler: Option<LocalTime>,
    peers: HashMap<SocketAddr, Peer>,
    disconnected: HashMap<net::SocketAddr, (Option<LocalTime>, usize)>,
    network: Network,
    upstream: U,
    rng: fastrand::Rng,
    clock: C,
    next_peer_id: u64,
    /// Node-wide nonce, sent in every VERSION message we transmit. Shared
    /// across all connections (rather than one per peer) so that a
    /// self-connection's loopback VERSION carries a nonce we recognize as
    /// our own, not just one that happens to match some other peer's.
    local_nonce: u64,
}

impl<U: Wire<Event> + SetTimer + Connect + Disconnect, C: Clock + Sync> PeerLifecycleManager<U, C> {
    pub fn new(config: Config, mut rng: fastrand::Rng, upstream: U, clock: C, network: Network) -> Self {
        let local_nonce = rng.u64(..);
        Self {
            config,
            last_idle: None,
            last_feeler: None,
            peers: HashMap::new(),
            disconnected: HashMap::new(),
            network,
            upstream,
            rng,
            clock,
            next_peer_id: 0,
            local_nonce,
        }
    }

    fn alloc_peer_id(&mut self) -> u64 {
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        id
    }

    pub fn initialize(&mut self) {
        let persistent = self.config.persistent.clone();
        for addr in persistent {
            if !self.connect(&addr, false) {
                debug!("{}: unable to connect to persistent peer", addr);
            }
        }
        self.upstream.set_timer(IDLE_TIMEOUT);
    }

    fn persistent_disconnected(&mut self, addr: &net::SocketAddr, now: LocalTime) {
        let (retry_at, attempts) = self.disconnected.entry(*addr).or_default();
        let delay = LocalDuration::from_secs(2u64.saturating_pow(*attempts as u32))
            .clamp(self.config.retry_min_wait, self.config.retry_max_wait);
        *retry_at = Some(now + delay);
        *attempts += 1;
        self.upstream.set_timer(delay);
    }

    fn maintain_persistent(&mut self) {
        let now = self.clock.local_time();
        let mut reconnect = Vec::new();
        for (addr, (retry_at, _)) in &mut self.disconnected {
            if let Some(t) = retry_at {
                if *t <= now {
                    *retry_at = None;
                    reconnect.push(*addr);
                }
            }
        }
        for addr in reconnect {
            if !self.connect(&addr, false) {
                error!(target: "p2p", "couldn't establish connection with {addr}");
            }
        }
    }

    /// Called when a new connection is accepted/established, before the
    /// handshake. Returns `false` (and queues a disconnect) if the
    /// connection is refused outright for capacity reasons.
    pub fn peer_connected(&mut self, addr: SocketAddr, local_addr: SocketAddr, link: Link) -> bool {
        let now = self.clock.local_time();
        let is_feeler = self
            .peers
            .get(&addr)
            .map(|p| p.is_feeler)
            .unwrap_or(false);
        let nonce = self.local_nonce;
        let id = self.alloc_peer_id();

        self.peers
            .insert(addr, Peer::new(id, addr, local_addr, link, nonce, now, is_feeler));
        self.disconnected.remove(&addr);

        if link == Link::Inbound {
            let inbound = self.connected().filter(|p| p.is_inbound()).count();
            if inbound > self.config.max_inbound_peers {
                self.evict_inbound_peer();
                let inbound = self.connected().filter(|p| p.is_inbound()).count();
                if inbound > self.config.max_inbound_peers {
                    self.disconnect(addr, DisconnectReason::ConnectionLimit);
                    return false;
                }
            }
            let from_same_ip = self
                .connected()
                .filter(|p| p.is_inbound() && p.addr.ip() == addr.ip())
                .count();
            if from_same_ip > self.config.max_inbound_per_ip {
                self.disconnect(addr, DisconnectReason::ConnectionLimit);
                return false;
            }
        } else {
            self.upstream.version(addr, self.version_message(addr, local_addr, nonce));
            if let Some(peer) = self.peers.get_mut(&addr) {
                peer.version_sent();
            }
        }
        self.upstream.set_timer(HANDSHAKE_TIMEOUT);
        self.upstream.event(Event::Connected(addr, link));
        true
    }

    /// Try to make room for a new inbound connection by dropping the worst
    /// existing inbound peer. Candidates are inbound peers connected for at
    /// least 10 seconds, scored by ping (unknown ping is treated as worse
    /// than any measured one); ties go to the oldest connection, then the
    /// lowest peer id. No peer is protected from eviction in this release.
    fn evict_inbound_peer(&mut self) {
        const MIN_CANDIDATE_AGE_SEC: u64 = 10;
        const UNKNOWN_PING_SCORE: i64 = i64::MAX / 2;

        let now = self.clock.local_time();
        let victim = self
            .peers
            .values()
            .filter(|p| p.is_inbound() && now.as_secs().saturating_sub(p.connected_at.as_secs()) >= MIN_CANDIDATE_AGE_SEC)
            .map(|p| {
                let score = p.ping_ms.map(|ms| ms as i64).unwrap_or(UNKNOWN_PING_SCORE);
                (score, p.connected_at, p.id, p.addr)
            })
            .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)).then(b.2.cmp(&a.2)))
            .map(|(_, _, _, addr)| addr);

        if let Some(addr) = victim {
            self.peers.remove(&addr);
            self.disconnect(addr, DisconnectReason::Evicted);
        }
    }

    pub fn peer_disconnected(&mut self, addr: &SocketAddr, reason: NetDisconnect<DisconnectReason>) {
        let now = self.clock.local_time();
        if self.is_connected(addr) {
            self.upstream.event(Event::Disconnected(*addr, reason.clone()));
        } else if self.is_connecting(addr) {
            if let NetDisconnect::ConnectionError(err) = reason {
                self.upstream.event(Event::ConnectionFailed(*addr, err));
            }
        }
        self.peers.remove(addr);

        if self.config.persistent.contains(addr) {
            self.persistent_disconnected(addr, now);
        }
    }

    /// Called when a `version` message was received.
    pub fn received_version(&mut self, addr: &PeerId, msg: VersionMessage, addrman: &mut AddressManager) {
        if let Err(reason) = self.handle_version(addr, msg, addrman) {
            self.disconnect(*addr, reason);
        }
    }

    fn handle_version(
        &mut self,
        addr: &PeerId,
        msg: VersionMessage,
        addrman: &mut AddressManager,
    ) -> Result<(), DisconnectReason> {
        let now = self.clock.local_time();
        let target = self.config.target_outbound_peers;

        let (link, local_addr) = match self.peers.get(addr) {
            Some(peer) => (peer.link, peer.local_addr),
            None => return Ok(()),
        };

        self.upstream.event(Event::VersionReceived { addr: *addr, msg: msg.clone() });

        let VersionMessage {
            version,
            services,
            timestamp,
            user_agent,
            nonce,
            addr_recv: _,
            relay: _,
            start_height,
            ..
        } = msg;

        let trusted = self.config.whitelist.contains(&addr.ip(), &user_agent) || is_local(&addr.ip());

        if (version as u32) < crate::wire::MIN_PEER_PROTO_VERSION {
            return Err(DisconnectReason::PeerProtocolVersion(version));
        }
        if (timestamp - now.as_secs() as i64).abs() > TIMESTAMP_ALLOWANCE_SEC {
            return Err(DisconnectReason::Other("version timestamp outside allowance window"));
        }
        if link == Link::Outbound && services & self.config.required_services != self.config.required_services && !trusted
        {
            return Err(DisconnectReason::PeerServices(services));
        }
        // A self-connection shows up as a VERSION whose nonce matches either our
        // own node-wide nonce, or the nonce of a peer we've already finished the
        // handshake with (the other end of the same loopback).
        let is_self_connection = nonce == self.local_nonce
            || self
                .peers
                .values()
                .any(|peer| peer.addr != *addr && peer.successfully_connected && peer.local_nonce == nonce);
        if is_self_connection {
            return Err(DisconnectReason::SelfConnection);
        }
        if link == Link::Outbound && self.negotiated(Link::Outbound).count() >= target {
            return Err(DisconnectReason::ConnectionLimit);
        }

        // `addr_recv` is the peer's claim about *our* address, not theirs (RFC 1:
        // it tells us how the remote side sees us, for external-IP discovery). The
        // only address we can trust for the address book is the one we actually
        // connected to or accepted the connection from.
        addrman.insert(*addr, 0, Source::Peer, now.as_secs(), now);

        if link == Link::Inbound {
            self.upstream
                .version(*addr, self.version_message(*addr, local_addr, self.local_nonce));
        }
        self.upstream.verack(*addr).send_headers(*addr).set_timer(HANDSHAKE_TIMEOUT);

        if let Some(peer) = self.peers.get_mut(addr) {
            peer.version_received(nonce, version, services, user_agent, start_height);
        }
        Ok(())
    }

    /// Called when a `verack` message was received.
    pub fn received_verack(&mut self, addr: &PeerId) -> Option<&Peer> {
        let peer = self.peers.get_mut(addr)?;
        if peer.state != PeerState::VersionSent {
            return None;
        }
        peer.verack_received();
        peer.mark_ready();

        let (link, services, user_agent, version) =
            (peer.link, peer.remote_services, peer.remote_user_agent.clone(), peer.remote_version.unwrap_or(0));
        self.upstream.event(Event::Negotiated { addr: *addr, link, services, user_agent, version });

        self.peers.get(addr)
    }

    /// Periodic maintenance: persistent-peer retry, idle/handshake timeouts,
    /// feeler expiry, and topping up outbound connections.
    pub async fn received_wake(&mut self, addrman: &mut AddressManager, banmgr: &BanManager) {
        let now = self.clock.local_time();
        let mut timed_out = Vec::new();

        for peer in self.peers.values() {
            if !peer.is_ready() && peer.handshake_timed_out(now) {
                timed_out.push((peer.addr, DisconnectReason::PeerTimeout("handshake")));
            } else if peer.is_ready() && peer.inactivity_timed_out(now) {
                timed_out.push((peer.addr, DisconnectReason::PeerTimeout("inactivity")));
            } else if peer.feeler_expired(now) {
                timed_out.push((peer.addr, DisconnectReason::Other("feeler expired")));
            } else if banmgr.is_discouraged(peer.addr.ip()) {
                timed_out.push((peer.addr, DisconnectReason::PeerBanned));
            }
        }
        for (addr, reason) in timed_out {
            self.disconnect(addr, reason);
        }

        if now.as_secs().saturating_sub(self.last_idle.unwrap_or_default().as_secs()) >= IDLE_TIMEOUT.as_secs() {
            self.maintain_connections(addrman).await;
            self.upstream.set_timer(IDLE_TIMEOUT);
            self.last_idle = Some(now);
        }
        if now.as_secs().saturating_sub(self.last_feeler.unwrap_or_default().as_secs()) >= FEELER_INTERVAL.as_secs() {
            self.maintain_feeler(addrman);
            self.last_feeler = Some(now);
        }

        self.maintain_persistent();
    }

    fn maintain_feeler(&mut self, addrman: &mut AddressManager) {
        if !self.config.persistent.is_empty() || self.connecting().next().is_some() {
            return;
        }
        let now = self.clock.local_time();
        if let Some(addr) = addrman.select_new_for_feeler(now) {
            if self.connect(&addr, true) {
                self.upstream.event(Event::Connecting(addr, Source::Peer));
            }
        }
    }

    pub fn whitelist(&mut self, addr: net::SocketAddr) -> bool {
        self.config.whitelist.addr.insert(addr.ip())
    }

    fn version_message(&self, addr: net::SocketAddr, local_addr: net::SocketAddr, nonce: u64) -> VersionMessage {
        VersionMessage {
            version: self.config.protocol_version as i32,
            services: self.config.services,
            timestamp: self.clock.local_time().as_secs() as i64,
            addr_recv: NetworkAddress::new(addr, 0),
            addr_from: NetworkAddress::new(local_addr, self.config.services),
            nonce,
            user_agent: self.config.user_agent.to_owned(),
            start_height: 0,
            relay: false,
        }
    }
}

impl<U: Connect + Disconnect + SetTimer + Wire<Event>, C: Clock + Sync> PeerLifecycleManager<U, C> {
    pub fn is_inbound(&self, addr: &PeerId) -> bool {
        self.peers.get(addr).map(|p| p.is_inbound()).unwrap_or(false)
    }

    /// Whether the peer has completed the handshake.
    pub fn is_ready(&self, addr: &PeerId) -> bool {
        self.peers.get(addr).map(|p| p.is_ready()).unwrap_or(false)
    }

    /// Mark that we've sent this peer a `getaddr`, so we only ask once per connection.
    pub fn mark_getaddr_sent(&mut self, addr: &PeerId) {
        if let Some(peer) = self.peers.get_mut(addr) {
            peer.has_sent_getaddr = true;
        }
    }

    pub fn is_connecting(&self, addr: &PeerId) -> bool {
        self.peers.get(addr).map(|p| p.state == PeerState::Connecting).unwrap_or(false)
    }

    pub fn is_connected(&self, addr: &PeerId) -> bool {
        self.peers.contains_key(addr)
    }

    pub fn is_disconnected(&self, addr: &PeerId) -> bool {
        !self.is_connected(addr) && !self.is_connecting(addr)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn connecting(&self) -> impl Iterator<Item = &PeerId> {
        self.peers
            .iter()
            .filter(|(_, p)| p.state == PeerState::Connecting)
            .map(|(addr, _)| addr)
    }

    pub fn connected(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn negotiated(&self, link: Link) -> impl Iterator<Item = &Peer> {
        self.peers.values().filter(move |p| p.is_ready() && p.link == link)
    }

    pub fn connect(&mut self, addr: &PeerId, is_feeler: bool) -> bool {
        if self.is_connected(addr) || self.is_connecting(addr) {
            return true;
        }
        let now = self.clock.local_time();
        let id = self.alloc_peer_id();
        let nonce = self.local_nonce;
        self.peers.insert(
            *addr,
            Peer {
                state: PeerState::Connecting,
                ..Peer::new(id, *addr, *addr, Link::Outbound, nonce, now, is_feeler)
            },
        );
        self.upstream.connect(*addr, CONNECTION_TIMEOUT);
        true
    }

    pub fn disconnect(&mut self, addr: PeerId, reason: DisconnectReason) {
        self.upstream.disconnect(addr, reason);
    }

    /// How many additional outbound connections we should make right now.
    fn delta(&self) -> usize {
        let negotiated = self.negotiated(Link::Outbound).count();
        let connecting = self.connecting().count();
        let target = self.config.target_outbound_peers;
        let max = target + target / 2;
        let total = negotiated + connecting;

        if total >= max {
            return 0;
        }
        usize::min(max - total, target.saturating_sub(total))
    }

    /// Top up outbound connections from the address book, falling back to a
    /// random DNS seed when the book runs dry.
    async fn maintain_connections(&mut self, addrman: &mut AddressManager) {
        if !self.config.persistent.is_empty() {
            return;
        }
        let now = self.clock.local_time();
        let delta = self.delta();
        if delta == 0 {
            return;
        }

        let candidates = addrman.get_addresses(delta, now);
        if candidates.is_empty() {
            self.bootstrap_from_dns(addrman).await;
            return;
        }
        for addr in candidates {
            addrman.attempted(&addr, now);
            if self.connect(&addr, false) {
                self.upstream.event(Event::Connecting(addr, Source::Peer));
            }
        }
    }

    /// Resolve a random configured DNS seed and feed the results into the
    /// address book as freshly-discovered candidates.
    async fn bootstrap_from_dns(&mut self, addrman: &mut AddressManager) {
        let seeds = discovery::dns_seeds(self.network);
        if seeds.is_empty() {
            debug!("no DNS seeds configured for {:?}", self.network);
            return;
        }
        let seed = seeds[self.rng.usize(0..seeds.len())].to_string();
        let port = discovery::default_port(self.network);
        let now = self.clock.local_time();

        let resolver = match TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()) {
            Ok(r) => r,
            Err(err) => {
                error!("failed to build DNS resolver: {err}");
                return;
            }
        };
        match resolver.lookup_ip(seed.clone()).await {
            Ok(response) => {
                let resolved = response.iter().map(|ip| (net::SocketAddr::new(ip, port), 0u64, now.as_secs() as u32));
                let accepted = addrman.insert_many(resolved, Source::Dns, now);
                debug!(seed = %seed, accepted, "resolved DNS seed");
            }
            Err(err) => error!("failed to resolve DNS seed {seed}: {err}"),
        }
    }
}

/// Whether an address is on a loopback or private interface, for whitelisting purposes.
pub fn is_local(addr: &net::IpAddr) -> bool {
    match addr {
        net::IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        net::IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::AdjustedTime;
    use crate::fsm::handler::{PROTOCOL_VERSION, USER_AGENT};

    fn config() -> Config {
        Config {
            protocol_version: PROTOCOL_VERSION,
            whitelist: Whitelist::default(),
            services: crate::wire::NODE_NETWORK,
            persistent: Vec::new(),
            required_services: crate::wire::NODE_NETWORK,
            target_outbound_peers: TARGET_OUTBOUND_PEERS,
            max_inbound_peers: MAX_INBOUND_PEERS,
            max_inbound_per_ip: MAX_INBOUND_PER_IP,
            retry_max_wait: LocalDuration::from_mins(60),
            retry_min_wait: LocalDuration::from_secs(1),
            user_agent: USER_AGENT,
        }
    }

    fn manager() -> PeerLifecycleManager<output::Outbox, AdjustedTime<SocketAddr>> {
        let now = LocalTime::from_secs(1_700_000_000);
        PeerLifecycleManager::new(
            config(),
            fastrand::Rng::with_seed(1),
            output::Outbox::new(Network::Testnet),
            AdjustedTime::new(now),
            Network::Testnet,
        )
    }

    fn version_from(addr: SocketAddr, local_addr: SocketAddr, nonce: u64) -> VersionMessage {
        version_with_timestamp(addr, local_addr, nonce, 1_700_000_000)
    }

    fn version_with_timestamp(addr: SocketAddr, local_addr: SocketAddr, nonce: u64, timestamp: i64) -> VersionMessage {
        VersionMessage {
            version: PROTOCOL_VERSION as i32,
            services: crate::wire::NODE_NETWORK,
            timestamp,
            addr_recv: NetworkAddress::new(local_addr, 0),
            addr_from: NetworkAddress::new(addr, crate::wire::NODE_NETWORK),
            nonce,
            user_agent: "/test:0.1.0/".to_string(),
            start_height: 0,
            relay: false,
        }
    }

    #[test]
    fn handle_version_inserts_the_observed_address_not_the_peers_claim() {
        let mut mgr = manager();
        let mut addrman = AddressManager::new(None, false, fastrand::Rng::with_seed(1));
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        let claimed_local: SocketAddr = "203.0.113.7:9590".parse().unwrap();

        assert!(mgr.peer_connected(addr, "0.0.0.0:0".parse().unwrap(), Link::Outbound));
        mgr.received_version(&addr, version_from(addr, claimed_local, 7), &mut addrman);

        assert!(addrman.get_addresses(1, mgr.clock.local_time()).contains(&addr));
        assert!(!addrman.get_addresses(1, mgr.clock.local_time()).contains(&claimed_local));
    }

    /// A `version` carrying our own node-wide nonce back at us means we've
    /// dialed ourselves (directly, or via a loopback NAT).
    #[test]
    fn version_echoing_our_own_nonce_is_a_self_connection() {
        let mut mgr = manager();
        let mut addrman = AddressManager::new(None, false, fastrand::Rng::with_seed(1));
        let a: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        let our_nonce = mgr.local_nonce;

        assert!(mgr.peer_connected(a, "0.0.0.0:0".parse().unwrap(), Link::Outbound));
        mgr.received_version(&a, version_from(a, a, our_nonce), &mut addrman);

        let disconnects = mgr
            .upstream
            .outbound
            .lock()
            .unwrap()
            .iter()
            .filter(|io| matches!(io, crate::net::Io::Disconnect(addr, DisconnectReason::SelfConnection) if *addr == a))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn version_with_clock_far_out_of_range_is_rejected() {
        let mut mgr = manager();
        let mut addrman = AddressManager::new(None, false, fastrand::Rng::with_seed(1));
        let a: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        let skewed_timestamp = 1_700_000_000 + TIMESTAMP_ALLOWANCE_SEC + 1;

        assert!(mgr.peer_connected(a, "0.0.0.0:0".parse().unwrap(), Link::Outbound));
        mgr.received_version(&a, version_with_timestamp(a, a, mgr.local_nonce.wrapping_add(1), skewed_timestamp), &mut addrman);

        let disconnects = mgr
            .upstream
            .outbound
            .lock()
            .unwrap()
            .iter()
            .filter(|io| matches!(io, crate::net::Io::Disconnect(addr, _) if *addr == a))
            .count();
        assert_eq!(disconnects, 1);
    }
}
