//! The top-level protocol state machine.
//!
//! Wires together the peer lifecycle, address, ban, misbehavior, router and
//! ping managers behind a single [`StateMachine`], and does byte-level
//! framing of the wire protocol: messages arrive and leave as raw bytes,
//! framing and decoding happen here.
use std::collections::HashSet;
use std::path::PathBuf;
use std::{borrow::Cow, collections::HashMap, fmt, net, net::SocketAddr};

use async_trait::async_trait;
use flume as chan;
use tracing::{debug, warn};

use crate::common::network::Network;
use crate::common::time::AdjustedClock;
use crate::fsm::anchors::AnchorManager;
use crate::fsm::banmgr::{BanEntry, BanManager};
use crate::fsm::discovery::AddressManager;
use crate::fsm::event::Event;
use crate::fsm::misbehavior::{MisbehaviorTracker, Violation};
use crate::fsm::output::Outbox;
use crate::fsm::pingmgr::PingManager;
use crate::fsm::router::MessageRouter;
use crate::fsm::{output, peer, peermgr};
use crate::net::{Disconnect, Link, LocalDuration, LocalTime};
use crate::wire::{self, Header, Message, HEADER_LEN};

pub type PeerId = net::SocketAddr;

/// Peer-to-peer protocol version advertised in `version` messages.
pub const PROTOCOL_VERSION: u32 = wire::PROTOCOL_VERSION;
/// User agent included in `version` messages.
pub const USER_AGENT: &str = concat!("/CoinbaseChain:", env!("CARGO_PKG_VERSION"), "/");

/// Configured connection limits.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Target outbound peer connections.
    pub max_outbound_peers: usize,
    /// Maximum inbound peer connections.
    pub max_inbound_peers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_outbound_peers: peermgr::TARGET_OUTBOUND_PEERS,
            max_inbound_peers: peermgr::MAX_INBOUND_PEERS,
        }
    }
}

/// Peer whitelist: trusted addresses and user agents are exempt from the
/// service-bit and self-connection checks applied at handshake time.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    pub(crate) addr: HashSet<net::IpAddr>,
    user_agent: HashSet<String>,
}

impl Whitelist {
    pub(crate) fn contains(&self, addr: &net::IpAddr, user_agent: &str) -> bool {
        self.addr.contains(addr) || self.user_agent.contains(user_agent)
    }
}

/// Why a peer was disconnected.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// Peer protocol version is too old.
    PeerProtocolVersion(i32),
    /// Peer doesn't have the required services.
    PeerServices(u64),
    /// Connection to self was detected.
    SelfConnection,
    /// Inbound connection limit reached.
    ConnectionLimit,
    /// Dropped to make room for a new inbound connection at the inbound cap.
    Evicted,
    /// Error decoding an incoming message: bad magic, checksum, or framing.
    DecodeError,
    /// Peer was forced to disconnect by an external command.
    Command,
    /// Peer is banned or has crossed the discouragement threshold.
    PeerBanned,
    /// Peer timed out waiting for a handshake step, a pong, or any traffic.
    PeerTimeout(&'static str),
    /// Peer was disconnected for another reason.
    Other(&'static str),
}

impl DisconnectReason {
    /// Whether this reason may no longer apply after some time, i.e. whether
    /// reconnecting is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLimit | Self::Evicted | Self::PeerTimeout(_))
    }
}

impl From<DisconnectReason> for crate::net::Disconnect<DisconnectReason> {
    fn from(reason: DisconnectReason) -> Self {
        Self::StateMachine(reason)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerProtocolVersion(v) => write!(f, "peer protocol version {} is too old", v),
            Self::PeerServices(s) => write!(f, "peer doesn't have the required services ({:#x})", s),
            Self::SelfConnection => write!(f, "detected self-connection"),
            Self::ConnectionLimit => write!(f, "connection limit reached"),
            Self::Evicted => write!(f, "evicted to make room for a new inbound peer"),
            Self::DecodeError => write!(f, "message decode error"),
            Self::Command => write!(f, "received external command"),
            Self::PeerBanned => write!(f, "peer is banned or discouraged"),
            Self::PeerTimeout(s) => write!(f, "peer timed out: {}", s),
            Self::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// A remote peer, as seen from the outside of the state machine.
#[derive(Debug, Clone)]
pub struct Peer {
    pub addr: net::SocketAddr,
    pub local_addr: net::SocketAddr,
    pub link: Link,
    pub since: LocalTime,
    pub services: u64,
    pub user_agent: String,
    pub version: i32,
    pub start_height: i32,
}

impl Peer {
    pub fn is_outbound(&self) -> bool {
        self.link.is_outbound()
    }
}

impl From<&peer::Peer> for Peer {
    fn from(p: &peer::Peer) -> Self {
        Self {
            addr: p.addr,
            local_addr: p.local_addr,
            link: p.link,
            since: p.connected_at,
            services: p.remote_services,
            user_agent: p.remote_user_agent.clone(),
            version: p.remote_version.unwrap_or(0),
            start_height: p.remote_start_height,
        }
    }
}

/// The node's p2p protocol logic: peer lifecycle, address book, ban list,
/// misbehavior scoring and message routing, plus the byte-level framing the
/// reactor drives it with.
pub struct StateMachine<C> {
    pub network: Network,
    addrmgr: AddressManager,
    anchormgr: AnchorManager,
    banmgr: BanManager,
    misbehavior: MisbehaviorTracker,
    pingmgr: PingManager,
    pub peermgr: peermgr::PeerLifecycleManager<Outbox, C>,
    router: MessageRouter,
    pub clock: C,
    last_maintenance: LocalTime,
    maintenance_interval: LocalDuration,
    pub rng: fastrand::Rng,
    pub outbox: Outbox,
    inboxes: HashMap<SocketAddr, Decoder>,
}

/// State machine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    /// Persistent peers to always stay connected to.
    pub connect: Vec<net::SocketAddr>,
    /// Services we advertise in `version` messages.
    pub services: u64,
    /// Services an outbound peer must advertise, unless whitelisted.
    pub required_services: u64,
    pub whitelist: Whitelist,
    pub user_agent: &'static str,
    pub limits: Limits,
    /// Directory `peers.json`/`banlist.json`/`anchors.json` are persisted under. `None` disables persistence.
    pub datadir: Option<PathBuf>,
    /// Whether the address store is checksummed on disk.
    pub addr_book_checksum: bool,
    /// How often the address book, ban list, and anchors are swept and persisted.
    pub maintenance_interval: LocalDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            connect: Vec::new(),
            services: crate::wire::NODE_NETWORK,
            required_services: crate::wire::NODE_NETWORK,
            whitelist: Whitelist::default(),
            user_agent: USER_AGENT,
            limits: Limits::default(),
            datadir: None,
            addr_book_checksum: false,
            maintenance_interval: LocalDuration::from_secs(30),
        }
    }
}

impl<C> Iterator for StateMachine<C> {
    type Item = output::Io;

    fn next(&mut self) -> Option<output::Io> {
        self.outbox.next()
    }
}

/// Buffers partial reads for one peer and carves out complete wire-protocol
/// frames as enough bytes accumulate.
#[derive(Debug)]
struct Decoder {
    buf: Vec<u8>,
    magic: u32,
}

impl Decoder {
    fn new(magic: u32) -> Self {
        Self { buf: Vec::with_capacity(HEADER_LEN), magic }
    }

    fn input(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Parse at most one message out of the buffer. Returns `Ok(None)` if not
    /// enough bytes have arrived yet for a full header and payload.
    fn decode_next(&mut self) -> wire::Result<Option<Message>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = Header::decode(&self.buf[..HEADER_LEN], self.magic)?;
        let total = HEADER_LEN + header.length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let payload = &self.buf[HEADER_LEN..total];
        header.verify(payload)?;
        let message = Message::decode(header.command()?, payload)?;
        self.buf.drain(..total);
        Ok(Some(message))
    }
}

/// A command or request that can be sent to the protocol from the `Handle`.
#[derive(Clone)]
pub enum Command {
    /// List all currently-connected peers.
    ListPeers(chan::Sender<Vec<Peer>>),
    /// List all currently-banned addresses.
    ListBans(chan::Sender<Vec<(net::IpAddr, BanEntry)>>),
    /// Ban a peer by address, permanently.
    BanPeer(SocketAddr),
    /// Broadcast a message to every ready peer matching the predicate.
    Broadcast(Message, fn(&Peer) -> bool, chan::Sender<Vec<PeerId>>),
    /// Send a message to a single, randomly-chosen ready outbound peer.
    Query(Message, chan::Sender<Option<SocketAddr>>),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListPeers(_) => write!(f, "ListPeers"),
            Self::ListBans(_) => write!(f, "ListBans"),
            Self::BanPeer(addr) => write!(f, "BanPeer({})", addr),
            Self::Broadcast(msg, ..) => write!(f, "Broadcast({})", msg.command()),
            Self::Query(msg, _) => write!(f, "Query({})", msg.command()),
        }
    }
}

impl<C: AdjustedClock<PeerId> + Sync + Send> StateMachine<C> {
    /// Construct a new protocol instance.
    pub fn new(clock: C, rng: fastrand::Rng, config: Config) -> Self {
        let Config {
            network,
            connect,
            services,
            required_services,
            whitelist,
            user_agent,
            limits,
            datadir,
            addr_book_checksum,
            maintenance_interval,
        } = config;

        let outbox = Outbox::new(network);
        let peermgr = peermgr::PeerLifecycleManager::new(
            peermgr::Config {
                protocol_version: PROTOCOL_VERSION,
                whitelist,
                services,
                persistent: connect,
                required_services,
                target_outbound_peers: limits.max_outbound_peers,
                max_inbound_peers: limits.max_inbound_peers,
                max_inbound_per_ip: peermgr::MAX_INBOUND_PER_IP,
                retry_max_wait: LocalDuration::from_mins(60),
                retry_min_wait: LocalDuration::from_secs(1),
                user_agent,
            },
            rng.clone(),
            outbox.clone(),
            clock.clone(),
            network,
        );
        let addrmgr = AddressManager::new(datadir.as_ref().map(|d| d.join("peers.json")), addr_book_checksum, rng.clone());
        let anchormgr = AnchorManager::new(datadir.as_ref().map(|d| d.join("anchors.json")));
        let banmgr = BanManager::new(datadir.as_ref().map(|d| d.join("banlist.json")));

        Self {
            network,
            addrmgr,
            anchormgr,
            banmgr,
            misbehavior: MisbehaviorTracker::new(),
            pingmgr: PingManager::new(),
            peermgr,
            router: MessageRouter::new(rng.clone()),
            clock,
            last_maintenance: LocalTime::default(),
            maintenance_interval,
            rng,
            outbox,
            inboxes: HashMap::new(),
        }
    }

    /// Disconnect a peer.
    pub fn disconnect(&mut self, addr: PeerId, reason: DisconnectReason) {
        self.peermgr.disconnect(addr, reason);
    }

    /// The address book, exposed so the embedding client can bootstrap it
    /// from fixed seeds or DNS before the reactor starts driving traffic.
    pub fn addrmgr_mut(&mut self) -> &mut AddressManager {
        &mut self.addrmgr
    }

    /// Send a message to every ready peer matching the predicate.
    fn broadcast<Q: Fn(&Peer) -> bool>(&mut self, msg: Message, predicate: Q) -> Vec<PeerId> {
        let targets: Vec<Peer> = self.peermgr.peers().filter(|p| p.is_ready()).map(Peer::from).collect();
        let mut sent = Vec::new();
        for peer in targets {
            if predicate(&peer) {
                self.outbox.message(peer.addr, msg.clone());
                sent.push(peer.addr);
            }
        }
        sent
    }

    /// Send a message to a single, randomly-chosen ready outbound peer.
    fn query(&mut self, msg: Message) -> Option<PeerId> {
        let candidates: Vec<SocketAddr> = self.peermgr.negotiated(Link::Outbound).map(|p| p.addr).collect();
        if candidates.is_empty() {
            return None;
        }
        let addr = candidates[self.rng.usize(..candidates.len())];
        self.outbox.message(addr, msg);
        Some(addr)
    }

    /// Score a violation and, if it latches discouragement, propagate that to
    /// the ban manager so the next maintenance sweep disconnects the peer.
    fn score(&mut self, addr: SocketAddr, violation: Violation) {
        let (violation, score) = self.misbehavior.score(addr, violation);
        self.outbox.event(Event::Misbehavior { peer: addr, violation, score });
        if self.misbehavior.is_discouraged(&addr) {
            self.banmgr.discourage(addr.ip());
            self.outbox.event(Event::Discouraged { peer: addr });
        }
    }

    async fn handle_message(&mut self, addr: SocketAddr, message: Message) {
        let now = self.clock.local_time();

        match message {
            Message::Version(msg) => {
                let offset = msg.timestamp - now.as_secs() as i64;
                self.clock.record_offset(addr, offset);
                self.peermgr.received_version(&addr, msg, &mut self.addrmgr);
            }
            Message::Verack => {
                if let Some(peer) = self.peermgr.received_verack(&addr) {
                    let (link, is_feeler, getaddr_sent) = (peer.link, peer.is_feeler, peer.has_sent_getaddr);
                    self.addrmgr.connected(&addr, now);
                    if is_feeler {
                        self.disconnect(addr, DisconnectReason::Other("feeler handshake complete"));
                    } else if link == Link::Outbound && !getaddr_sent {
                        self.outbox.message(addr, Message::GetAddr);
                        self.peermgr.mark_getaddr_sent(&addr);
                    }
                }
            }
            Message::Ping(nonce) => {
                self.outbox.message(addr, Message::Pong(nonce));
            }
            Message::Pong(nonce) => {
                self.pingmgr.received_pong(addr, nonce, now);
            }
            _ if !self.peermgr.is_ready(&addr) => {
                debug!(target: "p2p", "{}: ignoring {} before handshake completes", addr, message.command());
            }
            Message::GetAddr => {
                let is_inbound = self.peermgr.is_inbound(&addr);
                self.router.received_getaddr(addr, is_inbound, &mut self.addrmgr, now, &mut self.outbox);
            }
            Message::Addr(addrs) => {
                if addrs.len() > wire::MAX_ADDR_SIZE {
                    self.score(addr, Violation::OversizedMessage);
                    return;
                }
                self.router.received_addr(addr, addrs, &mut self.addrmgr, now, &mut self.outbox);
            }
            Message::Inv(items) => {
                let new = self.router.received_inv(addr, items);
                if !new.is_empty() {
                    self.outbox.event(Event::Received(addr, Message::Inv(new)));
                }
            }
            Message::GetData(_)
            | Message::NotFound(_)
            | Message::GetHeaders(_)
            | Message::Headers(_)
            | Message::SendHeaders => {
                self.outbox.event(Event::Received(addr, message));
            }
        }
    }
}

impl<C: AdjustedClock<PeerId> + Sync + Send> StateMachine<C> {
    /// Process a user command.
    pub async fn command(&mut self, cmd: Command) {
        debug!(target: "p2p", "received command: {:?}", cmd);

        match cmd {
            Command::ListPeers(reply) => {
                let peers = self.peermgr.peers().filter(|p| p.is_ready()).map(Peer::from).collect::<Vec<_>>();
                reply.send_async(peers).await.ok();
            }
            Command::ListBans(reply) => {
                let bans = self.banmgr.list_bans().map(|(ip, e)| (*ip, e.clone())).collect::<Vec<_>>();
                reply.send_async(bans).await.ok();
            }
            Command::BanPeer(addr) => {
                let now = self.clock.local_time();
                self.banmgr.ban(addr.ip(), "manual".to_string(), now, 0);
                self.disconnect(addr, DisconnectReason::PeerBanned);
            }
            Command::Broadcast(msg, predicate, reply) => {
                let peers = self.broadcast(msg, predicate);
                reply.send_async(peers).await.ok();
            }
            Command::Query(msg, reply) => {
                reply.send_async(self.query(msg)).await.ok();
            }
        }
    }
}

#[async_trait]
impl<C: AdjustedClock<PeerId> + Sync + Send> crate::net::Service for StateMachine<C> {
    type Command = Command;

    async fn command_received(&mut self, cmd: Command) {
        self.command(cmd).await;
    }
}

#[async_trait]
impl<C: AdjustedClock<PeerId> + Sync + Send> crate::net::StateMachine for StateMachine<C> {
    type Message = [u8];
    type Event = Event;
    type DisconnectReason = DisconnectReason;

    async fn initialize(&mut self, time: LocalTime) {
        self.clock.set(time);
        self.outbox.event(Event::Initializing);

        if let Err(err) = self.addrmgr.load() {
            warn!(target: "p2p", %err, "failed to load address store");
        }
        if let Err(err) = self.banmgr.load() {
            warn!(target: "p2p", %err, "failed to load ban list");
        }
        self.peermgr.initialize();

        for (addr, _services) in self.anchormgr.take() {
            debug!(target: "p2p", %addr, "reconnecting to anchor peer");
            self.peermgr.connect(&addr, false);
        }

        self.outbox.event(Event::Ready { height: 0, time });
    }

    async fn message_received(&mut self, addr: &SocketAddr, bytes: Cow<'_, [u8]>) {
        let addr = *addr;
        let magic = self.network.magic();
        self.inboxes.entry(addr).or_insert_with(|| Decoder::new(magic)).input(&bytes);

        loop {
            let decoded = self.inboxes.get_mut(&addr).expect("inserted above").decode_next();
            match decoded {
                Ok(Some(message)) => self.handle_message(addr, message).await,
                Ok(None) => break,
                Err(err) => {
                    debug!(target: "p2p", "{}: framing error: {}", addr, err);
                    self.disconnect(addr, DisconnectReason::DecodeError);
                    break;
                }
            }
        }
    }

    fn attempted(&mut self, addr: &SocketAddr) {
        let now = self.clock.local_time();
        self.addrmgr.attempted(addr, now);
    }

    fn connected(&mut self, addr: SocketAddr, local_addr: &SocketAddr, link: Link) -> bool {
        let now = self.clock.local_time();
        if self.banmgr.is_banned(addr.ip(), now) {
            debug!(target: "p2p", "rejected connection from banned peer {}", addr);
            return false;
        }
        if !self.peermgr.peer_connected(addr, *local_addr, link) {
            return false;
        }
        self.router.peer_connected(addr);
        true
    }

    async fn disconnected(&mut self, addr: &SocketAddr, reason: Disconnect<DisconnectReason>) {
        self.pingmgr.forget(addr);
        self.misbehavior.forget(addr);
        self.router.peer_disconnected(addr);
        self.peermgr.peer_disconnected(addr, reason);
        self.inboxes.remove(addr);
    }

    fn is_disconnected(&mut self, addr: SocketAddr) -> bool {
        self.peermgr.is_disconnected(&addr)
    }

    fn tick(&mut self, local_time: LocalTime) {
        self.clock.set(local_time);
    }

    async fn timer_expired(&mut self) {
        self.peermgr.received_wake(&mut self.addrmgr, &self.banmgr).await;

        let now = self.clock.local_time();
        let ready: Vec<SocketAddr> = self.peermgr.peers().filter(|p| p.is_ready()).map(|p| p.addr).collect();

        for addr in self.pingmgr.due(ready.into_iter(), now) {
            let nonce = self.rng.u64(..);
            self.pingmgr.sent(addr, nonce, now);
            self.outbox.message(addr, Message::Ping(nonce));
        }
        for addr in self.pingmgr.timed_out(now) {
            self.disconnect(addr, DisconnectReason::PeerTimeout("ping"));
        }

        if now.as_secs().saturating_sub(self.last_maintenance.as_secs()) >= self.maintenance_interval.as_secs() {
            self.addrmgr.cleanup_stale(now);
            if let Err(err) = self.addrmgr.save() {
                warn!(target: "p2p", %err, "failed to persist address store");
            }
            if let Err(err) = self.banmgr.save() {
                warn!(target: "p2p", %err, "failed to persist ban list");
            }
            let anchors = self
                .peermgr
                .negotiated(Link::Outbound)
                .map(|p| (p.addr, p.remote_services))
                .take(crate::fsm::anchors::MAX_ANCHORS);
            if let Err(err) = self.anchormgr.save(anchors) {
                warn!(target: "p2p", %err, "failed to persist anchor peers");
            }
            self.last_maintenance = now;
        }
    }

    fn is_connected(&mut self, addr: SocketAddr) -> bool {
        self.peermgr.is_connected(&addr)
    }

    fn connecting_amount(&self) -> usize {
        self.peermgr.connecting().count()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::common::time::AdjustedTime;
    use crate::net::StateMachine as NetStateMachine;
    use crate::wire::{NetworkAddress, TimestampedAddress, VersionMessage, MAGIC_TESTNET};

    fn machine() -> StateMachine<AdjustedTime<SocketAddr>> {
        let now = LocalTime::from_secs(1_700_000_000);
        let mut sm = StateMachine::new(
            AdjustedTime::new(now),
            fastrand::Rng::with_seed(1),
            Config {
                network: Network::Testnet,
                ..Config::default()
            },
        );
        sm.tick(now);
        sm
    }

    /// Drives a fresh outbound connection through `connected` -> `version` ->
    /// `verack` so the peer ends up in the `Ready` state the dispatch arms
    /// gate on.
    async fn handshake(sm: &mut StateMachine<AdjustedTime<SocketAddr>>, addr: SocketAddr) {
        let local_addr: SocketAddr = ([0, 0, 0, 0], 0).into();
        assert!(sm.connected(addr, &local_addr, Link::Outbound));

        let version = VersionMessage {
            version: PROTOCOL_VERSION as i32,
            services: crate::wire::NODE_NETWORK,
            timestamp: sm.clock.local_time().as_secs() as i64,
            addr_recv: NetworkAddress::new(local_addr, 0),
            addr_from: NetworkAddress::new(addr, crate::wire::NODE_NETWORK),
            nonce: 42,
            user_agent: "/test:0.1.0/".to_string(),
            start_height: 0,
            relay: false,
        };
        sm.handle_message(addr, Message::Version(version)).await;
        sm.handle_message(addr, Message::Verack).await;
        assert!(sm.peermgr.is_ready(&addr));
    }

    #[test]
    fn decoder_round_trips_a_single_message() {
        let mut decoder = Decoder::new(MAGIC_TESTNET);
        let frame = Message::Ping(7).encode();
        let header = Header::for_payload(MAGIC_TESTNET, "ping", &frame);
        decoder.input(&header.encode());
        decoder.input(&frame);

        let message = decoder.decode_next().unwrap().unwrap();
        assert_eq!(message, Message::Ping(7));
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn decoder_waits_for_a_full_frame_before_decoding() {
        let mut decoder = Decoder::new(MAGIC_TESTNET);
        let frame = Message::Ping(7).encode();
        let header = Header::for_payload(MAGIC_TESTNET, "ping", &frame);
        let mut full = header.encode().to_vec();
        full.extend_from_slice(&frame);

        decoder.input(&full[..HEADER_LEN + 2]);
        assert!(decoder.decode_next().unwrap().is_none());

        decoder.input(&full[HEADER_LEN + 2..]);
        assert_eq!(decoder.decode_next().unwrap().unwrap(), Message::Ping(7));
    }

    #[test]
    fn decoder_rejects_wrong_magic() {
        let mut decoder = Decoder::new(MAGIC_TESTNET);
        let frame = Message::Ping(1).encode();
        let header = Header::for_payload(crate::wire::MAGIC_MAINNET, "ping", &frame);
        decoder.input(&header.encode());
        decoder.input(&frame);
        assert!(decoder.decode_next().is_err());
    }

    #[tokio::test]
    async fn command_ban_peer_bans_and_disconnects() {
        let mut sm = machine();
        let addr: SocketAddr = (Ipv4Addr::new(1, 2, 3, 4), 9590).into();
        sm.command(Command::BanPeer(addr)).await;

        let now = sm.clock.local_time();
        assert!(sm.banmgr.is_banned(addr.ip(), now));
    }

    #[tokio::test]
    async fn command_list_peers_is_empty_with_no_connections() {
        let mut sm = machine();
        let (tx, rx) = chan::bounded(1);
        sm.command(Command::ListPeers(tx)).await;
        assert!(rx.recv_async().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_returns_none_with_no_ready_peers() {
        let mut sm = machine();
        assert_eq!(sm.query(Message::Ping(1)), None);
    }

    #[tokio::test]
    async fn query_and_broadcast_reach_a_ready_peer() {
        let mut sm = machine();
        let addr: SocketAddr = (Ipv4Addr::new(1, 2, 3, 4), 9590).into();
        handshake(&mut sm, addr).await;

        assert_eq!(sm.query(Message::Ping(1)), Some(addr));

        let sent = sm.broadcast(Message::Ping(2), |_| true);
        assert_eq!(sent, vec![addr]);
    }

    #[tokio::test]
    async fn oversized_addr_message_discourages_the_peer() {
        let mut sm = machine();
        let addr: SocketAddr = (Ipv4Addr::new(1, 2, 3, 4), 9590).into();
        handshake(&mut sm, addr).await;

        let oversized: Vec<TimestampedAddress> = (0..crate::wire::MAX_ADDR_SIZE + 1)
            .map(|i| TimestampedAddress::new(0, NetworkAddress::new((Ipv4Addr::new(10, 0, 0, 1), i as u16 + 1).into(), 0)))
            .collect();
        sm.handle_message(addr, Message::Addr(oversized)).await;

        assert!(sm.misbehavior.is_discouraged(&addr));
        assert!(sm.banmgr.is_discouraged(addr.ip()));
    }

    #[test]
    fn connected_rejects_a_banned_peer() {
        let mut sm = machine();
        let addr: SocketAddr = (Ipv4Addr::new(1, 2, 3, 4), 9590).into();
        let local_addr: SocketAddr = ([0, 0, 0, 0], 0).into();
        let now = sm.clock.local_time();

        sm.banmgr.ban(addr.ip(), "test".to_string(), now, 0);

        assert!(!sm.connected(addr, &local_addr, Link::Outbound));
        assert!(sm.is_disconnected(addr));
    }

    #[test]
    fn connected_tracks_connecting_and_connected_state() {
        let mut sm = machine();
        let addr: SocketAddr = (Ipv4Addr::new(1, 2, 3, 4), 9590).into();
        let local_addr: SocketAddr = ([0, 0, 0, 0], 0).into();

        assert_eq!(sm.connecting_amount(), 0);
        assert!(sm.is_disconnected(addr));

        sm.attempted(&addr);
        assert!(sm.connected(addr, &local_addr, Link::Outbound));

        assert!(sm.is_connected(addr));
        assert!(!sm.is_disconnected(addr));
    }

    #[tokio::test]
    async fn disconnected_forgets_peer_state() {
        let mut sm = machine();
        let addr: SocketAddr = (Ipv4Addr::new(1, 2, 3, 4), 9590).into();
        handshake(&mut sm, addr).await;
        assert!(sm.is_connected(addr));

        sm.disconnected(&addr, Disconnect::StateMachine(DisconnectReason::Command)).await;

        assert!(!sm.is_connected(addr));
        assert!(!sm.inboxes.contains_key(&addr));
        assert_eq!(sm.query(Message::Ping(1)), None);
    }

    #[test]
    fn tick_advances_the_clock() {
        let mut sm = machine();
        let later = sm.clock.local_time() + LocalDuration::from_secs(5);
        sm.tick(later);
        assert_eq!(sm.clock.local_time(), later);
    }

    #[tokio::test]
    async fn timer_expired_runs_periodic_maintenance_once_the_interval_elapses() {
        let mut sm = machine();
        let past_due = sm.clock.local_time() + sm.maintenance_interval + LocalDuration::from_secs(1);
        sm.tick(past_due);

        sm.timer_expired().await;

        assert_eq!(sm.last_maintenance, past_due);
    }
}
