//! Message routing: handshake gating, address gossip policy, and the
//! block-inventory relay that used to live in a dedicated inventory manager.
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;

use super::discovery::{self, AddressManager};
use super::output::Wire;
use crate::common::collections::AddressBook;
use crate::net::{LocalDuration, LocalTime};
use crate::wire::{InventoryVector, TimestampedAddress, MSG_BLOCK};

/// How long we remember having already relayed a given block, to avoid
/// re-announcing it to a peer that should already have it.
const ECHO_SUPPRESSION: LocalDuration = LocalDuration::from_secs(600);
/// How long an address stays in a peer's learned cache for `getaddr` echo
/// suppression: we won't hand back an address within this window of having
/// learned it was already known to the requester.
const ECHO_SUPPRESS_TTL: LocalDuration = LocalDuration::from_secs(600);
/// Per-peer cap on addresses learned and remembered for future `getaddr` replies.
const LEARNED_CACHE_CAP: usize = 2_000;
/// Global ring of recently-relayed block hashes, used for echo suppression.
const RECENT_RELAY_CAP: usize = 5_000;
/// Global ring of recently-learned addresses, the primary source for
/// `getaddr` replies.
const RECENT_ADDRS_CAP: usize = 5_000;
/// Maximum addresses handed back in a single `getaddr` response.
const GETADDR_REPLY_CAP: usize = 1_000;
/// Maximum inventory vectors tracked per peer before older entries are dropped.
const INV_QUEUE_CAP: usize = 1_000;

/// An event emitted by the router.
#[derive(Debug, Clone)]
pub enum Event {
    AddrReceived { peer: SocketAddr, count: usize },
    GetAddrServed { peer: SocketAddr, count: usize },
    InvForwarded { peer: SocketAddr, count: usize },
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::AddrReceived { peer, count } => write!(f, "received {} addr(s) from {}", count, peer),
            Event::GetAddrServed { peer, count } => write!(f, "served {} addr(s) to {}", count, peer),
            Event::InvForwarded { peer, count } => write!(f, "forwarded {} inv item(s) to {}", count, peer),
        }
    }
}

#[derive(Debug, Default)]
struct PeerRouting {
    /// Whether we've already answered a `getaddr` from this peer.
    getaddr_replied: bool,
    /// Addresses learned from or sent to this peer, with the time learned,
    /// for `getaddr` replies and echo suppression.
    learned: VecDeque<(SocketAddr, LocalTime)>,
    /// Block hashes already offered to this peer via `inv`, to avoid
    /// re-announcing the same block.
    announced_blocks: VecDeque<[u8; 32]>,
}

impl PeerRouting {
    fn remember_learned(&mut self, addr: SocketAddr, now: LocalTime) {
        if let Some(pos) = self.learned.iter().position(|(a, _)| *a == addr) {
            self.learned.remove(pos);
        }
        if self.learned.len() >= LEARNED_CACHE_CAP {
            self.learned.pop_front();
        }
        self.learned.push_back((addr, now));
    }

    /// Whether we've told this peer about `addr` (or heard it from them)
    /// recently enough that handing it back would just be an echo.
    fn learned_recently(&self, addr: SocketAddr, now: LocalTime) -> bool {
        self.learned
            .iter()
            .any(|(a, t)| *a == addr && now.as_secs().saturating_sub(t.as_secs()) < ECHO_SUPPRESS_TTL.as_secs())
    }

    fn remember_announced(&mut self, hash: [u8; 32]) -> bool {
        if self.announced_blocks.contains(&hash) {
            return false;
        }
        if self.announced_blocks.len() >= INV_QUEUE_CAP {
            self.announced_blocks.pop_front();
        }
        self.announced_blocks.push_back(hash);
        true
    }
}

/// Routes `addr`/`getaddr`/`inv`/`getdata` traffic between peers and the
/// address manager.
#[derive(Debug)]
pub struct MessageRouter {
    peers: AddressBook<SocketAddr, PeerRouting>,
    recent_relay: VecDeque<(SocketAddr, LocalTime)>,
    /// Ring of the most recently learned addresses across all peers, in
    /// `(address, services, last_seen)` form. The primary source for
    /// `getaddr` replies.
    recent_addrs: VecDeque<(SocketAddr, u64, u32)>,
    rng: fastrand::Rng,
}

impl MessageRouter {
    pub fn new(rng: fastrand::Rng) -> Self {
        Self {
            peers: AddressBook::new(),
            recent_relay: VecDeque::new(),
            recent_addrs: VecDeque::new(),
            rng,
        }
    }

    fn remember_recent_addr(&mut self, addr: SocketAddr, services: u64, last_seen: u32) {
        if let Some(pos) = self.recent_addrs.iter().position(|(a, _, _)| *a == addr) {
            self.recent_addrs.remove(pos);
        }
        if self.recent_addrs.len() >= RECENT_ADDRS_CAP {
            self.recent_addrs.pop_front();
        }
        self.recent_addrs.push_back((addr, services, last_seen));
    }

    pub fn peer_connected(&mut self, peer: SocketAddr) {
        self.peers.insert(peer, PeerRouting::default());
    }

    pub fn peer_disconnected(&mut self, peer: &SocketAddr) {
        self.peers.remove(peer);
    }

    fn was_recently_relayed(&self, addr: SocketAddr, now: LocalTime) -> bool {
        self.recent_relay
            .iter()
            .any(|(a, t)| *a == addr && now.as_secs().saturating_sub(t.as_secs()) < ECHO_SUPPRESSION.as_secs())
    }

    fn mark_relayed(&mut self, addr: SocketAddr, now: LocalTime) {
        if self.recent_relay.len() >= RECENT_RELAY_CAP {
            self.recent_relay.pop_front();
        }
        self.recent_relay.push_back((addr, now));
    }

    /// Handle an inbound `getaddr`. Only ever answered once per connection,
    /// and only for inbound peers: we don't want to teach our outbound peers
    /// anything about our own address book beyond what they already infer.
    ///
    /// The reply is drawn, in order, from the global recently-learned ring,
    /// then an `AddrMan` sample, falling back to other peers' learned
    /// addresses only if both of those are empty. Addresses we've recently
    /// told the requester about, and the requester's own address, are
    /// excluded before the result is shuffled and capped.
    pub fn received_getaddr<U: Wire<Event>>(
        &mut self,
        from: SocketAddr,
        is_inbound: bool,
        addrman: &mut AddressManager,
        now: LocalTime,
        upstream: &mut U,
    ) {
        if !is_inbound {
            return;
        }
        match self.peers.get_mut(&from) {
            Some(routing) if !routing.getaddr_replied => routing.getaddr_replied = true,
            _ => return,
        }

        let mut candidates: Vec<(SocketAddr, u64, u32)> = self.recent_addrs.iter().copied().collect();
        candidates.extend(addrman.addresses_for_getaddr(GETADDR_REPLY_CAP, now));

        if candidates.is_empty() {
            candidates = self
                .peers
                .iter()
                .filter(|(peer, _)| **peer != from)
                .flat_map(|(_, r)| r.learned.iter().map(|(a, t)| (*a, 0u64, t.as_secs() as u32)))
                .collect();
        }

        let requester = self.peers.get(&from);
        let mut seen = HashSet::new();
        let mut addrs = Vec::new();
        for (addr, services, last_seen) in candidates {
            let echoed = requester.is_some_and(|r| r.learned_recently(addr, now));
            if addr == from || !seen.insert(addr) || echoed {
                continue;
            }
            addrs.push((addr, services, last_seen));
            if addrs.len() >= GETADDR_REPLY_CAP {
                break;
            }
        }
        self.rng.shuffle(&mut addrs);

        let timestamped: Vec<TimestampedAddress> = addrs
            .into_iter()
            .map(|(addr, services, last_seen)| {
                TimestampedAddress::new(last_seen, crate::wire::NetworkAddress::new(addr, services))
            })
            .collect();

        upstream.event(Event::GetAddrServed { peer: from, count: timestamped.len() });
        upstream.addr(from, timestamped);
    }

    /// Handle an inbound `addr` message: validate, forward into the address
    /// manager, and remember the addresses for this peer's learned cache.
    pub fn received_addr<U: Wire<Event>>(
        &mut self,
        from: SocketAddr,
        addrs: Vec<TimestampedAddress>,
        addrman: &mut AddressManager,
        now: LocalTime,
        upstream: &mut U,
    ) {
        if addrs.is_empty() || addrs.len() > crate::wire::MAX_ADDR_SIZE {
            return;
        }
        let accepted = addrman.insert_many(
            addrs.iter().map(|a| (a.address.socket_addr(), a.address.services, a.timestamp)),
            discovery::Source::Peer,
            now,
        );

        if let Some(routing) = self.peers.get_mut(&from) {
            for a in &addrs {
                routing.remember_learned(a.address.socket_addr(), now);
            }
        }
        for a in &addrs {
            self.remember_recent_addr(a.address.socket_addr(), a.address.services, a.timestamp);
        }

        upstream.event(Event::AddrReceived { peer: from, count: accepted });
    }

    /// Announce a new block to all ready peers that haven't already seen it,
    /// skipping any peer we've recently relayed the same hash to.
    pub fn announce_block<U: Wire<Event>>(
        &mut self,
        hash: [u8; 32],
        peers: impl Iterator<Item = SocketAddr>,
        now: LocalTime,
        upstream: &mut U,
    ) {
        for peer in peers {
            if self.was_recently_relayed(peer, now) {
                continue;
            }
            let should_send = self
                .peers
                .get_mut(&peer)
                .map(|r| r.remember_announced(hash))
                .unwrap_or(false);
            if !should_send {
                continue;
            }
            upstream.inv(peer, vec![InventoryVector { inv_type: MSG_BLOCK, hash }]);
            upstream.event(Event::InvForwarded { peer, count: 1 });
            self.mark_relayed(peer, now);
        }
    }

    /// Handle an inbound `inv`: this crate holds no block storage of its own,
    /// so we can't usefully answer with `getdata`. We only dedupe against
    /// what we've already seen from this peer and hand back the rest, for
    /// the caller to forward to whatever owns chain state and can decide
    /// whether a `getheaders` is warranted.
    pub fn received_inv(&mut self, from: SocketAddr, items: Vec<InventoryVector>) -> Vec<InventoryVector> {
        let mut new = Vec::new();
        if let Some(routing) = self.peers.get_mut(&from) {
            for item in items {
                if item.inv_type != MSG_BLOCK {
                    continue;
                }
                if routing.remember_announced(item.hash) {
                    new.push(item);
                }
            }
        }
        new
    }

    /// Track which addresses have *not* yet been seen by this set of peers,
    /// for testing and diagnostics.
    pub fn known_addresses(&self, peer: &SocketAddr) -> HashSet<SocketAddr> {
        self.peers
            .get(peer)
            .map(|r| r.learned.iter().map(|(a, _)| *a).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
        sent_addr: Arc<Mutex<Vec<(SocketAddr, usize)>>>,
    }

    impl Wire<Event> for Recorder {
        fn event(&self, event: Event) {
            self.events.lock().unwrap().push(event.to_string());
        }

        fn version(&mut self, _addr: SocketAddr, _msg: crate::wire::VersionMessage) {}
        fn verack(&mut self, _addr: SocketAddr) -> &mut Self { self }
        fn send_headers(&mut self, _addr: SocketAddr) -> &mut Self { self }
        fn ping(&mut self, _addr: SocketAddr, _nonce: u64) -> &Self { self }
        fn pong(&mut self, _addr: SocketAddr, _nonce: u64) -> &Self { self }
        fn get_addr(&mut self, _addr: SocketAddr) {}
        fn addr(&mut self, addr: SocketAddr, addrs: Vec<TimestampedAddress>) {
            self.sent_addr.lock().unwrap().push((addr, addrs.len()));
        }
        fn get_headers(&mut self, _addr: SocketAddr, _locator_hashes: Vec<[u8; 32]>, _hash_stop: [u8; 32]) {}
        fn headers(&mut self, _addr: SocketAddr, _headers: Vec<crate::wire::BlockHeaderWire>) {}
        fn inv(&mut self, _addr: SocketAddr, _inventory: Vec<InventoryVector>) {}
        fn get_data(&mut self, _addr: SocketAddr, _inventory: Vec<InventoryVector>) {}
        fn not_found(&mut self, _addr: SocketAddr, _inventory: Vec<InventoryVector>) {}
    }

    fn rng() -> fastrand::Rng {
        fastrand::Rng::with_seed(1)
    }

    #[test]
    fn getaddr_is_only_answered_once() {
        let mut router = MessageRouter::new(rng());
        let mut addrman = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        router.peer_connected(peer);

        let mut upstream = Recorder::default();
        router.received_getaddr(peer, true, &mut addrman, now, &mut upstream);
        router.received_getaddr(peer, true, &mut addrman, now, &mut upstream);

        assert_eq!(upstream.sent_addr.lock().unwrap().len(), 1);
    }

    #[test]
    fn getaddr_is_ignored_for_outbound_peers() {
        let mut router = MessageRouter::new(rng());
        let mut addrman = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        router.peer_connected(peer);

        let mut upstream = Recorder::default();
        router.received_getaddr(peer, false, &mut addrman, now, &mut upstream);
        assert!(upstream.sent_addr.lock().unwrap().is_empty());
    }

    #[test]
    fn received_addr_forwards_into_addrman() {
        let mut router = MessageRouter::new(rng());
        let mut addrman = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        router.peer_connected(peer);

        let addrs = vec![TimestampedAddress::new(
            now.as_secs() as u32,
            crate::wire::NetworkAddress::new("5.6.7.8:9590".parse().unwrap(), 1),
        )];
        let mut upstream = Recorder::default();
        router.received_addr(peer, addrs, &mut addrman, now, &mut upstream);
        assert_eq!(addrman.len(), 1);
    }

    #[test]
    fn getaddr_serves_from_the_recent_addr_ring_before_addrman() {
        let mut router = MessageRouter::new(rng());
        let mut addrman = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let learner: SocketAddr = "9.9.9.9:9590".parse().unwrap();
        let requester: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        router.peer_connected(learner);
        router.peer_connected(requester);

        let learned_addr: SocketAddr = "5.6.7.8:9590".parse().unwrap();
        let addrs = vec![TimestampedAddress::new(
            now.as_secs() as u32,
            crate::wire::NetworkAddress::new(learned_addr, 1),
        )];
        let mut upstream = Recorder::default();
        router.received_addr(learner, addrs, &mut addrman, now, &mut upstream);

        router.received_getaddr(requester, true, &mut addrman, now, &mut upstream);
        let sent = upstream.sent_addr.lock().unwrap();
        assert_eq!(sent.last().unwrap(), &(requester, 1));
    }

    #[test]
    fn getaddr_never_echoes_the_requesters_own_address() {
        let mut router = MessageRouter::new(rng());
        let mut addrman = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let other: SocketAddr = "9.9.9.9:9590".parse().unwrap();
        let requester: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        router.peer_connected(other);
        router.peer_connected(requester);

        let addrs = vec![TimestampedAddress::new(
            now.as_secs() as u32,
            crate::wire::NetworkAddress::new(requester, 1),
        )];
        let mut upstream = Recorder::default();
        router.received_addr(other, addrs, &mut addrman, now, &mut upstream);

        router.received_getaddr(requester, true, &mut addrman, now, &mut upstream);
        let sent = upstream.sent_addr.lock().unwrap();
        assert_eq!(sent.last().unwrap(), &(requester, 0));
    }

    #[test]
    fn getaddr_suppresses_addresses_the_requester_just_taught_us() {
        let mut router = MessageRouter::new(rng());
        let mut addrman = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let requester: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        router.peer_connected(requester);

        let echoed: SocketAddr = "5.6.7.8:9590".parse().unwrap();
        let addrs = vec![TimestampedAddress::new(
            now.as_secs() as u32,
            crate::wire::NetworkAddress::new(echoed, 1),
        )];
        let mut upstream = Recorder::default();
        router.received_addr(requester, addrs, &mut addrman, now, &mut upstream);

        router.received_getaddr(requester, true, &mut addrman, now, &mut upstream);
        let sent = upstream.sent_addr.lock().unwrap();
        assert_eq!(sent.last().unwrap(), &(requester, 0));
    }

    #[test]
    fn block_is_not_reannounced_to_same_peer() {
        let mut router = MessageRouter::new(rng());
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        router.peer_connected(peer);
        let now = LocalTime::from_secs(1_700_000_000);
        let hash = [9u8; 32];

        let mut upstream = Recorder::default();
        router.announce_block(hash, std::iter::once(peer), now, &mut upstream);
        router.announce_block(hash, std::iter::once(peer), now, &mut upstream);

        let events = upstream.events.lock().unwrap();
        assert_eq!(events.iter().filter(|e| e.contains("forwarded")).count(), 1);
    }

    #[test]
    fn received_inv_dedupes_without_requesting_data() {
        let mut router = MessageRouter::new(rng());
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        router.peer_connected(peer);
        let hash = [7u8; 32];
        let items = vec![InventoryVector { inv_type: MSG_BLOCK, hash }];

        let new = router.received_inv(peer, items.clone());
        assert_eq!(new, items);

        let repeat = router.received_inv(peer, items);
        assert!(repeat.is_empty());
    }
}
