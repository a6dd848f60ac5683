//! Address manager: stores, samples, and persists candidate peer addresses.
//!
//! Addresses live in one of two tables. `new` holds addresses we've heard
//! about but never successfully connected to; `tried` holds addresses we've
//! had a working connection with at some point. Selection is tried-biased so
//! we prefer addresses with a proven track record, while still giving new
//! addresses a chance so the network keeps discovering itself.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use bitcoin_hashes::{sha256, Hash};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::network::Network;
use crate::net::{LocalDuration, LocalTime};

/// Hardcoded seed addresses (`ip:port`), tried before any DNS lookup when
/// the address store comes up empty on startup.
pub fn fixed_seeds(network: Network) -> &'static [&'static str] {
    match network {
        Network::Mainnet => &[],
        Network::Testnet => &[],
        Network::Regtest => &[],
    }
}

/// Hostnames that resolve to a rotating set of seed peers.
pub fn dns_seeds(network: Network) -> &'static [&'static str] {
    match network {
        Network::Mainnet => &[],
        Network::Testnet => &[],
        Network::Regtest => &[],
    }
}

/// Default listening port per network, used when a seed resolves to a bare IP.
pub fn default_port(network: Network) -> u16 {
    match network {
        Network::Mainnet => 9590,
        Network::Testnet => 19590,
        Network::Regtest => 19591,
    }
}

/// Probability of drawing from `tried` rather than `new` when both are non-empty.
pub const P_TRIED: f64 = 0.5;
/// Minimum time between two connection attempts to the same address.
pub const ADDRESS_COOLDOWN: LocalDuration = LocalDuration::from_secs(60);
/// Base of the exponential backoff applied per failed attempt.
const FAILURE_DECAY_BASE: f64 = 0.66;
/// An address with neither timestamp refreshed within this long is stale,
/// one half of the "terrible address" test applied to `new` on cleanup.
const STALE_AGE: LocalDuration = LocalDuration::from_secs(30 * 24 * 60 * 60);
/// An address that has failed this many connection attempts without ever
/// succeeding is terrible, regardless of how recently we heard about it.
const MAX_FAILURES: u32 = 10;
/// Lower clamp for an address's advertised "last seen" timestamp on ingest.
const MAX_RETROACTIVE_AGE: LocalDuration = LocalDuration::from_secs(10 * 365 * 24 * 60 * 60);
/// Upper clamp: timestamps further than this into the future are rejected.
const MAX_FUTURE_SKEW: LocalDuration = LocalDuration::from_secs(10 * 60);

/// Where we first heard about an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Dns,
    FixedSeed,
    Peer,
    Manual,
}

/// An event emitted by the address manager.
#[derive(Debug, Clone)]
pub enum Event {
    /// Addresses were ingested from a peer's `addr` message.
    Received { count: usize, source: Source },
    /// Both tables are empty; callers should fall back to seed discovery.
    Exhausted,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Received { count, source } => {
                write!(f, "received {} address(es) from {:?}", count, source)
            }
            Event::Exhausted => write!(f, "address store exhausted"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    services: u64,
    source: Source,
    last_seen: u64,
    last_attempt: Option<u64>,
    last_success: Option<u64>,
    attempts: u32,
}

impl Entry {
    fn new(source: Source, services: u64, last_seen: u64) -> Self {
        Self {
            services,
            source,
            last_seen,
            last_attempt: None,
            last_success: None,
            attempts: 0,
        }
    }

    /// Probability (0.0-1.0) that we should retry this address now, given
    /// repeated past failures. Decays geometrically so chronically-dead
    /// addresses are rarely retried without being forgotten entirely.
    fn retry_probability(&self) -> f64 {
        FAILURE_DECAY_BASE.powi(self.attempts as i32)
    }

    /// An address we should give up on entirely: it has failed repeatedly
    /// and never worked, or both its "last seen" and "last success" are
    /// stale. `tried` entries are never tested against this (a proven
    /// address is never discarded just for going quiet).
    fn is_terrible(&self, cutoff: u64) -> bool {
        if self.attempts >= MAX_FAILURES && self.last_success.is_none() {
            return true;
        }
        self.last_seen < cutoff && self.last_success.map(|t| t < cutoff).unwrap_or(true)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AddrFile {
    new: HashMap<SocketAddr, Entry>,
    tried: HashMap<SocketAddr, Entry>,
}

/// An address manager, holding the new/tried address tables.
#[derive(Debug)]
pub struct AddressManager {
    path: Option<PathBuf>,
    checksum: bool,
    new: HashMap<SocketAddr, Entry>,
    tried: HashMap<SocketAddr, Entry>,
    rng: fastrand::Rng,
}

impl AddressManager {
    pub fn new(path: Option<PathBuf>, checksum: bool, rng: fastrand::Rng) -> Self {
        Self {
            path,
            checksum,
            new: HashMap::new(),
            tried: HashMap::new(),
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.tried.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load tables from disk. A missing file is treated as an empty store;
    /// a checksum mismatch (when enabled) discards the file rather than
    /// trusting possibly-corrupt data.
    pub fn load(&mut self) -> io::Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        let body = if self.checksum {
            match split_checksum(&bytes) {
                Some(body) => body,
                None => {
                    warn!("address store checksum mismatch, discarding");
                    return Ok(());
                }
            }
        } else {
            &bytes[..]
        };
        match serde_json::from_slice::<AddrFile>(body) {
            Ok(file) => {
                debug!(new = file.new.len(), tried = file.tried.len(), "loaded address store");
                self.new = file.new;
                self.tried = file.tried;
            }
            Err(err) => warn!(%err, "address store is corrupt, starting empty"),
        }
        Ok(())
    }

    pub fn save(&self) -> io::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let file = AddrFile {
            new: self.new.clone(),
            tried: self.tried.clone(),
        };
        let mut bytes = serde_json::to_vec(&file)?;
        if self.checksum {
            bytes = append_checksum(&bytes);
        }
        write_atomic(path, &bytes)
    }

    /// Ingest an address learned from a peer's `addr` message or our own
    /// DNS/fixed-seed bootstrap. Timestamps are clamped to a sane window and
    /// addresses already in `tried` are left untouched.
    pub fn insert(&mut self, addr: SocketAddr, services: u64, source: Source, last_seen: u64, now: LocalTime) {
        if !is_routable(addr.ip()) {
            return;
        }
        let floor = now.as_secs().saturating_sub(MAX_RETROACTIVE_AGE.as_secs());
        let ceiling = now.as_secs().saturating_add(MAX_FUTURE_SKEW.as_secs());
        let last_seen = last_seen.clamp(floor, ceiling);

        if self.tried.contains_key(&addr) {
            return;
        }
        self.new
            .entry(addr)
            .and_modify(|e| {
                if last_seen > e.last_seen {
                    e.last_seen = last_seen;
                    e.services = services;
                }
            })
            .or_insert_with(|| Entry::new(source, services, last_seen));
    }

    /// Ingest a whole `addr` message: each entry as `(addr, services, last_seen)`.
    /// Returns how many entries were actually accepted.
    pub fn insert_many(
        &mut self,
        addrs: impl IntoIterator<Item = (SocketAddr, u64, u32)>,
        source: Source,
        now: LocalTime,
    ) -> usize {
        let mut accepted = 0;
        for (addr, services, last_seen) in addrs {
            let before = self.len();
            self.insert(addr, services, source, last_seen as u64, now);
            if self.len() > before {
                accepted += 1;
            }
        }
        accepted
    }

    /// Select up to `count` candidate addresses to dial, biased toward
    /// `tried` addresses with `P_TRIED` probability, honoring the cooldown
    /// since the last attempt and geometric backoff on repeated failures.
    pub fn get_addresses(&mut self, count: usize, now: LocalTime) -> Vec<SocketAddr> {
        let mut picked = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for _ in 0..count.saturating_mul(4) {
            if picked.len() >= count {
                break;
            }
            let use_tried = !self.tried.is_empty()
                && (self.new.is_empty() || self.rng.f64() < P_TRIED);
            let table = if use_tried { &self.tried } else { &self.new };
            if table.is_empty() {
                continue;
            }
            let idx = self.rng.usize(..table.len());
            let Some((addr, entry)) = table.iter().nth(idx) else {
                continue;
            };
            if seen.contains(addr) {
                continue;
            }
            if let Some(last_attempt) = entry.last_attempt {
                if now.as_secs().saturating_sub(last_attempt) < ADDRESS_COOLDOWN.as_secs() {
                    continue;
                }
            }
            if entry.attempts > 0 && self.rng.f64() > entry.retry_probability() {
                continue;
            }
            seen.insert(*addr);
            picked.push(*addr);
        }
        picked
    }

    /// Draw a single candidate from the `new` table only, for feeler
    /// connections. Feelers exist to test addresses we've never had a
    /// working connection with, so `tried` is never a candidate here.
    pub fn select_new_for_feeler(&mut self, now: LocalTime) -> Option<SocketAddr> {
        if self.new.is_empty() {
            return None;
        }
        for _ in 0..8 {
            let idx = self.rng.usize(..self.new.len());
            let Some((addr, entry)) = self.new.iter().nth(idx) else {
                continue;
            };
            if let Some(last_attempt) = entry.last_attempt {
                if now.as_secs().saturating_sub(last_attempt) < ADDRESS_COOLDOWN.as_secs() {
                    continue;
                }
            }
            if entry.attempts > 0 && self.rng.f64() > entry.retry_probability() {
                continue;
            }
            return Some(*addr);
        }
        None
    }

    pub fn attempted(&mut self, addr: &SocketAddr, now: LocalTime) {
        if let Some(e) = self.new.get_mut(addr).or_else(|| self.tried.get_mut(addr)) {
            e.last_attempt = Some(now.as_secs());
        }
    }

    /// Move an address from `new` into `tried` after a successful handshake.
    pub fn connected(&mut self, addr: &SocketAddr, now: LocalTime) {
        if let Some(mut entry) = self.new.remove(addr) {
            entry.attempts = 0;
            entry.last_success = Some(now.as_secs());
            entry.last_attempt = Some(now.as_secs());
            self.tried.insert(*addr, entry);
        } else if let Some(e) = self.tried.get_mut(addr) {
            e.attempts = 0;
            e.last_success = Some(now.as_secs());
            e.last_attempt = Some(now.as_secs());
        }
    }

    pub fn failed(&mut self, addr: &SocketAddr) {
        if let Some(e) = self.new.get_mut(addr).or_else(|| self.tried.get_mut(addr)) {
            e.attempts = e.attempts.saturating_add(1);
        }
    }

    /// Drop terrible and stale entries from `new`. `tried` addresses have a
    /// proven track record and are never removed here.
    pub fn cleanup_stale(&mut self, now: LocalTime) {
        let cutoff = now.as_secs().saturating_sub(STALE_AGE.as_secs());
        self.new.retain(|_, e| !e.is_terrible(cutoff));
    }

    /// A handful of addresses to hand back in response to a peer's `getaddr`.
    pub fn addresses_for_getaddr(&mut self, max: usize, now: LocalTime) -> Vec<(SocketAddr, u64, u32)> {
        self.get_addresses(max, now)
            .into_iter()
            .filter_map(|addr| {
                let entry = self.new.get(&addr).or_else(|| self.tried.get(&addr))?;
                Some((addr, entry.services, entry.last_seen as u32))
            })
            .collect()
    }
}

fn is_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !v4.is_private()
                && !v4.is_loopback()
                && !v4.is_link_local()
                && !v4.is_broadcast()
                && !v4.is_unspecified()
                && !v4.is_documentation()
        }
        IpAddr::V6(v6) => !v6.is_loopback() && !v6.is_unspecified() && !v6.is_multicast(),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("peers")
    ));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

fn append_checksum(body: &[u8]) -> Vec<u8> {
    let digest = sha256::Hash::hash(body).into_inner();
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(body);
    out.extend_from_slice(&digest);
    out
}

fn split_checksum(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < 32 {
        return None;
    }
    let (body, sum) = bytes.split_at(bytes.len() - 32);
    if sha256::Hash::hash(body).into_inner() == sum {
        Some(body)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> fastrand::Rng {
        fastrand::Rng::with_seed(42)
    }

    #[test]
    fn insert_then_get_addresses() {
        let mut mgr = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.insert(addr, 1, Source::Peer, now.as_secs(), now);
        assert_eq!(mgr.len(), 1);
        assert!(mgr.get_addresses(1, now).contains(&addr));
    }

    #[test]
    fn unroutable_addresses_are_rejected() {
        let mut mgr = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let addr: SocketAddr = "127.0.0.1:9590".parse().unwrap();
        mgr.insert(addr, 1, Source::Peer, now.as_secs(), now);
        assert!(mgr.is_empty());
    }

    #[test]
    fn connected_moves_new_to_tried() {
        let mut mgr = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.insert(addr, 1, Source::Peer, now.as_secs(), now);
        mgr.connected(&addr, now);
        assert!(mgr.tried.contains_key(&addr));
        assert!(!mgr.new.contains_key(&addr));
    }

    #[test]
    fn future_timestamp_is_clamped() {
        let mut mgr = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.insert(addr, 1, Source::Peer, now.as_secs() + 99_999_999, now);
        let entry = mgr.new.get(&addr).unwrap();
        assert!(entry.last_seen <= now.as_secs() + MAX_FUTURE_SKEW.as_secs());
    }

    #[test]
    fn cooldown_prevents_immediate_reselection() {
        let mut mgr = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.insert(addr, 1, Source::Peer, now.as_secs(), now);
        mgr.attempted(&addr, now);
        assert!(mgr.get_addresses(1, now).is_empty());
        let later = LocalTime::from_secs(now.as_secs() + 61);
        assert!(mgr.get_addresses(1, later).contains(&addr));
    }

    #[test]
    fn stale_entries_are_cleaned_up() {
        let mut mgr = AddressManager::new(None, false, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.insert(addr, 1, Source::Peer, now.as_secs(), now);
        let much_later = LocalTime::from_secs(now.as_secs() + STALE_AGE.as_secs() + 1);
        mgr.cleanup_stale(much_later);
        assert!(mgr.is_empty());
    }

    #[test]
    fn persists_with_checksum() {
        let dir = std::env::temp_dir().join(format!("discovery-test-{:?}", std::thread::current().id()));
        let path = dir.join("peers.json");
        let mut mgr = AddressManager::new(Some(path.clone()), true, rng());
        let now = LocalTime::from_secs(1_700_000_000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.insert(addr, 1, Source::Peer, now.as_secs(), now);
        mgr.save().unwrap();

        let mut reloaded = AddressManager::new(Some(path), true, rng());
        reloaded.load().unwrap();
        assert_eq!(reloaded.len(), 1);
        let _ = fs::remove_dir_all(dir);
    }
}
