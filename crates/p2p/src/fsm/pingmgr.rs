//! Keepalive pings.
//!
//! Sends a `ping` to every ready peer on an interval, and tracks whether the
//! matching `pong` comes back before the peer's timeout.

use std::net::SocketAddr;

use crate::common::collections::AddressBook;
use crate::net::{LocalDuration, LocalTime};

use super::peer::{PING_INTERVAL_SEC, PING_TIMEOUT_SEC};

/// An event emitted by the ping manager.
#[derive(Debug, Clone)]
pub enum Event {
    /// A peer replied to our ping within the timeout.
    PongReceived { peer: SocketAddr, latency: LocalDuration },
    /// A peer failed to reply to a ping before [`PING_TIMEOUT_SEC`] elapsed.
    TimedOut { peer: SocketAddr },
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::PongReceived { peer, latency } => {
                write!(f, "peer {} replied to ping in {}", peer, latency)
            }
            Event::TimedOut { peer } => write!(f, "peer {} timed out waiting for pong", peer),
        }
    }
}

#[derive(Debug)]
struct Outstanding {
    nonce: u64,
    sent_at: LocalTime,
}

/// Tracks in-flight pings per peer and decides when a new one is due.
#[derive(Debug)]
pub struct PingManager {
    outstanding: AddressBook<SocketAddr, Outstanding>,
    last_sent: AddressBook<SocketAddr, LocalTime>,
}

impl PingManager {
    pub fn new() -> Self {
        Self {
            outstanding: AddressBook::new(),
            last_sent: AddressBook::new(),
        }
    }

    /// Peers for which a new ping is due, given `now`.
    pub fn due(&self, peers: impl Iterator<Item = SocketAddr>, now: LocalTime) -> Vec<SocketAddr> {
        peers
            .filter(|addr| {
                self.outstanding.get(addr).is_none()
                    && match self.last_sent.get(addr) {
                        Some(t) => now.as_secs().saturating_sub(t.as_secs()) >= PING_INTERVAL_SEC,
                        None => true,
                    }
            })
            .collect()
    }

    pub fn sent(&mut self, peer: SocketAddr, nonce: u64, now: LocalTime) {
        self.last_sent.insert(peer, now);
        self.outstanding.insert(peer, Outstanding { nonce, sent_at: now });
    }

    /// Resolve a `pong`, returning the round-trip latency if the nonce matches.
    pub fn received_pong(&mut self, peer: SocketAddr, nonce: u64, now: LocalTime) -> Option<LocalDuration> {
        let outstanding = self.outstanding.get(&peer)?;
        if outstanding.nonce != nonce {
            return None;
        }
        let latency = now.diff(outstanding.sent_at);
        self.outstanding.remove(&peer);
        Some(latency)
    }

    /// Peers whose outstanding ping has overrun [`PING_TIMEOUT_SEC`].
    pub fn timed_out(&self, now: LocalTime) -> Vec<SocketAddr> {
        self.outstanding
            .iter()
            .filter(|(_, o)| now.as_secs().saturating_sub(o.sent_at.as_secs()) >= PING_TIMEOUT_SEC)
            .map(|(addr, _)| *addr)
            .collect()
    }

    pub fn forget(&mut self, peer: &SocketAddr) {
        self.outstanding.remove(peer);
        self.last_sent.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_is_due_immediately_for_new_peer() {
        let mgr = PingManager::new();
        let now = LocalTime::from_secs(1000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        assert_eq!(mgr.due(std::iter::once(addr), now), vec![addr]);
    }

    #[test]
    fn ping_not_due_again_until_interval_elapses() {
        let mut mgr = PingManager::new();
        let now = LocalTime::from_secs(1000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.sent(addr, 7, now);
        mgr.received_pong(addr, 7, now);
        assert!(mgr.due(std::iter::once(addr), now).is_empty());
        let later = LocalTime::from_secs(now.as_secs() + PING_INTERVAL_SEC + 1);
        assert_eq!(mgr.due(std::iter::once(addr), later), vec![addr]);
    }

    #[test]
    fn mismatched_nonce_is_ignored() {
        let mut mgr = PingManager::new();
        let now = LocalTime::from_secs(1000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.sent(addr, 7, now);
        assert!(mgr.received_pong(addr, 8, now).is_none());
    }

    #[test]
    fn ping_times_out() {
        let mut mgr = PingManager::new();
        let now = LocalTime::from_secs(1000);
        let addr: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        mgr.sent(addr, 7, now);
        let later = LocalTime::from_secs(now.as_secs() + PING_TIMEOUT_SEC + 1);
        assert_eq!(mgr.timed_out(later), vec![addr]);
    }
}
