//! Scoring of protocol violations committed by peers.
//!
//! Each violation adds a fixed penalty to a peer's running score. Once the
//! score crosses [`DISCOURAGEMENT_THRESHOLD`] the peer is latched as
//! discouraged; discouraged peers are swept and disconnected by the
//! lifecycle manager rather than dropped the instant the threshold trips.

use std::collections::HashMap;
use std::net::SocketAddr;

/// Maximum number of `GETHEADERS` responses a peer may send that don't
/// connect to any block we know about before we consider it misbehaving.
pub const MAX_UNCONNECTING_HEADERS: u32 = 10;

/// Score at which a peer is latched as discouraged.
pub const DISCOURAGEMENT_THRESHOLD: u32 = 100;

/// How many recently-seen invalid header hashes we remember per peer, to
/// avoid scoring the same bad header twice.
const INVALID_HASH_CACHE_SIZE: usize = 256;

/// A single scored violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A header failed proof-of-work.
    InvalidProofOfWork,
    /// A header failed context-free validation (bad version, bad timestamp, etc).
    InvalidHeader,
    /// Too many `headers` messages in a row didn't connect to known history.
    TooManyUnconnectingHeaders,
    /// Too many orphan headers accumulated without resolving.
    TooManyOrphans,
    /// A message exceeded the maximum allowed size.
    OversizedMessage,
    /// A `headers` message contained a non-continuous chain.
    NonContinuousHeaders,
    /// A `headers` message had less work than expected for its length.
    LowWorkHeaders,
}

impl Violation {
    pub fn penalty(self) -> u32 {
        match self {
            Violation::InvalidProofOfWork => 100,
            Violation::InvalidHeader => 100,
            Violation::TooManyUnconnectingHeaders => 100,
            Violation::TooManyOrphans => 100,
            Violation::OversizedMessage => 20,
            Violation::NonContinuousHeaders => 20,
            Violation::LowWorkHeaders => 10,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Violation::InvalidProofOfWork => "invalid-pow",
            Violation::InvalidHeader => "invalid-header",
            Violation::TooManyUnconnectingHeaders => "too-many-unconnecting-headers",
            Violation::TooManyOrphans => "too-many-orphans",
            Violation::OversizedMessage => "oversized-message",
            Violation::NonContinuousHeaders => "non-continuous-headers",
            Violation::LowWorkHeaders => "low-work-headers",
        }
    }
}

/// Per-peer bookkeeping: running score, the recent invalid-hash guard, and
/// the unconnecting-headers streak.
#[derive(Debug, Default)]
struct PeerRecord {
    score: u32,
    discouraged: bool,
    unconnecting_streak: u32,
    recent_invalid: Vec<[u8; 32]>,
}

impl PeerRecord {
    fn remember_invalid(&mut self, hash: [u8; 32]) -> bool {
        if self.recent_invalid.contains(&hash) {
            return false;
        }
        if self.recent_invalid.len() >= INVALID_HASH_CACHE_SIZE {
            self.recent_invalid.remove(0);
        }
        self.recent_invalid.push(hash);
        true
    }
}

/// Tracks misbehavior scores for every currently-known peer.
#[derive(Debug, Default)]
pub struct MisbehaviorTracker {
    peers: HashMap<SocketAddr, PeerRecord>,
}

impl MisbehaviorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score an invalid-header violation, deduplicated by block hash so a
    /// peer can't be scored repeatedly for relaying the same bad header.
    pub fn invalid_header(&mut self, peer: SocketAddr, hash: [u8; 32]) -> Option<(Violation, u32)> {
        let record = self.peers.entry(peer).or_default();
        if !record.remember_invalid(hash) {
            return None;
        }
        Some(self.score(peer, Violation::InvalidHeader))
    }

    /// Record an unconnecting `headers` reply; returns the violation once
    /// the streak crosses [`MAX_UNCONNECTING_HEADERS`].
    pub fn unconnecting_headers(&mut self, peer: SocketAddr) -> Option<(Violation, u32)> {
        let record = self.peers.entry(peer).or_default();
        record.unconnecting_streak += 1;
        if record.unconnecting_streak > MAX_UNCONNECTING_HEADERS {
            record.unconnecting_streak = 0;
            drop(record);
            return Some(self.score(peer, Violation::TooManyUnconnectingHeaders));
        }
        None
    }

    /// Reset the unconnecting-headers streak, e.g. after a `headers` reply
    /// that does connect.
    pub fn connecting_headers(&mut self, peer: SocketAddr) {
        if let Some(record) = self.peers.get_mut(&peer) {
            record.unconnecting_streak = 0;
        }
    }

    /// Score a violation directly, returning the violation and the peer's
    /// score after applying the penalty.
    pub fn score(&mut self, peer: SocketAddr, violation: Violation) -> (Violation, u32) {
        let record = self.peers.entry(peer).or_default();
        record.score = record.score.saturating_add(violation.penalty());
        if record.score >= DISCOURAGEMENT_THRESHOLD {
            record.discouraged = true;
        }
        (violation, record.score)
    }

    pub fn is_discouraged(&self, peer: &SocketAddr) -> bool {
        self.peers.get(peer).is_some_and(|r| r.discouraged)
    }

    /// Peers currently latched as discouraged.
    pub fn discouraged_peers(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.peers
            .iter()
            .filter(|(_, r)| r.discouraged)
            .map(|(addr, _)| *addr)
    }

    pub fn forget(&mut self, peer: &SocketAddr) {
        self.peers.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_header_latches_discouragement_at_threshold() {
        let mut tracker = MisbehaviorTracker::new();
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        let (_, score) = tracker.score(peer, Violation::InvalidHeader);
        assert_eq!(score, 100);
        assert!(tracker.is_discouraged(&peer));
    }

    #[test]
    fn duplicate_invalid_hash_is_scored_once() {
        let mut tracker = MisbehaviorTracker::new();
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        let hash = [7u8; 32];
        assert!(tracker.invalid_header(peer, hash).is_some());
        assert!(tracker.invalid_header(peer, hash).is_none());
    }

    #[test]
    fn unconnecting_streak_trips_after_threshold() {
        let mut tracker = MisbehaviorTracker::new();
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        for _ in 0..MAX_UNCONNECTING_HEADERS {
            assert!(tracker.unconnecting_headers(peer).is_none());
        }
        assert!(tracker.unconnecting_headers(peer).is_some());
    }

    #[test]
    fn connecting_headers_resets_streak() {
        let mut tracker = MisbehaviorTracker::new();
        let peer: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        tracker.unconnecting_headers(peer);
        tracker.connecting_headers(peer);
        for _ in 0..MAX_UNCONNECTING_HEADERS {
            assert!(tracker.unconnecting_headers(peer).is_none());
        }
    }
}
