//! Per-connection peer record and handshake state machine.
use std::net::SocketAddr;

use crate::net::{Link, LocalTime};

/// Handshake timeout: a peer that hasn't completed VERSION/VERACK within this
/// window is dropped.
pub const VERSION_HANDSHAKE_TIMEOUT_SEC: u64 = 60;
/// Keepalive interval between pings sent to a `READY` peer.
pub const PING_INTERVAL_SEC: u64 = 120;
/// A peer that hasn't answered a ping within this window is dropped.
pub const PING_TIMEOUT_SEC: u64 = 1200;
/// A peer that hasn't sent any bytes within this window is dropped.
pub const INACTIVITY_TIMEOUT_SEC: u64 = 1200;
/// Hard lifetime cap for feeler connections, regardless of handshake outcome.
pub const FEELER_MAX_LIFETIME_SEC: u64 = 120;

/// Connection lifecycle state, mirroring the handshake contract in the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    VersionSent,
    VerackReceived,
    Ready,
    Disconnecting,
    Disconnected,
}

/// A single peer connection and everything needed to drive its handshake,
/// keepalive, and framing.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Monotonic identifier, assigned once at connection time. Stable for the
    /// life of the connection, unlike the socket address (a peer can reconnect
    /// from the same address and get a new id).
    pub id: u64,
    pub addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub link: Link,
    pub state: PeerState,
    pub is_feeler: bool,
    pub is_manual: bool,
    pub local_nonce: u64,
    pub remote_nonce: Option<u64>,
    pub remote_version: Option<i32>,
    pub remote_user_agent: String,
    pub remote_start_height: i32,
    pub remote_services: u64,
    pub connected_at: LocalTime,
    pub last_send: LocalTime,
    pub last_recv: LocalTime,
    pub last_ping_nonce: Option<u64>,
    pub last_ping_sent_at: Option<LocalTime>,
    pub ping_ms: Option<u64>,
    pub successfully_connected: bool,
    pub has_sent_getaddr: bool,
}

impl Peer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        addr: SocketAddr,
        local_addr: SocketAddr,
        link: Link,
        local_nonce: u64,
        now: LocalTime,
        is_feeler: bool,
    ) -> Self {
        Self {
            id,
            addr,
            local_addr,
            link,
            state: PeerState::Connected,
            is_feeler,
            is_manual: false,
            local_nonce,
            remote_nonce: None,
            remote_version: None,
            remote_user_agent: String::new(),
            remote_start_height: 0,
            remote_services: 0,
            connected_at: now,
            last_send: now,
            last_recv: now,
            last_ping_nonce: None,
            last_ping_sent_at: None,
            ping_ms: None,
            successfully_connected: false,
            has_sent_getaddr: false,
        }
    }

    pub fn is_outbound(&self) -> bool {
        self.link.is_outbound()
    }

    pub fn is_inbound(&self) -> bool {
        self.link.is_inbound()
    }

    /// Called once we've sent our own `version`.
    pub fn version_sent(&mut self) {
        self.state = PeerState::VersionSent;
    }

    /// Called when the peer's `version` message has been accepted.
    pub fn version_received(&mut self, nonce: u64, version: i32, services: u64, user_agent: String, start_height: i32) {
        self.remote_nonce = Some(nonce);
        self.remote_version = Some(version);
        self.remote_services = services;
        self.remote_user_agent = user_agent;
        self.remote_start_height = start_height;
        if self.state == PeerState::Connected {
            self.state = PeerState::VersionSent;
        }
    }

    /// Called when `verack` arrives from the peer.
    pub fn verack_received(&mut self) {
        self.state = PeerState::VerackReceived;
    }

    /// Promote to `Ready` once both sides have completed the handshake.
    pub fn mark_ready(&mut self) {
        self.state = PeerState::Ready;
        self.successfully_connected = true;
    }

    pub fn is_ready(&self) -> bool {
        self.state == PeerState::Ready
    }

    pub fn mark_disconnecting(&mut self) {
        self.state = PeerState::Disconnecting;
    }

    pub fn touch_recv(&mut self, now: LocalTime) {
        self.last_recv = now;
    }

    pub fn touch_send(&mut self, now: LocalTime) {
        self.last_send = now;
    }

    /// Whether the handshake has overrun [`VERSION_HANDSHAKE_TIMEOUT_SEC`].
    pub fn handshake_timed_out(&self, now: LocalTime) -> bool {
        !self.successfully_connected
            && now.as_secs().saturating_sub(self.connected_at.as_secs())
                >= VERSION_HANDSHAKE_TIMEOUT_SEC
    }

    pub fn inactivity_timed_out(&self, now: LocalTime) -> bool {
        now.as_secs().saturating_sub(self.last_recv.as_secs()) >= INACTIVITY_TIMEOUT_SEC
    }

    pub fn ping_timed_out(&self, now: LocalTime) -> bool {
        match self.last_ping_sent_at {
            Some(sent) if self.last_ping_nonce.is_some() => {
                now.as_secs().saturating_sub(sent.as_secs()) >= PING_TIMEOUT_SEC
            }
            _ => false,
        }
    }

    pub fn feeler_expired(&self, now: LocalTime) -> bool {
        self.is_feeler
            && now.as_secs().saturating_sub(self.connected_at.as_secs()) >= FEELER_MAX_LIFETIME_SEC
    }
}
