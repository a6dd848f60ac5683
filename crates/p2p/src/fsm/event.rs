//! State machine events.
use std::net::SocketAddr;
use std::sync::Arc;

use crate::net::LocalTime;
use crate::wire::Message;

use crate::fsm::{
    banmgr::BanReason, discovery::Event as AddressEvent, misbehavior::Violation, peermgr::Event as PeerEvent,
    pingmgr::Event as PingEvent, router::Event as RouterEvent,
};

/// A peer-to-peer event.
#[derive(Debug, Clone)]
pub enum Event {
    /// The node is initializing its state machine and about to start network activity.
    Initializing,
    /// The node is initialized and ready to receive commands.
    Ready {
        /// Block header height, as known at startup.
        height: u64,
        /// Local time.
        time: LocalTime,
    },
    /// Received a message from a peer.
    Received(SocketAddr, Message),
    /// An address manager event.
    Address(AddressEvent),
    /// A peer lifecycle event.
    Peer(PeerEvent),
    /// A message routing event.
    Router(RouterEvent),
    /// A ping manager event.
    Ping(PingEvent),
    /// A peer committed a scored protocol violation.
    Misbehavior {
        peer: SocketAddr,
        violation: Violation,
        score: u32,
    },
    /// A peer's score crossed the discouragement threshold.
    Discouraged { peer: SocketAddr },
    /// A peer was banned outright.
    Banned { peer: SocketAddr, reason: BanReason },
    Error(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Initializing => write!(f, "initializing"),
            Event::Ready { height, .. } => write!(f, "ready at height {}", height),
            Event::Received(addr, msg) => write!(f, "received {} from {}", msg.command(), addr),
            Event::Address(e) => write!(f, "{}", e),
            Event::Peer(e) => write!(f, "{}", e),
            Event::Router(e) => write!(f, "{}", e),
            Event::Ping(e) => write!(f, "{}", e),
            Event::Misbehavior { peer, violation, score } => {
                write!(f, "peer {} scored {} ({}), now at {}", peer, violation.reason(), violation.penalty(), score)
            }
            Event::Discouraged { peer } => write!(f, "peer {} discouraged", peer),
            Event::Banned { peer, reason } => write!(f, "peer {} banned: {}", peer, reason),
            Event::Error(e) => write!(f, "error: {}", e),
        }
    }
}

impl From<PeerEvent> for Event {
    fn from(e: PeerEvent) -> Self {
        Self::Peer(e)
    }
}

impl From<AddressEvent> for Event {
    fn from(e: AddressEvent) -> Self {
        Self::Address(e)
    }
}

impl From<RouterEvent> for Event {
    fn from(e: RouterEvent) -> Self {
        Self::Router(e)
    }
}

impl From<PingEvent> for Event {
    fn from(e: PingEvent) -> Self {
        Self::Ping(e)
    }
}
