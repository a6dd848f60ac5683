//! Protocol output capabilities.
//!
//! See [`Outbox`] type.
//!
//! Each sub-protocol, eg. the "ping" or "handshake" protocols are given a copy of this outbox
//! with specific capabilities, eg. peer disconnection, message sending etc. to
//! communicate with the network.
use std::sync::{Arc, Mutex};
use std::{collections::VecDeque, net};
use tracing::debug;

use crate::{
    common::network::Network,
    fsm::event::Event,
    fsm::handler::{DisconnectReason, PeerId},
    net::LocalDuration,
    wire::{Header, InventoryVector, Message, VersionMessage, HEADER_LEN},
};

/// Output of a state transition of the `Protocol` state machine. Bytes, not
/// a typed message: framing and decoding happen in the state machine.
pub type Io = crate::net::Io<Vec<u8>, Event, DisconnectReason>;

impl From<Event> for Io {
    fn from(event: Event) -> Self {
        Io::Event(event)
    }
}

/// Ability to connect to peers.
pub trait Connect {
    /// Connect to peer.
    fn connect(&self, addr: net::SocketAddr, timeout: LocalDuration);
}

/// Ability to disconnect from peers.
pub trait Disconnect {
    /// Disconnect from peer.
    fn disconnect(&self, addr: net::SocketAddr, reason: DisconnectReason);
}

/// The ability to set a timer.
pub trait SetTimer {
    /// Ask to be woken up in a predefined amount of time.
    fn set_timer(&self, duration: LocalDuration) -> &Self;
}

/// The wire protocol, as seen from the perspective of something that wants to
/// send messages without knowing how the transport queues them up.
pub trait Wire<E> {
    /// Emit an event.
    fn event(&self, event: E);

    // Handshake messages //////////////////////////////////////////////////////

    /// Send a `version` message.
    fn version(&mut self, addr: PeerId, msg: VersionMessage);

    /// Send a `verack` message.
    fn verack(&mut self, addr: PeerId) -> &mut Self;

    /// Send a `sendheaders` message.
    fn send_headers(&mut self, addr: PeerId) -> &mut Self;

    // Ping/pong ///////////////////////////////////////////////////////////////

    /// Send a `ping` message.
    fn ping(&mut self, addr: PeerId, nonce: u64) -> &Self;

    /// Send a `pong` message.
    fn pong(&mut self, addr: PeerId, nonce: u64) -> &Self;

    // Addresses //////////////////////////////////////////////////////////////

    /// Send a `getaddr` message.
    fn get_addr(&mut self, addr: PeerId);

    /// Send an `addr` message.
    fn addr(&mut self, addr: PeerId, addrs: Vec<crate::wire::TimestampedAddress>);

    // Headers /////////////////////////////////////////////////////////////////

    /// Send a `getheaders` message.
    fn get_headers(&mut self, addr: PeerId, locator_hashes: Vec<[u8; 32]>, hash_stop: [u8; 32]);

    /// Send a `headers` message.
    fn headers(&mut self, addr: PeerId, headers: Vec<crate::wire::BlockHeaderWire>);

    // Inventory ///////////////////////////////////////////////////////////////

    /// Send an `inv` message.
    fn inv(&mut self, addr: PeerId, inventory: Vec<InventoryVector>);

    /// Send a `getdata` message.
    fn get_data(&mut self, addr: PeerId, inventory: Vec<InventoryVector>);

    /// Send a `notfound` message.
    fn not_found(&mut self, addr: PeerId, inventory: Vec<InventoryVector>);
}

/// Holds protocol outputs and pending I/O.
#[derive(Debug, Clone)]
pub struct Outbox {
    network: Network,
    pub outbound: Arc<Mutex<VecDeque<Io>>>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(Network::Mainnet)
    }
}

impl Iterator for Outbox {
    type Item = Io;

    fn next(&mut self) -> Option<Io> {
        self.outbound.lock().unwrap().pop_front()
    }
}

impl Outbox {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            outbound: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Push an output to the channel.
    pub fn push(&self, output: Io) {
        self.outbound.lock().unwrap().push_back(output);
    }

    /// Encode and push a message to the channel.
    pub fn message(&mut self, addr: PeerId, payload: Message) -> &Self {
        debug!(target: "p2p", "Sending {} to {}", payload.command(), addr);

        let body = payload.encode();
        let header = Header::for_payload(self.network.magic(), payload.command(), &body);

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&body);

        self.push(Io::Write(addr, frame));
        self
    }

    /// Push an event to the channel.
    pub fn event(&self, event: Event) {
        self.push(Io::Event(event));
    }
}

impl Disconnect for Outbox {
    fn disconnect(&self, addr: net::SocketAddr, reason: DisconnectReason) {
        debug!(target: "p2p", "Disconnecting from {}: {}", addr, reason);

        self.push(Io::Disconnect(addr, reason));
    }
}

impl SetTimer for Outbox {
    fn set_timer(&self, duration: LocalDuration) -> &Self {
        self.push(Io::SetTimer(duration));
        self
    }
}

impl Connect for Outbox {
    fn connect(&self, addr: net::SocketAddr, timeout: LocalDuration) {
        self.push(Io::Connect(addr));
        self.push(Io::SetTimer(timeout));
    }
}

impl<E: Into<Event> + std::fmt::Display> Wire<E> for Outbox {
    fn event(&self, event: E) {
        debug!(target: "p2p", "{}", &event);
        self.event(event.into());
    }

    fn version(&mut self, addr: PeerId, msg: VersionMessage) {
        self.message(addr, Message::Version(msg));
    }

    fn verack(&mut self, addr: PeerId) -> &mut Self {
        self.message(addr, Message::Verack);
        self
    }

    fn send_headers(&mut self, addr: PeerId) -> &mut Self {
        self.message(addr, Message::SendHeaders);
        self
    }

    fn ping(&mut self, addr: PeerId, nonce: u64) -> &Self {
        self.message(addr, Message::Ping(nonce));
        self
    }

    fn pong(&mut self, addr: PeerId, nonce: u64) -> &Self {
        self.message(addr, Message::Pong(nonce));
        self
    }

    fn get_addr(&mut self, addr: PeerId) {
        self.message(addr, Message::GetAddr);
    }

    fn addr(&mut self, addr: PeerId, addrs: Vec<crate::wire::TimestampedAddress>) {
        self.message(addr, Message::Addr(addrs));
    }

    fn get_headers(&mut self, addr: PeerId, locator_hashes: Vec<[u8; 32]>, hash_stop: [u8; 32]) {
        self.message(
            addr,
            Message::GetHeaders(crate::wire::GetHeadersMessage {
                version: crate::wire::PROTOCOL_VERSION,
                locator_hashes,
                hash_stop,
            }),
        );
    }

    fn headers(&mut self, addr: PeerId, headers: Vec<crate::wire::BlockHeaderWire>) {
        self.message(addr, Message::Headers(headers));
    }

    fn inv(&mut self, addr: PeerId, inventory: Vec<InventoryVector>) {
        self.message(addr, Message::Inv(inventory));
    }

    fn get_data(&mut self, addr: PeerId, inventory: Vec<InventoryVector>) {
        self.message(addr, Message::GetData(inventory));
    }

    fn not_found(&mut self, addr: PeerId, inventory: Vec<InventoryVector>) {
        self.message(addr, Message::NotFound(inventory));
    }
}
