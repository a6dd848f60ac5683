//! Self-contained wire protocol: framing, checksums, and message encoding.
pub mod address;
pub mod header;
pub mod message;
mod varint;

pub use address::{NetworkAddress, TimestampedAddress};
pub use header::{Header, HEADER_LEN};
pub use message::{GetHeadersMessage, InventoryVector, Message, VersionMessage};

use thiserror::Error;

/// Current protocol version advertised in `version` messages.
pub const PROTOCOL_VERSION: u32 = 70016;
/// Minimum protocol version this implementation will speak to.
pub const MIN_PEER_PROTO_VERSION: u32 = 70001;

/// Network magic values, sent little-endian on the wire.
pub const MAGIC_MAINNET: u32 = 0xC0C0_C0C0;
pub const MAGIC_TESTNET: u32 = 0xC0C0_C0C1;
pub const MAGIC_REGTEST: u32 = 0xC0C0_C0C2;

/// Service bits.
pub const NODE_NONE: u64 = 0;
pub const NODE_NETWORK: u64 = 1;

/// Inventory type for a block.
pub const MSG_BLOCK: u32 = 2;

/// Size caps, enforced before allocating.
pub const MAX_MESSAGE_SIZE: u32 = 32 * 1024 * 1024;
pub const MAX_INV_SIZE: usize = 50_000;
pub const MAX_HEADERS_SIZE: usize = 2_000;
pub const MAX_ADDR_SIZE: usize = 1_000;
pub const MAX_SUBVERSION_LENGTH: usize = 256;

pub const CMD_VERSION: &str = "version";
pub const CMD_VERACK: &str = "verack";
pub const CMD_ADDR: &str = "addr";
pub const CMD_GETADDR: &str = "getaddr";
pub const CMD_INV: &str = "inv";
pub const CMD_GETDATA: &str = "getdata";
pub const CMD_NOTFOUND: &str = "notfound";
pub const CMD_GETHEADERS: &str = "getheaders";
pub const CMD_HEADERS: &str = "headers";
pub const CMD_SENDHEADERS: &str = "sendheaders";
pub const CMD_PING: &str = "ping";
pub const CMD_PONG: &str = "pong";

/// Errors raised by the codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("input too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("message magic {0:#x} does not match configured network")]
    BadMagic(u32),
    #[error("declared message length {0} exceeds the maximum of {MAX_MESSAGE_SIZE}")]
    OversizedMessage(u32),
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("command {0:?} is not null-terminated correctly")]
    BadCommand(Vec<u8>),
    #[error("declared count {got} exceeds the cap of {max} for this message")]
    OversizedCount { got: usize, max: usize },
    #[error("string exceeds the maximum length of {max} bytes (got {got})")]
    OversizedString { got: usize, max: usize },
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("varint encodes a non-canonical value")]
    NonCanonicalVarint,
}

pub type Result<T> = std::result::Result<T, Error>;
