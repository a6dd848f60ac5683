//! Network selection and service bits.
use std::fmt;

use crate::wire::{MAGIC_MAINNET, MAGIC_REGTEST, MAGIC_TESTNET, NODE_NETWORK, NODE_NONE};

/// Which network this node is configured to speak on. Determines the wire magic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn magic(self) -> u32 {
        match self {
            Network::Mainnet => MAGIC_MAINNET,
            Network::Testnet => MAGIC_TESTNET,
            Network::Regtest => MAGIC_REGTEST,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regtest => write!(f, "regtest"),
        }
    }
}

/// Service bits we advertise. No compact filters, no transaction relay: this
/// node only ever claims to be a plain full network node, or nothing at all.
#[derive(Debug, Copy, Clone, Default)]
pub enum Services {
    #[default]
    Network,
    None,
}

impl From<Services> for u64 {
    fn from(value: Services) -> Self {
        match value {
            Services::Network => NODE_NETWORK,
            Services::None => NODE_NONE,
        }
    }
}

pub fn has_service(services: u64, flag: u64) -> bool {
    services & flag == flag
}
