//! Peer-to-peer networking core for a headers-only node.
#![allow(clippy::type_complexity)]
pub mod client;
pub mod common;
pub mod fsm;
pub mod net;
pub mod wire;
