//! The p2p client: wires the protocol state machine to a reactor and hands
//! callers a [`handle::Handle`] to talk to it.
#![allow(clippy::inconsistent_struct_constructor)]
#![allow(clippy::type_complexity)]
mod boot_nodes;
pub mod config;
mod controller;
pub mod error;
pub mod handle;

pub use controller::*;
