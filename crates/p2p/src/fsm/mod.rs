//! The peer-to-peer protocol state machine and its sub-protocols.
#![allow(clippy::type_complexity)]
pub mod anchors;
pub mod banmgr;
pub mod discovery;
pub mod event;
pub mod handler;
pub mod misbehavior;
pub mod output;
pub mod peer;
pub mod peermgr;
pub mod pingmgr;
pub mod router;

pub use handler::{Command, Config, DisconnectReason, Peer, PeerId, StateMachine, Whitelist};
