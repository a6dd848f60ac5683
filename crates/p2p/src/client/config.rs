//! Runtime configuration: loaded from an optional TOML file plus `P2P_`-prefixed
//! environment overrides, validated into the strongly-typed [`P2PConfig`] the
//! client is built from.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::common::network::Network;
use crate::fsm::handler::{Limits, USER_AGENT};
use crate::net::LocalDuration;

/// A missing or invalid required configuration value.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required config value: {0}")]
    Missing(&'static str),
    #[error("invalid value for `{0}`: {1}")]
    Invalid(&'static str, String),
    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// As deserialized straight off the wire (file + env), before validation.
/// Every field is optional here; [`RawP2PConfig::validate`] applies defaults
/// and rejects the combinations that have none.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RawP2PConfig {
    pub network_magic: Option<String>,
    pub listen_port: Option<u16>,
    pub listen_enabled: Option<bool>,
    pub io_threads: Option<usize>,
    pub datadir: Option<PathBuf>,
    pub connect: Option<Vec<String>>,
    pub connect_interval_secs: Option<u64>,
    pub maintenance_interval_secs: Option<u64>,
    pub max_outbound_peers: Option<usize>,
    pub max_inbound_peers: Option<usize>,
    pub target_outbound_peers: Option<usize>,
    pub dns_seeds_enabled: Option<bool>,
    pub user_agent: Option<String>,
}

impl RawP2PConfig {
    /// Load from an optional TOML file plus `P2P_`-prefixed environment
    /// overrides (e.g. `P2P_LISTEN_PORT=8333`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("P2P").separator("_"));

        let raw: Self = builder.build()?.try_deserialize()?;
        Ok(raw)
    }

    /// Validate and apply defaults, producing the config the client is run with.
    pub fn validate(self) -> Result<P2PConfig, ConfigError> {
        let network = match self.network_magic.as_deref() {
            Some("mainnet") => Network::Mainnet,
            Some("testnet") => Network::Testnet,
            Some("regtest") => Network::Regtest,
            Some(other) => return Err(ConfigError::Invalid("network_magic", other.to_string())),
            None => return Err(ConfigError::Missing("network_magic")),
        };
        let listen_port = self.listen_port.ok_or(ConfigError::Missing("listen_port"))?;

        let connect = self
            .connect
            .unwrap_or_default()
            .iter()
            .map(|s| {
                s.parse::<SocketAddr>()
                    .map_err(|_| ConfigError::Invalid("connect", s.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(P2PConfig {
            network,
            listen: SocketAddr::new([0, 0, 0, 0].into(), listen_port),
            listen_enabled: self.listen_enabled.unwrap_or(true),
            io_threads: self.io_threads.unwrap_or(4),
            datadir: self.datadir,
            connect,
            connect_interval: LocalDuration::from_secs(self.connect_interval_secs.unwrap_or(5)),
            maintenance_interval: LocalDuration::from_secs(self.maintenance_interval_secs.unwrap_or(30)),
            limits: Limits {
                max_outbound_peers: self.max_outbound_peers.unwrap_or(8),
                max_inbound_peers: self.max_inbound_peers.unwrap_or(125),
            },
            target_outbound_peers: self.target_outbound_peers.unwrap_or(8),
            dns_seeds_enabled: self.dns_seeds_enabled.unwrap_or(true),
            user_agent: self.user_agent.map(|s| Box::leak(s.into_boxed_str()) as &'static str).unwrap_or(USER_AGENT),
        })
    }
}

/// Validated p2p client configuration.
#[derive(Debug, Clone)]
pub struct P2PConfig {
    pub network: Network,
    pub listen: SocketAddr,
    pub listen_enabled: bool,
    pub io_threads: usize,
    pub datadir: Option<PathBuf>,
    pub connect: Vec<SocketAddr>,
    pub connect_interval: LocalDuration,
    pub maintenance_interval: LocalDuration,
    pub limits: Limits,
    pub target_outbound_peers: usize,
    pub dns_seeds_enabled: bool,
    pub user_agent: &'static str,
}

impl Default for P2PConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            listen: SocketAddr::new([0, 0, 0, 0].into(), 0),
            listen_enabled: true,
            io_threads: 4,
            datadir: None,
            connect: Vec::new(),
            connect_interval: LocalDuration::from_secs(5),
            maintenance_interval: LocalDuration::from_secs(30),
            limits: Limits::default(),
            target_outbound_peers: 8,
            dns_seeds_enabled: true,
            user_agent: USER_AGENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_network_magic_fails_fast() {
        let raw = RawP2PConfig {
            listen_port: Some(9590),
            ..Default::default()
        };
        assert!(matches!(raw.validate(), Err(ConfigError::Missing("network_magic"))));
    }

    #[test]
    fn missing_listen_port_fails_fast() {
        let raw = RawP2PConfig {
            network_magic: Some("mainnet".to_string()),
            ..Default::default()
        };
        assert!(matches!(raw.validate(), Err(ConfigError::Missing("listen_port"))));
    }

    #[test]
    fn defaults_fill_in_the_rest() {
        let raw = RawP2PConfig {
            network_magic: Some("testnet".to_string()),
            listen_port: Some(18333),
            ..Default::default()
        };
        let cfg = raw.validate().unwrap();
        assert_eq!(cfg.network, Network::Testnet);
        assert_eq!(cfg.limits.max_outbound_peers, 8);
        assert_eq!(cfg.limits.max_inbound_peers, 125);
        assert!(cfg.dns_seeds_enabled);
    }
}
