//! Initial address-book bootstrap: fixed seeds and, optionally, DNS seeds.
//!
//! Run once at startup when the address store comes up empty (a first run,
//! or a corrupt/missing `peers.json`), so the node has somewhere to dial
//! before it has learned anything from peers of its own.
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

use crate::common::network::Network;
use crate::fsm::discovery::{default_port, dns_seeds, fixed_seeds, AddressManager, Source};
use crate::net::LocalTime;

/// Bootstrap the address book if it's empty. Fixed seeds are inserted
/// unconditionally; DNS seeds only if `dns_seeds_enabled`. DNS failures are
/// logged and otherwise ignored: a node with no seeds yet just waits for the
/// periodic outbound filler to try again.
pub async fn bootstrap(addrmgr: &mut AddressManager, network: Network, dns_seeds_enabled: bool, now: LocalTime) {
    if !addrmgr.is_empty() {
        return;
    }

    let port = default_port(network);
    for seed in fixed_seeds(network) {
        match seed.parse() {
            Ok(addr) => {
                addrmgr.insert(addr, 0, Source::FixedSeed, 0, now);
            }
            Err(err) => tracing::warn!(%err, seed, "invalid fixed seed address"),
        }
    }

    if !dns_seeds_enabled {
        return;
    }
    let hostnames = dns_seeds(network);
    if hostnames.is_empty() {
        return;
    }

    let resolver = match TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()) {
        Ok(resolver) => resolver,
        Err(err) => {
            tracing::warn!(%err, "failed to build DNS resolver for seed bootstrap");
            return;
        }
    };
    for host in hostnames {
        match resolver.lookup_ip(*host).await {
            Ok(response) => {
                let resolved = response.iter().map(|ip| (std::net::SocketAddr::new(ip, port), 0u64, 0u32));
                let accepted = addrmgr.insert_many(resolved, Source::Dns, now);
                tracing::debug!(seed = host, accepted, "resolved DNS seed");
            }
            Err(err) => tracing::warn!(%err, seed = host, "failed to resolve DNS seed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_is_a_no_op_when_not_empty() {
        let mut mgr = AddressManager::new(None, false, fastrand::Rng::new());
        let now = LocalTime::from_secs(1_700_000_000);
        let addr = "1.2.3.4:9590".parse().unwrap();
        mgr.insert(addr, 0, Source::Peer, now.as_secs(), now);

        bootstrap(&mut mgr, Network::Mainnet, true, now).await;
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn bootstrap_on_empty_store_does_not_panic_with_no_seeds() {
        let mut mgr = AddressManager::new(None, false, fastrand::Rng::new());
        let now = LocalTime::from_secs(1_700_000_000);
        bootstrap(&mut mgr, Network::Mainnet, true, now).await;
        assert!(mgr.is_empty());
    }
}
