//! Wires the protocol state machine to a reactor, starts it, and hands back
//! a [`handle::Handle`] for the rest of the application to talk to it with.
use std::net::SocketAddr;
use std::time::SystemTime;
use std::{net, time};

use async_trait::async_trait;
use flume as chan;
use tokio_util::sync::CancellationToken;

pub use crate::client::config::P2PConfig;
use crate::client::{boot_nodes, error::Error, handle};
use crate::common::time::{AdjustedTime, RefClock};
use crate::fsm::banmgr::BanEntry;
use crate::fsm::handler;
use crate::fsm::handler::{Command, Peer, PeerId, StateMachine};
use crate::net::{NetReactor, NetWaker};
use crate::wire::Message;

/// Runs a pre-loaded client.
pub struct P2PClient<R: NetReactor> {
    handle: Handle<R::Waker>,
    service: StateMachine<RefClock<AdjustedTime<SocketAddr>>>,
    listen: SocketAddr,
    commands: chan::Receiver<Command>,
    reactor: R,
}

impl<R: NetReactor> P2PClient<R> {
    /// Create a new client from a validated configuration.
    pub async fn new(config: P2PConfig) -> Result<Self, Error> {
        let (commands_tx, commands_rx) = chan::unbounded::<Command>();

        let (listening_send, listening) = chan::bounded(1);
        let reactor = <R as NetReactor>::new(listening_send)?;

        let local_time = SystemTime::now().into();
        let clock = RefClock::from(AdjustedTime::<SocketAddr>::new(local_time));
        let rng = fastrand::Rng::new();

        let mut service = StateMachine::new(
            clock,
            rng,
            handler::Config {
                network: config.network,
                connect: config.connect.clone(),
                services: crate::wire::NODE_NETWORK,
                required_services: crate::wire::NODE_NETWORK,
                whitelist: handler::Whitelist::default(),
                user_agent: config.user_agent,
                limits: config.limits.clone(),
                datadir: config.datadir.clone(),
                addr_book_checksum: true,
                maintenance_interval: config.maintenance_interval,
            },
        );

        boot_nodes::bootstrap(
            service.addrmgr_mut(),
            config.network,
            config.dns_seeds_enabled,
            local_time,
        )
        .await;

        let listen = config.listen;

        let handle = Handle {
            commands: commands_tx,
            waker: reactor.waker(),
            timeout: time::Duration::from_secs(60),
            listening,
        };

        Ok(P2PClient {
            handle,
            listen,
            commands: commands_rx,
            reactor,
            service,
        })
    }

    /// Run a pre-loaded p2p client.
    pub async fn run(mut self, cancellation: CancellationToken) {
        let result = self
            .reactor
            .run(&self.listen, self.service, self.commands, cancellation)
            .await;

        if let Err(e) = result {
            tracing::error!("P2P is down. P2P client run error: {}", e);
        }
    }

    /// Create a new handle to communicate with the client.
    pub fn handle(&self) -> Handle<R::Waker> {
        self.handle.clone()
    }
}

#[derive(Clone)]
pub struct Handle<W: NetWaker> {
    pub commands: chan::Sender<Command>,
    pub waker: W,
    pub timeout: time::Duration,
    pub listening: chan::Receiver<net::SocketAddr>,
}

impl<W: NetWaker> Handle<W> {
    /// Send a command to the command channel, and wake up the event loop.
    async fn _command(&self, cmd: Command) -> Result<(), handle::Error> {
        if self.commands.send_async(cmd).await.is_err() {
            return Err(handle::Error::Command);
        }
        self.waker.wake()?;

        Ok(())
    }
}

#[async_trait]
impl<W: NetWaker> handle::Handle for Handle<W> {
    async fn command(&self, cmd: Command) -> Result<(), handle::Error> {
        self._command(cmd).await
    }

    async fn list_peers(&self) -> Result<Vec<Peer>, handle::Error> {
        let (transmit, receive) = chan::bounded(1);
        self.command(Command::ListPeers(transmit)).await?;

        Ok(receive.recv_async().await?)
    }

    async fn list_bans(&self) -> Result<Vec<(net::IpAddr, BanEntry)>, handle::Error> {
        let (transmit, receive) = chan::bounded(1);
        self.command(Command::ListBans(transmit)).await?;

        Ok(receive.recv_async().await?)
    }

    async fn ban_peer(&self, addr: SocketAddr) -> Result<(), handle::Error> {
        self.command(Command::BanPeer(addr)).await
    }

    async fn broadcast(
        &self,
        msg: Message,
        predicate: fn(&Peer) -> bool,
    ) -> Result<Vec<net::SocketAddr>, handle::Error> {
        let (transmit, receive) = chan::bounded(1);
        self.command(Command::Broadcast(msg, predicate, transmit))
            .await?;

        let peers: Vec<PeerId> = receive.recv_async().await?;
        Ok(peers)
    }

    async fn query(&self, msg: Message) -> Result<Option<net::SocketAddr>, handle::Error> {
        let (transmit, receive) = chan::bounded::<Option<SocketAddr>>(1);
        self.command(Command::Query(msg, transmit)).await?;

        Ok(receive.recv_async().await?)
    }
}
