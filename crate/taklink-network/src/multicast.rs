use async_trait::async_trait;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, RECV_BUFFER_SIZE};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::relay::{Disposition, FlowTagRelay, spawn_prune_task};
use crate::supervise::supervised;

/// Mesh multicast client.
///
/// Joins the TAK multicast group and routes every payload through a
/// [FlowTagRelay]: outgoing CoT events are tagged, incoming ones are
/// checked against the anti-loop rules. A suppressed incoming message
/// surfaces as [ClientError::MessageSkipped].
pub struct MulticastClient {
    config: ClientConfig,
    relay: Arc<FlowTagRelay>,
    socket: Option<UdpSocket>,
    group: Option<SocketAddrV4>,
    token: Option<CancellationToken>,
    prune_token: Option<CancellationToken>,
}

impl MulticastClient {
    pub fn new(config: ClientConfig) -> MulticastClient {
        let relay = Arc::new(FlowTagRelay::new(config.client_id.clone()));
        MulticastClient {
            config,
            relay,
            socket: None,
            group: None,
            token: None,
            prune_token: None,
        }
    }
}

/// The IPv4 address of the first interface that is up, supports
/// multicast and is not a loopback.
fn pick_multicast_interface() -> Result<Ipv4Addr, ClientError> {
    let addrs = getifaddrs().map_err(std::io::Error::from)?;
    for ifaddr in addrs {
        let flags = ifaddr.flags;
        if !flags.contains(InterfaceFlags::IFF_UP)
            || !flags.contains(InterfaceFlags::IFF_MULTICAST)
            || flags.contains(InterfaceFlags::IFF_LOOPBACK)
        {
            continue;
        }
        if let Some(addr) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) {
            log::debug!(
                "using interface {} for multicast",
                ifaddr.interface_name
            );
            return Ok(addr.ip());
        }
    }
    Err(ClientError::NoMulticastInterface)
}

#[async_trait]
impl Client for MulticastClient {
    async fn connect(&mut self, token: CancellationToken) -> Result<(), ClientError> {
        if self.socket.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let group_addr: Ipv4Addr = self.config.multicast_addr.parse().map_err(|_| {
            ClientError::Config(format!(
                "invalid multicast address {}",
                self.config.multicast_addr
            ))
        })?;
        if !group_addr.is_multicast() {
            return Err(ClientError::Config(format!(
                "{group_addr} is not a multicast address"
            )));
        }
        let group = SocketAddrV4::new(group_addr, self.config.multicast_port);
        let interface = pick_multicast_interface()?;
        log::debug!("joining multicast group {group}");

        // Other TAK clients on the same host share the group port.
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(ClientError::Io)?;
        socket.set_reuse_address(true)?;
        socket.bind(
            &SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.multicast_port).into(),
        )?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        socket.join_multicast_v4(group_addr, interface)?;

        // The pruning task runs on a child token so that disconnect can
        // stop it without cancelling the caller's token.
        let prune_token = spawn_prune_task(Arc::clone(&self.relay), &token);

        log::info!("joined multicast group {group}");
        self.socket = Some(socket);
        self.group = Some(group);
        self.token = Some(token);
        self.prune_token = Some(prune_token);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.socket.take().is_none() {
            return Err(ClientError::NotConnected);
        }
        if let Some(prune_token) = self.prune_token.take() {
            prune_token.cancel();
        }
        self.group = None;
        self.token = None;
        log::debug!("left multicast group");
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let (Some(socket), Some(group)) = (self.socket.as_ref(), self.group) else {
            return Err(ClientError::NotConnected);
        };
        let enriched = self.relay.process_outgoing(data);
        let payload = enriched.as_deref().unwrap_or(data);
        supervised(self.token.as_ref(), self.config.write_timeout, async {
            socket.send_to(payload, group).await?;
            Ok(())
        })
        .await?;
        log::debug!("sent {} bytes to multicast group", payload.len());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ClientError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let (n, _) = supervised(
            self.token.as_ref(),
            self.config.read_timeout,
            socket.recv_from(&mut buffer),
        )
        .await?;
        buffer.truncate(n);
        log::debug!("received {n} bytes from multicast group");

        match self.relay.classify_incoming(&buffer) {
            Disposition::Process => Ok(buffer),
            disposition => {
                log::debug!("skipping message: {disposition:?}");
                Err(ClientError::MessageSkipped)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some() && self.group.is_some()
    }
}
