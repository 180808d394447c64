use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, RECV_BUFFER_SIZE};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::supervise::supervised;

/// Unicast UDP connection to a TAK server.
///
/// The socket is bound to an ephemeral port and connected to the
/// remote, so stray datagrams from other peers are filtered by the
/// kernel.
pub struct UdpClient {
    config: ClientConfig,
    socket: Option<UdpSocket>,
    token: Option<CancellationToken>,
}

impl UdpClient {
    pub fn new(config: ClientConfig) -> UdpClient {
        UdpClient {
            config,
            socket: None,
            token: None,
        }
    }
}

#[async_trait]
impl Client for UdpClient {
    async fn connect(&mut self, token: CancellationToken) -> Result<(), ClientError> {
        if self.socket.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let address = format!("{}:{}", self.config.address, self.config.port);
        log::debug!("connecting to {address} over UDP");

        let socket = supervised(Some(&token), self.config.dial_timeout, async {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(&address).await?;
            Ok(socket)
        })
        .await?;

        log::info!("connected to {address}");
        self.socket = Some(socket);
        self.token = Some(token);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.socket.take().is_none() {
            return Err(ClientError::NotConnected);
        }
        self.token = None;
        log::debug!("disconnected UDP client");
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        supervised(self.token.as_ref(), self.config.write_timeout, async {
            socket.send(data).await?;
            Ok(())
        })
        .await?;
        log::debug!("sent {} bytes over UDP", data.len());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ClientError> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let n = supervised(
            self.token.as_ref(),
            self.config.read_timeout,
            socket.recv(&mut buffer),
        )
        .await?;
        log::debug!("received {n} bytes over UDP");
        buffer.truncate(n);
        Ok(buffer)
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}
