use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ConnectionKind};
use crate::error::ClientError;
use crate::multicast::MulticastClient;
use crate::tcp::TcpClient;
use crate::tls::TlsClient;
use crate::udp::UdpClient;

/// Largest payload a single `recv` returns. CoT events comfortably fit.
pub const RECV_BUFFER_SIZE: usize = 8192;

/// A connection to a TAK server or mesh.
///
/// All transports share this contract: `connect` before anything else,
/// `AlreadyConnected` on a second connect, `NotConnected` on use while
/// down. `recv` returns whatever one read produced; callers needing
/// message framing do it on top.
#[async_trait]
pub trait Client: Send {
    /// Establish the connection. The token supervises this and every
    /// later operation on the client; cancelling it aborts in-flight
    /// I/O with [ClientError::Cancelled].
    async fn connect(&mut self, token: CancellationToken) -> Result<(), ClientError>;

    /// Close the connection and release the socket.
    async fn disconnect(&mut self) -> Result<(), ClientError>;

    /// Transmit one payload, whole.
    async fn send(&mut self, data: &[u8]) -> Result<(), ClientError>;

    /// Wait for incoming data, honoring the configured read timeout.
    async fn recv(&mut self) -> Result<Vec<u8>, ClientError>;

    /// Whether the client currently holds an open connection.
    fn is_connected(&self) -> bool;
}

/// Build a client for the transport named in the configuration.
///
/// TLS configuration problems (missing certificate, bad bundle) are
/// reported here, before any network activity.
pub fn new_client(config: ClientConfig) -> Result<Box<dyn Client>, ClientError> {
    match config.kind {
        ConnectionKind::Tcp => Ok(Box::new(TcpClient::new(config))),
        ConnectionKind::Tls => Ok(Box::new(TlsClient::new(config)?)),
        ConnectionKind::Udp => Ok(Box::new(UdpClient::new(config))),
        ConnectionKind::Multicast => Ok(Box::new(MulticastClient::new(config))),
    }
}
