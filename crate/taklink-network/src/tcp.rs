use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, RECV_BUFFER_SIZE};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::sockopts::apply_stream_options;
use crate::supervise::supervised;

/// Plain TCP connection to a TAK server.
pub struct TcpClient {
    config: ClientConfig,
    stream: Option<TcpStream>,
    token: Option<CancellationToken>,
}

impl TcpClient {
    pub fn new(config: ClientConfig) -> TcpClient {
        TcpClient {
            config,
            stream: None,
            token: None,
        }
    }
}

#[async_trait]
impl Client for TcpClient {
    async fn connect(&mut self, token: CancellationToken) -> Result<(), ClientError> {
        if self.stream.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let address = format!("{}:{}", self.config.address, self.config.port);
        log::debug!("connecting to {address} over TCP");

        let stream = supervised(
            Some(&token),
            self.config.dial_timeout,
            TcpStream::connect(&address),
        )
        .await?;
        apply_stream_options(&stream, &self.config)?;

        log::info!("connected to {address}");
        self.stream = Some(stream);
        self.token = Some(token);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        let Some(mut stream) = self.stream.take() else {
            return Err(ClientError::NotConnected);
        };
        self.token = None;
        log::debug!("disconnecting TCP client");
        stream.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        supervised(self.token.as_ref(), self.config.write_timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await?;
        log::debug!("sent {} bytes over TCP", data.len());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let n = supervised(
            self.token.as_ref(),
            self.config.read_timeout,
            stream.read(&mut buffer),
        )
        .await?;
        if n == 0 {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
        log::debug!("received {n} bytes over TCP");
        buffer.truncate(n);
        Ok(buffer)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
