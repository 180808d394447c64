use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream, rustls};
use tokio_util::sync::CancellationToken;

use crate::client::{Client, RECV_BUFFER_SIZE};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::security::load_client_tls_config;
use crate::sockopts::apply_stream_options;
use crate::supervise::supervised;

/// TLS connection to a TAK server.
///
/// The rustls configuration is built once, in [TlsClient::new], so
/// credential problems fail before any network activity. Disconnect is
/// idempotent on this transport; TAK servers drop TLS sessions freely
/// and callers tear down in response without tracking state.
pub struct TlsClient {
    config: ClientConfig,
    tls: Arc<rustls::ClientConfig>,
    stream: Option<TlsStream<TcpStream>>,
    token: Option<CancellationToken>,
}

impl TlsClient {
    pub fn new(config: ClientConfig) -> Result<TlsClient, ClientError> {
        if config.tls.is_none() && config.cert_file.is_none() && !config.skip_tls_verify {
            return Err(ClientError::Config(
                "TLS connection requires either a certificate or skip-verify".to_string(),
            ));
        }
        let tls = load_client_tls_config(&config)?;
        Ok(TlsClient {
            config,
            tls,
            stream: None,
            token: None,
        })
    }
}

#[async_trait]
impl Client for TlsClient {
    async fn connect(&mut self, token: CancellationToken) -> Result<(), ClientError> {
        if self.stream.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let address = format!("{}:{}", self.config.address, self.config.port);
        let server_name = ServerName::try_from(self.config.address.clone())
            .map_err(|_| ClientError::Config(format!("invalid server name {}", self.config.address)))?;
        log::debug!("connecting to {address} over TLS");

        let connector = TlsConnector::from(Arc::clone(&self.tls));
        let config = &self.config;
        // The dial deadline covers both the TCP connect and the
        // handshake.
        let stream = supervised(Some(&token), config.dial_timeout, async {
            let tcp = TcpStream::connect(&address).await?;
            apply_stream_options(&tcp, config)?;
            connector.connect(server_name, tcp).await
        })
        .await?;

        log::info!("connected to {address}");
        self.stream = Some(stream);
        self.token = Some(token);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        self.token = None;
        log::debug!("disconnecting TLS client");
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
        log::debug!("sent {} bytes over TLS", data.len());
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
        log::debug!("received {n} bytes over TLS");
        buffer.truncate(n);
        Ok(buffer)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
