use std::io;

/// Errors returned by taklink clients.
///
/// [ClientError::MessageSkipped] is not a failure: it is the
/// distinguished result `recv` uses when the flow-tag relay withheld a
/// message (own broadcast or duplicate). Receive loops must branch on
/// it and keep receiving.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("client is not connected")]
    NotConnected,
    #[error("no suitable multicast interface found")]
    NoMulticastInterface,
    #[error("invalid client configuration: {0}")]
    Config(String),
    #[error("message skipped due to flow tag rules")]
    MessageSkipped,
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out")]
    Timeout,
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
