//! Client-side transports for the TAK protocol.
//!
//! One [Client] contract over four transports (TCP, TLS, UDP and mesh
//! multicast), a certificate loader for TAK server credentials, and the
//! flow-tag relay rules that keep multicast meshes free of loops and
//! duplicates.

mod client;
mod config;
mod error;
mod multicast;
mod relay;
mod security;
mod sockopts;
mod supervise;
mod tcp;
mod tls;
mod udp;

pub use client::{Client, RECV_BUFFER_SIZE, new_client};
pub use config::{
    ClientConfig, ConnectionKind, DEFAULT_MULTICAST_ADDR, DEFAULT_MULTICAST_PORT,
    DEFAULT_TCP_PORT, DEFAULT_TLS_PORT, DEFAULT_UDP_PORT,
};
pub use error::ClientError;
pub use multicast::MulticastClient;
pub use relay::{Disposition, FlowTagRelay, PRUNE_INTERVAL, SEEN_LIMIT};
pub use security::load_client_tls_config;
pub use tcp::TcpClient;
pub use tls::TlsClient;
pub use udp::UdpClient;
