use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default port for plain TCP connections to a TAK server.
pub const DEFAULT_TCP_PORT: u16 = 8087;
/// Default port for TLS connections to a TAK server.
pub const DEFAULT_TLS_PORT: u16 = 8089;
/// Default port for UDP connections to a TAK server.
pub const DEFAULT_UDP_PORT: u16 = 8087;
/// Default group address for TAK mesh multicast.
pub const DEFAULT_MULTICAST_ADDR: &str = "239.2.3.1";
/// Default port for TAK mesh multicast.
pub const DEFAULT_MULTICAST_PORT: u16 = 6969;

/// Transport variant used by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Tcp,
    Tls,
    Udp,
    Multicast,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionKind::Tcp => "tcp",
            ConnectionKind::Tls => "tls",
            ConnectionKind::Udp => "udp",
            ConnectionKind::Multicast => "multicast",
        };
        f.write_str(s)
    }
}

impl FromStr for ConnectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ConnectionKind::Tcp),
            "tls" => Ok(ConnectionKind::Tls),
            "udp" => Ok(ConnectionKind::Udp),
            "multicast" => Ok(ConnectionKind::Multicast),
            other => Err(format!(
                "unsupported connection type '{other}'; expected tcp, tls, udp or multicast"
            )),
        }
    }
}

/// Configuration for a taklink client.
///
/// Immutable once a client has been built from it; the client owns its
/// copy exclusively.
#[derive(Clone)]
pub struct ClientConfig {
    /// Server address (host name or IP). Unused by multicast.
    pub address: String,
    /// Server port. Unused by multicast.
    pub port: u16,
    /// Identifier used as the flow-tag origin for this client.
    pub client_id: String,
    /// Which transport variant to use.
    pub kind: ConnectionKind,

    /// Deadline for establishing the connection (including the TLS
    /// handshake, where applicable).
    pub dial_timeout: Option<Duration>,
    /// Deadline applied to each `recv` call.
    pub read_timeout: Option<Duration>,
    /// Deadline applied to each `send` call.
    pub write_timeout: Option<Duration>,
    /// TCP keep-alive probe interval for stream transports.
    pub keepalive: Option<Duration>,
    /// TCP_USER_TIMEOUT for stream transports. Tears down a half-open
    /// connection whose unacked data sits in the send buffer longer
    /// than this. Linux only; accepted but inert elsewhere.
    pub tcp_user_timeout: Option<Duration>,

    /// Client certificate, PEM or PKCS#12 (`.p12`/`.pfx`).
    pub cert_file: Option<PathBuf>,
    /// Private key for a PEM certificate.
    pub key_file: Option<PathBuf>,
    /// Extra CA bundle (PEM) to trust for server verification.
    pub ca_file: Option<PathBuf>,
    /// Password for a PKCS#12 bundle.
    pub p12_password: Option<String>,
    /// Skip server certificate verification. The connection stays
    /// encrypted but is no longer authenticated.
    pub skip_tls_verify: bool,
    /// Pre-built TLS configuration; takes precedence over the
    /// certificate paths above.
    pub tls: Option<Arc<rustls::ClientConfig>>,

    /// Multicast group address.
    pub multicast_addr: String,
    /// Multicast group port.
    pub multicast_port: u16,
}

impl ClientConfig {
    pub fn new(
        kind: ConnectionKind,
        address: impl Into<String>,
        port: u16,
        client_id: impl Into<String>,
    ) -> ClientConfig {
        ClientConfig {
            address: address.into(),
            port,
            client_id: client_id.into(),
            kind,
            dial_timeout: None,
            read_timeout: None,
            write_timeout: None,
            keepalive: None,
            tcp_user_timeout: None,
            cert_file: None,
            key_file: None,
            ca_file: None,
            p12_password: None,
            skip_tls_verify: false,
            tls: None,
            multicast_addr: DEFAULT_MULTICAST_ADDR.to_string(),
            multicast_port: DEFAULT_MULTICAST_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_kind_from_str() {
        assert_eq!(ConnectionKind::Tcp, "tcp".parse().unwrap());
        assert_eq!(ConnectionKind::Tls, "TLS".parse().unwrap());
        assert_eq!(ConnectionKind::Udp, "udp".parse().unwrap());
        assert_eq!(ConnectionKind::Multicast, "Multicast".parse().unwrap());
        assert!("quic".parse::<ConnectionKind>().is_err());
    }

    #[test]
    fn defaults_match_tak_conventions() {
        let config = ClientConfig::new(ConnectionKind::Multicast, "", 0, "client-1");
        assert_eq!("239.2.3.1", config.multicast_addr);
        assert_eq!(6969, config.multicast_port);
        assert!(config.dial_timeout.is_none());
        assert!(!config.skip_tls_verify);
    }
}
