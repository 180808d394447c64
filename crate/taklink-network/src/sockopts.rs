use socket2::{SockRef, TcpKeepalive};
use std::io;
use tokio::net::TcpStream;

use crate::config::ClientConfig;

/// Apply stream socket options once the TCP connection is up.
pub(crate) fn apply_stream_options(
    stream: &TcpStream,
    config: &ClientConfig,
) -> io::Result<()> {
    let sock = SockRef::from(stream);
    if let Some(interval) = config.keepalive {
        let keepalive = TcpKeepalive::new()
            .with_time(interval)
            .with_interval(interval);
        sock.set_tcp_keepalive(&keepalive)?;
    }
    set_user_timeout(&sock, config)
}

#[cfg(target_os = "linux")]
fn set_user_timeout(sock: &SockRef<'_>, config: &ClientConfig) -> io::Result<()> {
    match config.tcp_user_timeout {
        Some(timeout) => sock.set_tcp_user_timeout(Some(timeout)),
        None => Ok(()),
    }
}

/// TCP_USER_TIMEOUT is Linux-specific; accepted but inert elsewhere.
#[cfg(not(target_os = "linux"))]
fn set_user_timeout(_sock: &SockRef<'_>, _config: &ClientConfig) -> io::Result<()> {
    Ok(())
}
