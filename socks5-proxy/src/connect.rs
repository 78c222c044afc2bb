//! Outbound connector: resolve, connect, and report the bound local address.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use proxy_types::DestAddr;
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    Dns,
    NetUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    GeneralFailure,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Dns => write!(f, "name resolution failed"),
            ConnectError::NetUnreachable => write!(f, "network unreachable"),
            ConnectError::HostUnreachable => write!(f, "host unreachable"),
            ConnectError::ConnectionRefused => write!(f, "connection refused"),
            ConnectError::TtlExpired => write!(f, "connect timed out"),
            ConnectError::GeneralFailure => write!(f, "general connect failure"),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<io::ErrorKind> for ConnectError {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => ConnectError::ConnectionRefused,
            io::ErrorKind::TimedOut => ConnectError::TtlExpired,
            io::ErrorKind::HostUnreachable => ConnectError::HostUnreachable,
            io::ErrorKind::NetworkUnreachable => ConnectError::NetUnreachable,
            _ => ConnectError::GeneralFailure,
        }
    }
}

/// Resolves `dest` (skipping resolution for IP literals), connects, and returns the
/// connected stream plus the locally bound address to report back in the reply.
///
/// The whole resolve-then-connect sequence is bounded by `timeout`; elapsing it is
/// reported as [`ConnectError::TtlExpired`].
pub async fn connect(dest: &DestAddr, timeout: Duration) -> Result<(TcpStream, SocketAddr), ConnectError> {
    match tokio::time::timeout(timeout, connect_impl(dest)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(ConnectError::TtlExpired),
    }
}

async fn connect_impl(dest: &DestAddr) -> Result<(TcpStream, SocketAddr), ConnectError> {
    let target = resolve(dest).await?;

    let stream = TcpStream::connect(target)
        .await
        .map_err(|e| ConnectError::from(e.kind()))?;

    let bound = stream.local_addr().map_err(|_| ConnectError::GeneralFailure)?;

    Ok((stream, bound))
}

async fn resolve(dest: &DestAddr) -> Result<SocketAddr, ConnectError> {
    match dest {
        DestAddr::Ip(addr) => Ok(*addr),
        DestAddr::Domain(host, port) => {
            let mut addrs = tokio::net::lookup_host((host.as_str(), *port))
                .await
                .map_err(|_| ConnectError::Dns)?;
            addrs.next().ok_or(ConnectError::Dns)
        }
    }
}
