use log::debug;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, TcpStream};

use crate::proxy::codec::Address;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connection timed out")]
    ConnectionTimeout,
    #[error("Connection refused: {0}")]
    ConnectionRefused(io::Error),
    #[error("Address resolution failed: {0}")]
    AddressResolutionFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectError {
    fn from_connect(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::ConnectionRefused(e),
            io::ErrorKind::TimedOut => ConnectError::ConnectionTimeout,
            _ => ConnectError::Io(e),
        }
    }
}

/// First IPv4 address `name` resolves to.
pub async fn resolve_ipv4(name: &[u8], port: u16) -> Result<SocketAddrV4, ConnectError> {
    let host = std::str::from_utf8(name).map_err(|_| {
        ConnectError::AddressResolutionFailed(String::from_utf8_lossy(name).into_owned())
    })?;

    let resolved = lookup_host((host, port))
        .await
        .map_err(|e| ConnectError::AddressResolutionFailed(format!("{}: {}", host, e)))?;

    resolved
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| ConnectError::AddressResolutionFailed(format!("{}: no IPv4 address", host)))
}

async fn open(addr: SocketAddr) -> Result<TcpStream, ConnectError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(ConnectError::from_connect)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn connect_target(target: &Address) -> Result<TcpStream, ConnectError> {
    let addr = match target {
        Address::Ipv4(ip, port) => SocketAddrV4::new(*ip, *port),
        Address::Domain(name, port) => resolve_ipv4(name, *port).await?,
    };
    debug!("Connecting to {} ({})", target, addr);
    open(SocketAddr::V4(addr)).await
}

/// Resolves (for domain targets) and connects, all within `limit`.
pub async fn connect_with_timeout(
    target: &Address,
    limit: Duration,
) -> Result<TcpStream, ConnectError> {
    tokio::time::timeout(limit, connect_target(target))
        .await
        .map_err(|_| ConnectError::ConnectionTimeout)?
}

async fn connect_named(host: &str, port: u16) -> Result<TcpStream, ConnectError> {
    let addr = lookup_host((host, port))
        .await
        .map_err(|e| ConnectError::AddressResolutionFailed(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| ConnectError::AddressResolutionFailed(host.to_string()))?;
    open(addr).await
}

/// Connects to a configured `host:port`, which may be a name or a literal.
pub async fn connect_host(
    host: &str,
    port: u16,
    limit: Duration,
) -> Result<TcpStream, ConnectError> {
    tokio::time::timeout(limit, connect_named(host, port))
        .await
        .map_err(|_| ConnectError::ConnectionTimeout)?
}
