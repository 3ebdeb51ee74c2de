use log::{info, warn};
use net2::TcpBuilder;
use std::io;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::net::{lookup_host, TcpListener};

use crate::common::config::{Config, MAX_BIND_RETRY_DELAY};

const LISTEN_BACKLOG: i32 = 1024;

#[derive(Error, Debug)]
pub enum BindError {
    #[error("Failed to bind to {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Failed to resolve listen host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("No port left to try after {0}")]
    PortsExhausted(u16),
}

/// Resolves the listen host once; retries only ever change the port.
async fn resolve_host(host: &str) -> io::Result<IpAddr> {
    lookup_host((host, 0))
        .await?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to any address", host),
            )
        })
}

fn bind_once(addr: SocketAddr, reuse_address: bool) -> io::Result<TcpListener> {
    let builder = match addr {
        SocketAddr::V4(_) => TcpBuilder::new_v4()?,
        SocketAddr::V6(_) => TcpBuilder::new_v6()?,
    };
    if reuse_address {
        builder.reuse_address(true)?;
    }
    let listener = builder.bind(addr)?.listen(LISTEN_BACKLOG)?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

/// Binds `host:port`, honouring the retry policy of `config`.
///
/// Without `retry_on_bind_failure` the first failure is returned. With it,
/// binding is retried forever with a doubling delay capped at
/// `MAX_BIND_RETRY_DELAY`, moving to the next port each time when
/// `increment_port_on_retry` is set.
pub async fn bind_with_retry(config: &Config) -> Result<TcpListener, BindError> {
    let ip = resolve_host(&config.host)
        .await
        .map_err(|source| BindError::Resolve {
            host: config.host.clone(),
            source,
        })?;
    let mut port = config.port;
    let mut delay = config.bind_retry_delay();

    loop {
        let err = match bind_once(SocketAddr::new(ip, port), config.reuse_address) {
            Ok(listener) => {
                if let Ok(addr) = listener.local_addr() {
                    info!("Bound listener on {}", addr);
                }
                return Ok(listener);
            }
            Err(e) => e,
        };

        if !config.retry_on_bind_failure {
            return Err(BindError::Bind {
                host: config.host.clone(),
                port,
                source: err,
            });
        }

        if config.increment_port_on_retry {
            port = port.checked_add(1).ok_or(BindError::PortsExhausted(port))?;
        }
        warn!(
            "Bind failed ({}), trying {}:{} in {:?}",
            err, config.host, port, delay
        );

        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, MAX_BIND_RETRY_DELAY);
    }
}
