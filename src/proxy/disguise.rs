use log::debug;
use std::io;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::common::config::Config;
use crate::net::conn::BufferedConnection;
use crate::proxy::connect::{connect_host, ConnectError};
use crate::proxy::forward::{forward_bidirectional, RelayStats};

#[derive(Error, Debug)]
pub enum DisguiseError {
    #[error("Redirect backend {host}:{port} unreachable: {source}")]
    Unreachable {
        host: String,
        port: u16,
        #[source]
        source: ConnectError,
    },
    #[error("Failed to replay {len} prefix bytes: {source}")]
    Replay {
        len: usize,
        #[source]
        source: io::Error,
    },
    #[error("Relay error: {0}")]
    Relay(#[source] io::Error),
}

/// Hands a non-SOCKS5 client over to the redirect backend.
///
/// The backend first receives every byte already read from the client,
/// then the two sides are relayed verbatim. If the backend cannot be
/// reached the client is simply dropped.
pub async fn forward_to_redirect(
    mut client: BufferedConnection,
    config: &Config,
) -> Result<RelayStats, DisguiseError> {
    let mut redirect = connect_host(
        &config.redirect_host,
        config.redirect_port,
        config.connect_timeout(),
    )
    .await
    .map_err(|source| DisguiseError::Unreachable {
        host: config.redirect_host.clone(),
        port: config.redirect_port,
        source,
    })?;

    let prefix = client.take_buffered();
    if !prefix.is_empty() {
        redirect
            .write_all(&prefix)
            .await
            .map_err(|source| DisguiseError::Replay {
                len: prefix.len(),
                source,
            })?;
    }
    debug!(
        "Redirecting to {}:{} after {} prefix bytes",
        config.redirect_host,
        config.redirect_port,
        prefix.len()
    );

    let mut stats = forward_bidirectional(client, redirect, config.buffer_size)
        .await
        .map_err(DisguiseError::Relay)?;
    stats.a_to_b += prefix.len() as u64;
    Ok(stats)
}
