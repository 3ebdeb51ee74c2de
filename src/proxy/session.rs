use log::debug;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::common::auth::Credentials;
use crate::common::config::Config;
use crate::net::conn::BufferedConnection;
use crate::proxy::detect::{detect, Detection};
use crate::proxy::disguise::{forward_to_redirect, DisguiseError};
use crate::proxy::forward::{forward_bidirectional, RelayStats};
use crate::proxy::socks5::{HandshakeError, Socks5Handshake};

/// Which branch a session took after detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Socks5,
    Disguise,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Socks5 => write!(f, "socks5"),
            Route::Disguise => write!(f, "disguise"),
        }
    }
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Success,
    ProtocolError,
    AuthFailure,
    UpstreamFailure,
    TransportError,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Client transport failed during detection: {0}")]
    Detect(#[source] io::Error),
    #[error("SOCKS5 handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Disguise forwarding failed: {0}")]
    Disguise(#[from] DisguiseError),
    #[error("Relay error: {0}")]
    Relay(#[source] io::Error),
}

impl SessionError {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionError::Detect(_) | SessionError::Relay(_) => SessionStatus::TransportError,
            SessionError::Handshake(HandshakeError::AuthenticationFailed(_)) => {
                SessionStatus::AuthFailure
            }
            SessionError::Handshake(HandshakeError::ConnectError { .. }) => {
                SessionStatus::UpstreamFailure
            }
            SessionError::Handshake(HandshakeError::IoError(_)) => SessionStatus::TransportError,
            SessionError::Handshake(_) => SessionStatus::ProtocolError,
            SessionError::Disguise(DisguiseError::Unreachable { .. }) => {
                SessionStatus::UpstreamFailure
            }
            SessionError::Disguise(_) => SessionStatus::TransportError,
        }
    }
}

/// What happened to one accepted connection.
#[derive(Debug)]
pub struct SessionReport {
    pub peer: SocketAddr,
    /// `None` when the client broke off before it could be classified.
    pub route: Option<Route>,
    pub result: Result<RelayStats, SessionError>,
}

impl SessionReport {
    pub fn status(&self) -> SessionStatus {
        match &self.result {
            Ok(_) => SessionStatus::Success,
            Err(e) => e.status(),
        }
    }
}

/// Serves one client connection from detection to teardown.
///
/// Owns both sockets for the whole session; they are closed when this
/// returns, whatever the outcome.
pub async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    config: &Config,
    credentials: &Credentials,
) -> SessionReport {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
    }
    let mut conn = BufferedConnection::new(stream, config.buffer_size);

    let (route, result) = match detect(&mut conn, config.detect_timeout()).await {
        Detection::Socks5 { methods } => {
            debug!("SOCKS5 greeting from {} offering {:?}", peer, methods);
            (
                Some(Route::Socks5),
                socks5_session(conn, &methods, config, credentials).await,
            )
        }
        Detection::Foreign => {
            debug!(
                "Non-SOCKS5 connection from {} ({} bytes read)",
                peer,
                conn.buffered().len()
            );
            (
                Some(Route::Disguise),
                forward_to_redirect(conn, config).await.map_err(SessionError::from),
            )
        }
        Detection::Broken(e) => (None, Err(SessionError::Detect(e))),
    };

    SessionReport {
        peer,
        route,
        result,
    }
}

async fn socks5_session(
    mut conn: BufferedConnection,
    methods: &[u8],
    config: &Config,
    credentials: &Credentials,
) -> Result<RelayStats, SessionError> {
    let mut handshake = Socks5Handshake::new(
        credentials,
        config.handshake_timeout(),
        config.connect_timeout(),
        config.reject_unsupported_methods,
    );

    let (upstream, target) = match handshake.run(&mut conn, methods).await {
        Ok(established) => established,
        Err(e) => {
            debug!("Handshake stopped in state {:?}", handshake.state());
            return Err(e.into());
        }
    };

    debug!("Relaying to {}", target);
    forward_bidirectional(conn, upstream, config.buffer_size)
        .await
        .map_err(SessionError::Relay)
}
