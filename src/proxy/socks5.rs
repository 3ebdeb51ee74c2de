use log::{debug, info};
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::common::auth::Credentials;
use crate::common::utils::timed;
use crate::net::conn::BufferedConnection;
use crate::proxy::codec::*;
use crate::proxy::connect::{connect_with_timeout, ConnectError};

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid SOCKS version: {0:#04x}")]
    InvalidVersion(u8),
    #[error("Username/password method not offered (offered {0:?})")]
    NoAcceptableMethod(Vec<u8>),
    #[error("Invalid authentication sub-negotiation version: {0:#04x}")]
    InvalidAuthVersion(u8),
    #[error("Authentication failed for user '{0}'")]
    AuthenticationFailed(String),
    #[error("Unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),
    #[error("Unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),
    #[error("Connection to {target} failed: {source}")]
    ConnectError {
        target: Address,
        #[source]
        source: ConnectError,
    },
}

/// Progress of one SOCKS5 negotiation. Failure from any state closes the
/// session; only a `ReplySent` handshake hands its streams to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Greeted,
    MethodOffered,
    Authenticated,
    RequestParsed,
    Connected,
    ReplySent,
}

pub struct Socks5Handshake<'a> {
    credentials: &'a Credentials,
    handshake_timeout: Duration,
    connect_timeout: Duration,
    reject_unsupported_methods: bool,
    state: HandshakeState,
}

impl<'a> Socks5Handshake<'a> {
    pub fn new(
        credentials: &'a Credentials,
        handshake_timeout: Duration,
        connect_timeout: Duration,
        reject_unsupported_methods: bool,
    ) -> Self {
        Socks5Handshake {
            credentials,
            handshake_timeout,
            connect_timeout,
            reject_unsupported_methods,
            state: HandshakeState::Greeted,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Drives the negotiation that follows a detected greeting and returns
    /// the established upstream connection once the success reply is out.
    pub async fn run(
        &mut self,
        conn: &mut BufferedConnection,
        methods: &[u8],
    ) -> Result<(TcpStream, Address), HandshakeError> {
        let limit = self.handshake_timeout;
        let target = timed(limit, async { Ok(self.negotiate(conn, methods).await) }).await??;

        let upstream = self.connect(conn, &target).await?;
        Ok((upstream, target))
    }

    async fn negotiate(
        &mut self,
        conn: &mut BufferedConnection,
        methods: &[u8],
    ) -> Result<Address, HandshakeError> {
        self.select_method(conn, methods).await?;
        self.authenticate(conn).await?;
        self.read_request(conn).await
    }

    async fn select_method(
        &mut self,
        conn: &mut BufferedConnection,
        methods: &[u8],
    ) -> Result<(), HandshakeError> {
        if !methods.contains(&METHOD_USERNAME_PASSWORD) {
            if self.reject_unsupported_methods {
                conn.write(&[SOCKS5_VERSION, METHOD_NO_ACCEPTABLE]).await?;
            }
            return Err(HandshakeError::NoAcceptableMethod(methods.to_vec()));
        }

        conn.write(&[SOCKS5_VERSION, METHOD_USERNAME_PASSWORD])
            .await?;
        self.state = HandshakeState::MethodOffered;
        Ok(())
    }

    /// RFC 1929 Username/Password sub-negotiation:
    /// +----+------+----------+------+----------+
    /// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    /// +----+------+----------+------+----------+
    /// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    /// +----+------+----------+------+----------+
    async fn authenticate(&mut self, conn: &mut BufferedConnection) -> Result<(), HandshakeError> {
        let auth_version = conn.read_u8().await?;
        if auth_version != AUTH_VERSION {
            return Err(HandshakeError::InvalidAuthVersion(auth_version));
        }

        let username_len = conn.read_u8().await? as usize;
        let username = conn.read_exact_bytes(username_len).await?;
        let password_len = conn.read_u8().await? as usize;
        let password = conn.read_exact_bytes(password_len).await?;

        if !self.credentials.verify(&username, &password) {
            conn.write(&[AUTH_VERSION, AUTH_FAILURE]).await?;
            return Err(HandshakeError::AuthenticationFailed(
                String::from_utf8_lossy(&username).into_owned(),
            ));
        }

        conn.write(&[AUTH_VERSION, AUTH_SUCCESS]).await?;
        self.state = HandshakeState::Authenticated;
        info!(
            "User '{}' authenticated",
            String::from_utf8_lossy(&username)
        );
        Ok(())
    }

    async fn read_request(
        &mut self,
        conn: &mut BufferedConnection,
    ) -> Result<Address, HandshakeError> {
        let header = conn.read_exact_bytes(4).await?;
        let version = header[0];
        let command = header[1];
        let addr_type = header[3];

        if version != SOCKS5_VERSION {
            return Err(HandshakeError::InvalidVersion(version));
        }

        if command != CMD_CONNECT {
            self.reject(conn, REPLY_COMMAND_NOT_SUPPORTED).await;
            return Err(HandshakeError::UnsupportedCommand(command));
        }

        let target = match addr_type {
            ATYP_IPV4 => {
                let data = conn.read_exact_bytes(4).await?;
                let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
                Address::Ipv4(ip, read_port(conn).await?)
            }
            ATYP_DOMAIN => {
                let domain_len = conn.read_u8().await? as usize;
                let domain = conn.read_exact_bytes(domain_len).await?;
                Address::Domain(domain, read_port(conn).await?)
            }
            _ => {
                self.reject(conn, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await;
                return Err(HandshakeError::UnsupportedAddressType(addr_type));
            }
        };

        self.state = HandshakeState::RequestParsed;
        debug!("CONNECT request for {}", target);
        Ok(target)
    }

    /// Connects upstream and sends the one reply that reports the outcome.
    async fn connect(
        &mut self,
        conn: &mut BufferedConnection,
        target: &Address,
    ) -> Result<TcpStream, HandshakeError> {
        let established = match connect_with_timeout(target, self.connect_timeout).await {
            Ok(stream) => stream
                .local_addr()
                .map(|bound| (stream, bound))
                .map_err(ConnectError::Io),
            Err(e) => Err(e),
        };

        match established {
            Ok((stream, bound)) => {
                self.state = HandshakeState::Connected;
                conn.write(&Reply::success(bound).encode()).await?;
                self.state = HandshakeState::ReplySent;
                info!("Connected to target: {} (bound {})", target, bound);
                Ok(stream)
            }
            Err(source) => {
                let reply = Reply::failure(REPLY_CONNECTION_REFUSED, target.atyp());
                if let Err(e) = conn.write(&reply.encode()).await {
                    debug!("Failed to send connect failure reply: {}", e);
                }
                Err(HandshakeError::ConnectError {
                    target: target.clone(),
                    source,
                })
            }
        }
    }

    async fn reject(&self, conn: &mut BufferedConnection, status: u8) {
        if let Err(e) = conn.write(&Reply::failure(status, ATYP_IPV4).encode()).await {
            debug!("Failed to send rejection reply: {}", e);
        }
    }
}

async fn read_port(conn: &mut BufferedConnection) -> io::Result<u16> {
    let port = conn.read_exact_bytes(2).await?;
    Ok(u16::from_be_bytes([port[0], port[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::conn::tests::{connected_pair, reset};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn credentials() -> Credentials {
        Credentials::new("admin", "password")
    }

    fn auth_request(username: &[u8], password: &[u8]) -> Vec<u8> {
        let mut out = vec![0x01, username.len() as u8];
        out.extend_from_slice(username);
        out.push(password.len() as u8);
        out.extend_from_slice(password);
        out
    }

    fn connect_request(ip: Ipv4Addr, port: u16) -> Vec<u8> {
        let mut out = vec![0x05, 0x01, 0x00, 0x01];
        out.extend_from_slice(&ip.octets());
        out.extend_from_slice(&port.to_be_bytes());
        out
    }

    async fn read_all(client: &mut TcpStream) -> Vec<u8> {
        let mut out = Vec::new();
        tokio::time::timeout(TIMEOUT, client.read_to_end(&mut out))
            .await
            .expect("server kept the connection open")
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_connect_ipv4_success() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_port = target.local_addr().unwrap().port();

        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        client.write_all(&auth_request(b"admin", b"password")).await.unwrap();
        client
            .write_all(&connect_request(Ipv4Addr::LOCALHOST, target_port))
            .await
            .unwrap();

        let (upstream, addr) = handshake.run(&mut conn, &[0x00, 0x02]).await.unwrap();
        assert_eq!(handshake.state(), HandshakeState::ReplySent);
        assert_eq!(addr, Address::Ipv4(Ipv4Addr::LOCALHOST, target_port));

        let mut replies = [0u8; 2 + 2 + 10];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(&replies[..2], &[0x05, 0x02]);
        assert_eq!(&replies[2..4], &[0x01, 0x00]);

        let bound = upstream.local_addr().unwrap();
        let reply = &replies[4..];
        assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
        assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([reply[8], reply[9]]), bound.port());
    }

    #[tokio::test]
    async fn test_method_two_missing_closes_silently() {
        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        let err = handshake.run(&mut conn, &[0x00, 0x01]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::NoAcceptableMethod(_)));
        assert_eq!(handshake.state(), HandshakeState::Greeted);
        drop(conn);

        assert!(read_all(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_method_two_missing_with_rfc_reply() {
        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, true);

        assert!(handshake.run(&mut conn, &[0x00]).await.is_err());
        drop(conn);

        assert_eq!(read_all(&mut client).await, vec![0x05, 0xFF]);
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        client.write_all(&auth_request(b"admin", b"guess")).await.unwrap();
        let err = handshake.run(&mut conn, &[0x02]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::AuthenticationFailed(ref user) if user == "admin"));
        assert_eq!(handshake.state(), HandshakeState::MethodOffered);
        drop(conn);

        assert_eq!(read_all(&mut client).await, vec![0x05, 0x02, 0x01, 0xFF]);
    }

    #[tokio::test]
    async fn test_bad_auth_version_sends_nothing() {
        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        client.write_all(&[0x02, 0x05]).await.unwrap();
        let err = handshake.run(&mut conn, &[0x02]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidAuthVersion(0x02)));
        drop(conn);

        assert_eq!(read_all(&mut client).await, vec![0x05, 0x02]);
    }

    #[tokio::test]
    async fn test_unreachable_target_replies_five() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        client.write_all(&auth_request(b"admin", b"password")).await.unwrap();
        client
            .write_all(&connect_request(Ipv4Addr::LOCALHOST, closed_port))
            .await
            .unwrap();

        let err = handshake.run(&mut conn, &[0x02]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::ConnectError { .. }));
        assert_eq!(handshake.state(), HandshakeState::RequestParsed);
        drop(conn);

        let received = read_all(&mut client).await;
        assert_eq!(&received[4..], &[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_unresolvable_domain_replies_five() {
        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake =
            Socks5Handshake::new(&credentials, TIMEOUT, Duration::from_secs(3), false);

        let name = b"no-such-host.invalid";
        let mut request = vec![0x05, 0x01, 0x00, 0x03, name.len() as u8];
        request.extend_from_slice(name);
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&auth_request(b"admin", b"password")).await.unwrap();
        client.write_all(&request).await.unwrap();

        assert!(handshake.run(&mut conn, &[0x02]).await.is_err());
        drop(conn);

        let received = read_all(&mut client).await;
        assert_eq!(&received[4..], &[0x05, 0x05, 0x00, 0x03, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_domain_target_is_resolved() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_port = target.local_addr().unwrap().port();

        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        let mut request = vec![0x05, 0x01, 0x00, 0x03, 9];
        request.extend_from_slice(b"localhost");
        request.extend_from_slice(&target_port.to_be_bytes());
        client.write_all(&auth_request(b"admin", b"password")).await.unwrap();
        client.write_all(&request).await.unwrap();

        let (upstream, _) = handshake.run(&mut conn, &[0x02]).await.unwrap();
        assert_eq!(upstream.peer_addr().unwrap().port(), target_port);
    }

    #[tokio::test]
    async fn test_bind_command_is_rejected() {
        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        client.write_all(&auth_request(b"admin", b"password")).await.unwrap();
        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let err = handshake.run(&mut conn, &[0x02]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedCommand(0x02)));
        drop(conn);

        let received = read_all(&mut client).await;
        assert_eq!(&received[4..], &[0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_ipv6_target_is_rejected() {
        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        client.write_all(&auth_request(b"admin", b"password")).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00, 0x04]).await.unwrap();

        let err = handshake.run(&mut conn, &[0x02]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedAddressType(0x04)));
        drop(conn);

        let received = read_all(&mut client).await;
        assert_eq!(&received[4..], &[0x05, 0x08, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_bad_request_version_closes() {
        let (mut client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);

        client.write_all(&auth_request(b"admin", b"password")).await.unwrap();
        client.write_all(&[0x04, 0x01, 0x00, 0x01]).await.unwrap();

        let err = handshake.run(&mut conn, &[0x02]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidVersion(0x04)));
        drop(conn);

        assert_eq!(read_all(&mut client).await, vec![0x05, 0x02, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_stalled_client_times_out() {
        let (_client, mut conn) = connected_pair(4096).await;
        let credentials = credentials();
        let mut handshake =
            Socks5Handshake::new(&credentials, Duration::from_millis(50), TIMEOUT, false);

        let err = handshake.run(&mut conn, &[0x02]).await.unwrap_err();
        match err {
            HandshakeError::IoError(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(handshake.state(), HandshakeState::MethodOffered);
    }

    #[tokio::test]
    async fn test_connect_failure_survives_lost_client() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let (client, mut conn) = connected_pair(4096).await;
        reset(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let credentials = credentials();
        let mut handshake = Socks5Handshake::new(&credentials, TIMEOUT, TIMEOUT, false);
        let target = Address::Ipv4(Ipv4Addr::LOCALHOST, closed_port);
        let err = handshake.connect(&mut conn, &target).await.unwrap_err();
        match err {
            HandshakeError::ConnectError { target: failed, source } => {
                assert_eq!(failed, target);
                assert!(matches!(source, ConnectError::ConnectionRefused(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
