use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

pub const SOCKS5_VERSION: u8 = 0x05;
pub const AUTH_VERSION: u8 = 0x01;

pub const METHOD_USERNAME_PASSWORD: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const AUTH_SUCCESS: u8 = 0x00;
pub const AUTH_FAILURE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

// SOCKS5 reply codes (RFC 1928 §6)
pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Target of a CONNECT request as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr, u16),
    /// Raw name bytes; resolved to IPv4 before connecting.
    Domain(Vec<u8>, u16),
}

impl Address {
    pub fn atyp(&self) -> u8 {
        match self {
            Address::Ipv4(..) => ATYP_IPV4,
            Address::Domain(..) => ATYP_DOMAIN,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::Domain(name, port) => {
                write!(f, "{}:{}", String::from_utf8_lossy(name), port)
            }
        }
    }
}

/// Reply to a SOCKS5 request:
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u8,
    pub atyp: u8,
    pub bound: Option<SocketAddr>,
}

impl Reply {
    /// Success reply carrying the local end of the upstream connection.
    pub fn success(bound: SocketAddr) -> Self {
        let atyp = match bound {
            SocketAddr::V4(_) => ATYP_IPV4,
            SocketAddr::V6(_) => ATYP_IPV6,
        };
        Reply {
            status: REPLY_SUCCEEDED,
            atyp,
            bound: Some(bound),
        }
    }

    /// Failure reply: the requested address type is echoed back while the
    /// bound address and port are a zeroed four-byte address and port.
    pub fn failure(status: u8, atyp: u8) -> Self {
        Reply {
            status,
            atyp,
            bound: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![SOCKS5_VERSION, self.status, 0x00, self.atyp];
        match self.bound {
            Some(SocketAddr::V4(addr)) => {
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            Some(SocketAddr::V6(addr)) => {
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            None => out.extend_from_slice(&[0; 6]),
        }
        out
    }
}
