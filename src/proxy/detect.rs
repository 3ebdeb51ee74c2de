use std::io;
use std::time::Duration;
use tokio::time::Instant;

use crate::common::utils::timed;
use crate::net::conn::BufferedConnection;
use crate::proxy::codec::SOCKS5_VERSION;

/// Classification of a freshly accepted connection.
#[derive(Debug)]
pub enum Detection {
    /// A complete SOCKS5 greeting was consumed; carries the offered methods.
    Socks5 { methods: Vec<u8> },
    /// Anything else. Every byte read so far is still in the connection
    /// buffer, untouched, for replay to the redirect backend.
    Foreign,
    /// The client transport failed (reset, broken pipe) before a decision.
    Broken(io::Error),
}

enum Wait {
    Ready,
    GaveUp,
    Failed(io::Error),
}

async fn wait_for(conn: &mut BufferedConnection, n: usize, deadline: Instant) -> Wait {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match timed(remaining, conn.ensure_bytes(n)).await {
        Ok(()) => Wait::Ready,
        Err(e) if matches!(e.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::TimedOut) => {
            Wait::GaveUp
        }
        Err(e) => Wait::Failed(e),
    }
}

/// Looks for `[0x05][n > 0][n method bytes]` at the start of the stream.
///
/// Nothing is consumed unless the whole greeting is present, so a short
/// read, a timeout, or a header that is not SOCKS5 leaves the received
/// prefix intact. `limit` bounds the whole detection, however the greeting
/// is split across reads.
pub async fn detect(conn: &mut BufferedConnection, limit: Duration) -> Detection {
    let deadline = Instant::now() + limit;
    match wait_for(conn, 2, deadline).await {
        Wait::Ready => {}
        Wait::GaveUp => return Detection::Foreign,
        Wait::Failed(e) => return Detection::Broken(e),
    }

    let (version, nmethods) = match conn.peek(2) {
        Some(&[version, nmethods]) => (version, nmethods as usize),
        _ => return Detection::Foreign,
    };
    if version != SOCKS5_VERSION || nmethods == 0 {
        return Detection::Foreign;
    }

    match wait_for(conn, 2 + nmethods, deadline).await {
        Wait::Ready => {}
        Wait::GaveUp => return Detection::Foreign,
        Wait::Failed(e) => return Detection::Broken(e),
    }

    match conn.consume(2 + nmethods) {
        Some(greeting) => Detection::Socks5 {
            methods: greeting[2..].to_vec(),
        },
        None => Detection::Foreign,
    }
}
