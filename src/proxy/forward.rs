use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes moved in each direction by one relay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    total: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *total += n as u64;
    }
}

/// Forwards bytes between `a` and `b` until either side reaches EOF or fails.
///
/// Both directions are polled from the same task; the first direction to end
/// terminates the other, then both write halves are shut down and the
/// streams dropped. Shutdown errors are ignored since the peer may already be
/// gone.
pub async fn forward_bidirectional<A, B>(a: A, b: B, chunk_size: usize) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let mut stats = RelayStats::default();

    let result = tokio::select! {
        r = pump(&mut a_read, &mut b_write, chunk_size, &mut stats.a_to_b) => r,
        r = pump(&mut b_read, &mut a_write, chunk_size, &mut stats.b_to_a) => r,
    };

    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    result.map(|()| stats)
}
