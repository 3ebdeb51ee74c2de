use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

/// Client-side connection that keeps every byte read but not yet consumed.
///
/// Protocol detection only peeks into the buffer, so when a connection turns
/// out not to be SOCKS5 the exact bytes received so far are still here to be
/// replayed towards the redirect backend.
pub struct BufferedConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    temp_buffer: Vec<u8>,
}

impl BufferedConnection {
    pub fn new(stream: TcpStream, buffer_size: usize) -> Self {
        BufferedConnection {
            stream,
            read_buffer: Vec::with_capacity(buffer_size),
            temp_buffer: vec![0u8; buffer_size],
        }
    }

    /// Performs one socket read and appends the result to the buffer.
    ///
    /// Cancel safe: if the future is dropped nothing has been read yet.
    pub async fn fill(&mut self) -> io::Result<usize> {
        let n = self.stream.read(&mut self.temp_buffer).await?;
        if n > 0 {
            self.read_buffer.extend_from_slice(&self.temp_buffer[..n]);
        }
        Ok(n)
    }

    pub async fn ensure_bytes(&mut self, n: usize) -> io::Result<()> {
        while self.read_buffer.len() < n {
            if self.fill().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Connection closed",
                ));
            }
        }
        Ok(())
    }

    pub fn peek(&self, len: usize) -> Option<&[u8]> {
        self.read_buffer.get(..len)
    }

    pub fn consume(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.read_buffer.len() >= len {
            Some(self.read_buffer.drain(..len).collect())
        } else {
            None
        }
    }

    pub async fn read_exact_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        self.ensure_bytes(n).await?;
        self.consume(n)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Buffer underflow"))
    }

    pub async fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.read_exact_bytes(1).await?[0])
    }

    pub fn buffered(&self) -> &[u8] {
        &self.read_buffer
    }

    /// Hands over everything received but not consumed, leaving the buffer empty.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.read_buffer)
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await
    }
}

/// Residual data in the read buffer is drained first before delegating to
/// the underlying stream, so bytes pipelined behind the handshake reach the
/// relay in order.
impl AsyncRead for BufferedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.read_buffer.is_empty() {
            let to_copy = std::cmp::min(this.read_buffer.len(), buf.remaining());
            buf.put_slice(&this.read_buffer[..to_copy]);
            this.read_buffer.drain(..to_copy);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for BufferedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
