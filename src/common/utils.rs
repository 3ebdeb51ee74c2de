use std::future::Future;
use std::io;
use std::time::Duration;

/// Run an I/O future under a deadline; expiry surfaces as `ErrorKind::TimedOut`.
pub async fn timed<F, T>(limit: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("Operation timed out after {:?}", limit),
        )),
    }
}
