//! Chunked byte relay used by CONNECT tunnels and the HTTP response path

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

/// Copies bytes from one stream to another until end-of-stream or error.
///
/// One `ByteRelay` is shared by both directions of a session. The idle
/// timeout is measured against the last chunk moved in *either* direction,
/// so a peer that stays silent while the other side is talking is not cut off.
#[derive(Debug)]
pub struct ByteRelay {
    chunk_size: usize,
    idle_timeout: Option<Duration>,
    origin: Instant,
    last_activity_ms: AtomicU64,
}

impl ByteRelay {
    pub fn new(chunk_size: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            idle_timeout,
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now = self.origin.elapsed();
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        now.saturating_sub(last)
    }

    async fn read_chunk<R>(&self, reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let Some(limit) = self.idle_timeout else {
            return reader.read(buf).await;
        };

        loop {
            let wait = limit.saturating_sub(self.idle_for());
            match timeout(wait, reader.read(buf)).await {
                Ok(result) => return result,
                Err(_) if self.idle_for() >= limit => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no traffic for {:?}", limit),
                    ));
                }
                // The other direction was active meanwhile
                Err(_) => continue,
            }
        }
    }

    /// Move bytes from `reader` to `writer` until end-of-stream, flushing
    /// after every chunk. The sink is left open.
    ///
    /// `transferred` is updated as bytes move, so it stays accurate when the
    /// relay fails or is abandoned.
    pub async fn forward<R, W>(&self, reader: &mut R, writer: &mut W, transferred: &AtomicU64) -> io::Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = self.read_chunk(reader, &mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            self.touch();

            writer.write_all(&buf[..n]).await?;
            writer.flush().await?;
            transferred.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    /// Relay `reader` into `writer`, then shut down the write side of `writer`.
    ///
    /// The shutdown happens whether the source ended cleanly or failed, so
    /// the other peer always learns that this direction is finished.
    pub async fn copy<R, W>(&self, reader: &mut R, writer: &mut W, transferred: &AtomicU64) -> io::Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let result = self.forward(reader, writer, transferred).await;

        if let Err(e) = writer.shutdown().await {
            debug!("Half-close of relay sink failed: {}", e);
        }
        result
    }
}
