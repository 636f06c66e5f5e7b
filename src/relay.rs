//! Bidirectional byte relay between a client and its upstream
//!
//! Each direction runs as its own task with a pooled buffer. The first
//! direction to finish ends the relay: the other task is aborted and awaited
//! so that every stream half has been dropped by the time `relay` returns.

use crate::error::Socks5Error;
use crate::pool::BufferPool;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => f.write_str("client->upstream"),
            Direction::UpstreamToClient => f.write_str("upstream->client"),
        }
    }
}

/// RelayStats reports what moved before the relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Direction whose completion ended the relay
    pub finished_first: Direction,
    pub from_client: u64,
    pub from_upstream: u64,
}

/// relay copies bytes both ways until either direction hits end-of-stream
/// or an error. End-of-stream is a normal finish; an I/O error on the first
/// direction to finish becomes RelayError
pub async fn relay<C, U>(client: C, upstream: U, pool: &BufferPool) -> Result<RelayStats, Socks5Error>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let from_client = Arc::new(AtomicU64::new(0));
    let from_upstream = Arc::new(AtomicU64::new(0));

    let mut tasks = JoinSet::new();
    tasks.spawn(copy_direction(
        Direction::ClientToUpstream,
        client_read,
        upstream_write,
        pool.clone(),
        Arc::clone(&from_client),
    ));
    tasks.spawn(copy_direction(
        Direction::UpstreamToClient,
        upstream_read,
        client_write,
        pool.clone(),
        Arc::clone(&from_upstream),
    ));

    let first = tasks.join_next().await;

    // Abort the direction still running and wait for it to drop its halves
    tasks.shutdown().await;

    let (finished_first, result) = match first {
        Some(Ok(done)) => done,
        Some(Err(join_err)) => return Err(Socks5Error::RelayError(io::Error::other(join_err))),
        None => return Err(Socks5Error::RelayError(io::Error::other("relay tasks missing"))),
    };

    let stats = RelayStats {
        finished_first,
        from_client: from_client.load(Ordering::Relaxed),
        from_upstream: from_upstream.load(Ordering::Relaxed),
    };

    match result {
        Ok(()) => Ok(stats),
        Err(e) => {
            debug!("{finished_first} failed: {e}");
            Err(Socks5Error::RelayError(e))
        }
    }
}

/// copy_direction moves bytes from reader to writer until end-of-stream or
/// error, then shuts the writer down
async fn copy_direction<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    pool: BufferPool,
    copied: Arc<AtomicU64>,
) -> (Direction, io::Result<()>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = pool.checkout();

    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            break Err(e);
        }
        copied.fetch_add(n as u64, Ordering::Relaxed);
    };

    // Peer may already be gone
    let _ = writer.shutdown().await;

    debug!("{direction} finished after {} bytes", copied.load(Ordering::Relaxed));
    (direction, result)
}
