//! Bidirectional stream forwarding.
//!
//! # Responsibilities
//! - Copy bytes client → upstream and upstream → client concurrently
//! - Enforce the idle timeout on both streams
//! - Tear the pair down exactly once, as soon as either direction ends
//!
//! # Design Decisions
//! - Full-duplex close: a clean EOF in one direction ends the other too
//! - The two copy loops race inside one `select!`; the loser is dropped,
//!   which releases its pooled buffer and ends its borrow of the streams
//! - Transfer errors are logged and counted here and never returned

use std::fmt::Display;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::net::buffer_pool::{BufferPool, PooledBuffer};
use crate::net::idle::IdleTimeout;
use crate::observability::metrics;

/// Upper bound on the best-effort shutdown of each stream during teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Which copy loop finished first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client_to_upstream",
            Direction::UpstreamToClient => "upstream_to_client",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a finished forwarding session.
#[derive(Debug)]
pub struct ForwardOutcome {
    /// The direction whose completion triggered teardown.
    pub finished_first: Direction,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
    /// Error that ended the first direction, if it did not end with EOF.
    pub error: Option<io::Error>,
}

impl ForwardOutcome {
    pub fn timed_out(&self) -> bool {
        matches!(&self.error, Some(e) if e.kind() == io::ErrorKind::TimedOut)
    }
}

/// Pipes bytes between two duplex streams.
#[derive(Debug, Clone)]
pub struct ConnectionForwarder {
    pool: Arc<BufferPool>,
}

impl ConnectionForwarder {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }

    /// Forward between `client` and `upstream` until either side finishes.
    ///
    /// When `idle_timeout` is set and non-zero, both streams fail pending I/O
    /// after that long without traffic. Both streams are shut down and
    /// dropped before this returns.
    pub async fn forward<A, B>(
        &self,
        client: A,
        upstream: B,
        idle_timeout: Option<Duration>,
        peer: impl Display + Send + Sync,
    ) -> ForwardOutcome
    where
        A: AsyncRead + AsyncWrite + Send + Unpin,
        B: AsyncRead + AsyncWrite + Send + Unpin,
    {
        match idle_timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => {
                self.pipe(
                    IdleTimeout::new(client, timeout),
                    IdleTimeout::new(upstream, timeout),
                    &peer,
                )
                .await
            }
            None => self.pipe(client, upstream, &peer).await,
        }
    }

    async fn pipe<A, B>(
        &self,
        client: A,
        upstream: B,
        peer: &(dyn Display + Sync),
    ) -> ForwardOutcome
    where
        A: AsyncRead + AsyncWrite + Send + Unpin,
        B: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

        let mut bytes_to_upstream = 0u64;
        let mut bytes_to_client = 0u64;

        // Both buffers are taken up front so each is released on every path,
        // including a loop that loses the race before its first poll.
        let up_buf = self.pool.acquire();
        let down_buf = self.pool.acquire();

        let (finished_first, result) = {
            let to_upstream = copy_pooled(
                up_buf,
                &mut client_read,
                &mut upstream_write,
                &mut bytes_to_upstream,
            );
            let to_client = copy_pooled(
                down_buf,
                &mut upstream_read,
                &mut client_write,
                &mut bytes_to_client,
            );
            tokio::pin!(to_upstream, to_client);

            tokio::select! {
                res = &mut to_upstream => (Direction::ClientToUpstream, res),
                res = &mut to_client => (Direction::UpstreamToClient, res),
            }
        };

        // Single teardown: the losing loop is gone, close both ends once.
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, upstream_write.shutdown()).await;
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, client_write.shutdown()).await;
        drop((client_read, client_write, upstream_read, upstream_write));

        metrics::record_bytes(bytes_to_upstream, bytes_to_client);

        let error = match result {
            Ok(()) => {
                tracing::debug!(
                    peer = %peer,
                    finished_first = %finished_first,
                    bytes_to_upstream,
                    bytes_to_client,
                    "Forwarding finished"
                );
                None
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                tracing::info!(
                    peer = %peer,
                    direction = %finished_first,
                    "Connection idle, closing"
                );
                metrics::record_transfer_error("timeout");
                Some(e)
            }
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    direction = %finished_first,
                    error = %e,
                    "Transfer failed"
                );
                metrics::record_transfer_error("io");
                Some(e)
            }
        };

        ForwardOutcome {
            finished_first,
            bytes_to_upstream,
            bytes_to_client,
            error,
        }
    }
}

/// Copy `reader` into `writer` through `buf` until EOF or error.
async fn copy_pooled<R, W>(
    mut buf: PooledBuffer,
    reader: &mut R,
    writer: &mut W,
    copied: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.flush().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
}
