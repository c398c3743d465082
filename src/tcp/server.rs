//! Byte-level proxy from overlay connections to the upstream.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{accept_backoff, BoxStream, ConnectionPermit, Listener};
use crate::net::{ConnectionForwarder, UpstreamDialer};
use crate::observability::metrics;

/// Forwards every accepted connection to one upstream.
#[derive(Debug, Clone)]
pub struct TcpProxy {
    dialer: UpstreamDialer,
    forwarder: ConnectionForwarder,
    idle_timeout: Option<Duration>,
    tracker: ConnectionTracker,
}

impl TcpProxy {
    pub fn new(
        dialer: UpstreamDialer,
        forwarder: ConnectionForwarder,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            dialer,
            forwarder,
            idle_timeout,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Accept and forward connections until `shutdown` fires.
    ///
    /// Each connection runs in its own task. Neither a failed accept nor a
    /// failed connection stops the loop. The listener is dropped on return.
    pub async fn serve(self, listener: Listener, shutdown: Shutdown) -> io::Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            address = %local_addr,
            upstream = %self.dialer.address(),
            idle_timeout = ?self.idle_timeout,
            "TCP proxy accepting connections"
        );

        let mut signal = shutdown.subscribe();
        loop {
            let (stream, peer, permit) = tokio::select! {
                _ = signal.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        accept_backoff(&e).await;
                        continue;
                    }
                },
            };

            let proxy = self.clone();
            tokio::spawn(async move { proxy.handle(stream, peer, permit).await });
        }

        tracing::info!(address = %local_addr, "TCP proxy stopped accepting");
        Ok(())
    }

    async fn handle(&self, client: BoxStream, peer: SocketAddr, _permit: ConnectionPermit) {
        let guard = self.tracker.track();
        let connection_id = guard.id();

        let upstream = match self.dialer.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    peer_addr = %peer,
                    error = %e,
                    "Upstream dial failed, closing client"
                );
                metrics::record_dial_failure();
                return;
            }
        };

        tracing::debug!(connection_id = %connection_id, peer_addr = %peer, "Forwarding connection");
        let outcome = self
            .forwarder
            .forward(client, upstream, self.idle_timeout, peer)
            .await;
        tracing::debug!(
            connection_id = %connection_id,
            peer_addr = %peer,
            finished_first = %outcome.finished_first,
            bytes_to_upstream = outcome.bytes_to_upstream,
            bytes_to_client = outcome.bytes_to_client,
            "Connection closed"
        );
    }
}
