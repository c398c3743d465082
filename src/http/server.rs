//! HTTP mediation server.
//!
//! # Responsibilities
//! - Serve HTTP/1.1 and HTTP/2 on accepted overlay connections
//! - Resolve the caller identity for every request
//! - Redirect non-canonical hosts
//! - Rewrite forwarding and identity headers
//! - Forward to the upstream and stream the response back
//! - Hand protocol upgrades (101) to a byte tunnel
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → IdleTimeout (per-connection idle deadline)
//!     → hyper auto builder (header read timeout)
//!     → Axum Router (request timeout, tracing)
//!     → proxy_handler: identity → redirect → headers → ReverseProxy
//!     → on 101: both upgraded streams → ConnectionForwarder
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::HOST, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use hyper::{body::Incoming, upgrade::OnUpgrade};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
};
use tower::ServiceExt;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::TimeoutConfig;
use crate::http::forward::ReverseProxy;
use crate::http::redirect::canonical_redirect;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::idle::IdleTimeout;
use crate::net::listener::{accept_backoff, BoxStream, Listener};
use crate::net::{ConnectionForwarder, UpstreamDialer};
use crate::observability::metrics;
use crate::overlay::IdentityProvider;
use crate::security::headers::{
    apply_identity, restore_upgrade, rewrite_forwarding, strip_hop_by_hop, upgrade_protocol,
};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityProvider>,
    pub proxy: ReverseProxy,
    pub forwarder: ConnectionForwarder,
    pub canonical_host: Arc<str>,
    pub encrypted: bool,
    /// Idle bound for upgraded connections.
    pub tunnel_idle: Option<Duration>,
}

/// Identity-injecting HTTP reverse proxy.
pub struct HttpProxy {
    router: Router,
    timeouts: TimeoutConfig,
    tracker: ConnectionTracker,
}

impl HttpProxy {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        dialer: UpstreamDialer,
        forwarder: ConnectionForwarder,
        canonical_host: &str,
        encrypted: bool,
        timeouts: TimeoutConfig,
    ) -> Self {
        let state = AppState {
            identity,
            proxy: ReverseProxy::new(dialer),
            forwarder,
            canonical_host: Arc::from(canonical_host),
            encrypted,
            tunnel_idle: timeouts.http_idle(),
        };
        let router = Self::build_router(state, timeouts.http_request());
        Self {
            router,
            timeouts,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Every request target, `*` included, reaches `proxy_handler`.
    #[allow(deprecated)]
    fn build_router(state: AppState, request_timeout: Option<Duration>) -> Router {
        let router = Router::new().fallback(proxy_handler).with_state(state);
        let router = match request_timeout {
            Some(timeout) => router.layer(TimeoutLayer::new(timeout)),
            None => router,
        };
        router.layer(TraceLayer::new_for_http())
    }

    /// Accept and serve connections until `shutdown` fires.
    ///
    /// Failed accepts are logged and retried. The listener is dropped on
    /// return; connections already being served run to completion.
    pub async fn serve(self, listener: Listener, shutdown: Shutdown) -> io::Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            address = %local_addr,
            encrypted = listener.is_encrypted(),
            "HTTP proxy accepting connections"
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

            let guard = self.tracker.track();
            let router = self.router.clone();
            let idle = self.timeouts.http_idle();
            let read_header = Duration::from_secs(self.timeouts.http_read_header_secs);

            tokio::spawn(async move {
                let _permit = permit;
                let stream: BoxStream = match idle {
                    Some(timeout) => Box::new(IdleTimeout::new(stream, timeout)),
                    None => stream,
                };
                let io = TokioIo::new(stream);
                let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
                    request.extensions_mut().insert(ConnectInfo(peer));
                    router.clone().oneshot(request)
                });

                let mut builder = auto::Builder::new(TokioExecutor::new());
                builder
                    .http1()
                    .timer(TokioTimer::new())
                    .header_read_timeout(read_header);

                if let Err(e) = builder.serve_connection_with_upgrades(io, service).await {
                    tracing::debug!(
                        connection_id = %guard.id(),
                        peer_addr = %peer,
                        error = %e,
                        "HTTP connection ended with error"
                    );
                }
            });
        }

        tracing::info!(address = %local_addr, "HTTP proxy stopped accepting");
        Ok(())
    }
}

/// The host a request is addressed to.
///
/// An absolute-form target's authority wins over the `Host` header.
fn request_host<B>(request: &Request<B>) -> Option<String> {
    request.uri().authority().map(|a| a.as_str().to_owned()).or_else(|| {
        request
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    })
}

/// Main proxy handler.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
) -> Response {
    let start = Instant::now();

    let identity = match state.identity.who_is(peer).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(peer_addr = %peer, error = %e, "Caller identity lookup failed");
            metrics::record_identity_failure();
            metrics::record_request(500, start);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let host = request_host(&request);
    if let Some(redirect) =
        canonical_redirect(host.as_deref(), request.uri(), &state.canonical_host, state.encrypted)
    {
        metrics::record_redirect();
        metrics::record_request(redirect.status().as_u16(), start);
        return redirect;
    }

    let upgrade = upgrade_protocol(request.headers());
    let client_upgrade = upgrade.as_ref().map(|_| hyper::upgrade::on(&mut request));

    let headers = request.headers_mut();
    strip_hop_by_hop(headers);
    if let Some(protocol) = upgrade {
        restore_upgrade(headers, protocol);
    }
    rewrite_forwarding(headers, state.encrypted, &state.canonical_host, peer);
    apply_identity(headers, &identity);

    tracing::debug!(
        peer_addr = %peer,
        login = %identity.login_name,
        method = %request.method(),
        path = %request.uri().path(),
        "Proxying request"
    );

    match state.proxy.forward(request).await {
        Ok(mut response) => {
            if response.status() == StatusCode::SWITCHING_PROTOCOLS {
                let Some(client_upgrade) = client_upgrade else {
                    tracing::warn!(peer_addr = %peer, "Upstream switched protocols unasked");
                    metrics::record_request(502, start);
                    return StatusCode::BAD_GATEWAY.into_response();
                };
                let upstream_upgrade = hyper::upgrade::on(&mut response);
                tokio::spawn(tunnel(
                    state.forwarder.clone(),
                    client_upgrade,
                    upstream_upgrade,
                    state.tunnel_idle,
                    peer,
                ));
            }
            metrics::record_request(response.status().as_u16(), start);
            response
        }
        Err(e) => {
            tracing::error!(
                peer_addr = %peer,
                upstream = %state.proxy.dialer().address(),
                error = %e,
                "Upstream error"
            );
            metrics::record_request(502, start);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Pipe an upgraded connection pair once both sides have switched.
async fn tunnel(
    forwarder: ConnectionForwarder,
    client: OnUpgrade,
    upstream: OnUpgrade,
    idle_timeout: Option<Duration>,
    peer: SocketAddr,
) {
    let (client, upstream) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!(peer_addr = %peer, error = %e, "Protocol upgrade failed");
            return;
        }
    };

    let outcome = forwarder
        .forward(TokioIo::new(client), TokioIo::new(upstream), idle_timeout, peer)
        .await;
    tracing::debug!(
        peer_addr = %peer,
        finished_first = %outcome.finished_first,
        bytes_to_upstream = outcome.bytes_to_upstream,
        bytes_to_client = outcome.bytes_to_client,
        "Upgraded connection closed"
    );
}
