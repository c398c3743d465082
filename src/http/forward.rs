//! Request forwarding to the configured upstream.
//!
//! # Responsibilities
//! - Keep a pool of HTTP/1.1 connections to the upstream
//! - Send each request over a pooled connection, dialing through
//!   `UpstreamDialer` when none is idle
//! - Stream the response back without buffering
//!
//! # Design Decisions
//! - The connector ignores the request URI; every connection goes to the one
//!   configured upstream, so the pool key is a fixed placeholder authority
//! - The client's `Host` is preserved and never synthesized from that key
//! - Header names go out Title-Case, the way most origin servers expect
//! - Request headers are sent as given; callers sanitize beforehand
//! - A `101 Switching Protocols` response keeps its `Upgrade` and
//!   `Connection: upgrade` headers so the caller can complete the upgrade

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::Body,
    http::{
        header::HOST,
        uri::{Authority, InvalidUriParts, Parts, PathAndQuery, Scheme},
        HeaderValue, Request, Response, StatusCode, Uri, Version,
    },
};
use hyper_util::{
    client::legacy::{
        connect::{Connected, Connection},
        Client,
    },
    rt::{TokioExecutor, TokioIo, TokioTimer},
};
use thiserror::Error;
use tower::Service;

use crate::net::{BoxStream, DialError, UpstreamDialer};
use crate::observability::metrics;
use crate::security::headers::{restore_upgrade, strip_hop_by_hop, upgrade_protocol};

/// Authority used as the connection-pool key for the single upstream.
const UPSTREAM_AUTHORITY: &str = "upstream";

/// How long an unused upstream connection stays in the pool.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Failures while talking to the upstream.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("could not connect to upstream: {0}")]
    Connect(#[source] hyper_util::client::legacy::Error),

    #[error("upstream request failed: {0}")]
    Request(#[source] hyper_util::client::legacy::Error),

    #[error("invalid upstream URI: {0}")]
    Uri(#[from] InvalidUriParts),
}

impl From<hyper_util::client::legacy::Error> for ForwardError {
    fn from(e: hyper_util::client::legacy::Error) -> Self {
        if e.is_connect() {
            ForwardError::Connect(e)
        } else {
            ForwardError::Request(e)
        }
    }
}

/// Connector for the pooled client: every URI resolves to the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    dialer: UpstreamDialer,
}

impl Service<Uri> for UpstreamConnector {
    type Response = UpstreamConnection;
    type Error = DialError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        let dialer = self.dialer.clone();
        Box::pin(async move {
            match dialer.dial().await {
                Ok(stream) => Ok(UpstreamConnection(TokioIo::new(stream))),
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream dial failed");
                    metrics::record_dial_failure();
                    Err(e)
                }
            }
        })
    }
}

/// A dialed upstream stream, adapted to hyper's I/O traits.
pub struct UpstreamConnection(TokioIo<BoxStream>);

impl Connection for UpstreamConnection {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for UpstreamConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.0), cx, buf)
    }
}

impl hyper::rt::Write for UpstreamConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.0), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.0), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.0), cx)
    }
}

/// Single-upstream reverse proxy.
#[derive(Clone)]
pub struct ReverseProxy {
    dialer: UpstreamDialer,
    client: Client<UpstreamConnector, Body>,
}

impl ReverseProxy {
    pub fn new(dialer: UpstreamDialer) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .set_host(false)
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(UpstreamConnector {
                dialer: dialer.clone(),
            });
        Self { dialer, client }
    }

    pub fn dialer(&self) -> &UpstreamDialer {
        &self.dialer
    }

    /// Forward `request` and return the upstream response.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let request = into_upstream_form(request)?;
        let response = self.client.request(request).await?;

        let (mut parts, body) = response.into_parts();
        let upgrade = if parts.status == StatusCode::SWITCHING_PROTOCOLS {
            upgrade_protocol(&parts.headers)
        } else {
            None
        };
        strip_hop_by_hop(&mut parts.headers);
        if let Some(protocol) = upgrade {
            restore_upgrade(&mut parts.headers, protocol);
        }
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Rewrite a request for the pooled HTTP/1.1 client.
///
/// HTTP/2 requests carry their host in the URI authority; it moves to `Host`.
/// The client sends origin-form on the wire.
fn into_upstream_form(mut request: Request<Body>) -> Result<Request<Body>, InvalidUriParts> {
    if !request.headers().contains_key(HOST) {
        let authority = request
            .uri()
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok());
        if let Some(value) = authority {
            request.headers_mut().insert(HOST, value);
        }
    }

    let mut parts = Parts::default();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(Authority::from_static(UPSTREAM_AUTHORITY));
    parts.path_and_query = Some(
        request
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/")),
    );
    *request.uri_mut() = Uri::from_parts(parts)?;
    *request.version_mut() = Version::HTTP_11;
    Ok(request)
}
