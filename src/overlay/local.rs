//! Development overlay backed by the host network stack.
//!
//! Plain mode binds a TCP socket directly. Encrypted and publicly exposed
//! modes terminate TLS with a configured certificate; handshakes run on
//! their own tasks so a slow client cannot stall the accept loop.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::config::ProxyConfig;
use crate::net::listener::{
    accept_backoff, normalize_bind_address, BoxListener, BoxStream, ListenError, ListenerMode,
    OverlayListener,
};
use crate::net::tls::load_tls_acceptor;
use crate::overlay::OverlayListenerProvider;

/// Upper bound on a single TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshaked streams waiting for `accept`.
const ACCEPT_BACKLOG: usize = 128;

/// Overlay provider that listens on local interfaces.
#[derive(Debug, Clone)]
pub struct LocalOverlay {
    hostnames: Vec<String>,
    tls: Option<(PathBuf, PathBuf)>,
    allow_public_exposure: bool,
}

impl LocalOverlay {
    /// Create an overlay node named `hostname`, optionally inside `domain`.
    pub fn new(hostname: &str, domain: Option<&str>) -> Self {
        let mut hostnames = Vec::new();
        if let Some(domain) = domain.filter(|d| !d.is_empty()) {
            hostnames.push(format!("{}.{}", hostname, domain.trim_start_matches('.')));
        }
        hostnames.push(hostname.to_string());
        Self {
            hostnames,
            tls: None,
            allow_public_exposure: false,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        let mut overlay = Self::new(&config.node.hostname, config.node.domain.as_deref());
        if let Some(tls) = &config.listener.tls {
            overlay = overlay.with_tls(tls.cert_path.clone(), tls.key_path.clone());
        }
        overlay.with_public_exposure(config.listener.allow_public_exposure)
    }

    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = Some((cert_path.into(), key_path.into()));
        self
    }

    /// Grant (or revoke) the right to listen in publicly exposed mode.
    pub fn with_public_exposure(mut self, allowed: bool) -> Self {
        self.allow_public_exposure = allowed;
        self
    }

    async fn bind(network: &str, address: &str) -> Result<TcpListener, ListenError> {
        if !matches!(network, "tcp" | "tcp4" | "tcp6") {
            return Err(ListenError::UnsupportedNetwork(network.to_string()));
        }
        let address = normalize_bind_address(address);
        TcpListener::bind(address.as_str())
            .await
            .map_err(|source| ListenError::Bind { address, source })
    }

    async fn listen_tls(&self, network: &str, address: &str) -> Result<BoxListener, ListenError> {
        let (cert, key) = self.tls.as_ref().ok_or_else(|| {
            ListenError::Tls(
                "encrypted listening requires listener.tls cert_path and key_path".into(),
            )
        })?;
        let acceptor = load_tls_acceptor(cert, key)?;
        let listener = Self::bind(network, address).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenError::Bind {
                address: address.to_string(),
                source,
            })?;
        Ok(Box::new(TlsListener::spawn(listener, local_addr, acceptor)))
    }
}

#[async_trait]
impl OverlayListenerProvider for LocalOverlay {
    async fn listen_plain(&self, network: &str, address: &str) -> Result<BoxListener, ListenError> {
        let listener = Self::bind(network, address).await?;
        Ok(Box::new(PlainListener { inner: listener }))
    }

    async fn listen_encrypted(
        &self,
        network: &str,
        address: &str,
    ) -> Result<BoxListener, ListenError> {
        self.listen_tls(network, address).await
    }

    async fn listen_publicly_exposed(
        &self,
        network: &str,
        address: &str,
    ) -> Result<BoxListener, ListenError> {
        if !self.allow_public_exposure {
            return Err(ListenError::NotPermitted(ListenerMode::PubliclyExposed));
        }
        self.listen_tls(network, address).await
    }

    fn canonical_hostnames(&self) -> Vec<String> {
        self.hostnames.clone()
    }
}

struct PlainListener {
    inner: TcpListener,
}

#[async_trait]
impl OverlayListener for PlainListener {
    async fn accept(&self) -> io::Result<(BoxStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true).ok();
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn is_encrypted(&self) -> bool {
        false
    }
}

struct TlsListener {
    local_addr: SocketAddr,
    incoming: Mutex<mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>>,
    task: JoinHandle<()>,
}

impl TlsListener {
    fn spawn(listener: TcpListener, local_addr: SocketAddr, acceptor: TlsAcceptor) -> Self {
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        accept_backoff(&e).await;
                        continue;
                    }
                };
                if tx.is_closed() {
                    break;
                }
                stream.set_nodelay(true).ok();

                let acceptor = acceptor.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                        Ok(Ok(tls)) => {
                            let _ = tx.send((tls, peer)).await;
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(peer = %peer, error = %e, "TLS handshake failed");
                        }
                        Err(_) => {
                            tracing::debug!(peer = %peer, "TLS handshake timed out");
                        }
                    }
                });
            }
        });

        Self {
            local_addr,
            incoming: Mutex::new(rx),
            task,
        }
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl OverlayListener for TlsListener {
    async fn accept(&self) -> io::Result<(BoxStream, SocketAddr)> {
        let (stream, peer) = self
            .incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::other("TLS listener closed"))?;
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn is_encrypted(&self) -> bool {
        true
    }
}
