//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use ts_proxy::config::{ProxyConfig, TlsConfig};
use ts_proxy::lifecycle::RunningProxy;
use ts_proxy::net::listener::{BoxStream, OverlayListener};
use ts_proxy::overlay::{CallerIdentity, LocalOverlay, StaticIdentityProvider};
use ts_proxy::ProxyCore;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub fn alice() -> CallerIdentity {
    CallerIdentity {
        login_name: "alice@example.com".into(),
        display_name: "Alice Example".into(),
        profile_pic_url: "https://example.com/alice.png".into(),
    }
}

/// Read one HTTP request, returning its head. The body is drained by
/// `Content-Length` so closing the socket afterwards is clean.
pub async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return String::from_utf8_lossy(&data).into_owned();
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut remaining = content_length.saturating_sub(data.len() - head_end);
    while remaining > 0 {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }
    head
}

/// Start a backend that reports each raw request head and answers 200 "ok".
pub async fn start_recording_backend() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = read_request(&mut socket).await;
                let _ = tx.send(head);
                let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                let _ = socket.write_all(reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Start a backend that accepts any protocol upgrade, then echoes bytes.
///
/// Each raw upgrade request head is reported on the channel.
pub async fn start_upgrade_backend() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = read_request(&mut socket).await;
                let _ = tx.send(head);
                let switched = socket
                    .write_all(
                        b"HTTP/1.1 101 Switching Protocols\r\n\
                          Connection: upgrade\r\n\
                          Upgrade: websocket\r\n\r\n",
                    )
                    .await;
                if switched.is_ok() {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                }
            });
        }
    });

    (addr, rx)
}

/// Start a raw TCP echo backend.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Plain-mode config forwarding to `upstream` from an ephemeral local port.
pub fn proxy_config(upstream: SocketAddr, http: bool) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.upstream.address = upstream.to_string();
    config.listener.bind_address = Some("127.0.0.1:0".into());
    config.listener.http = http;
    config
}

/// Start a proxy on a local overlay named `hostname`.
pub async fn start_proxy(
    config: ProxyConfig,
    hostname: &str,
    identities: StaticIdentityProvider,
) -> RunningProxy {
    start_proxy_on(config, LocalOverlay::new(hostname, None), identities).await
}

pub async fn start_proxy_on(
    config: ProxyConfig,
    overlay: LocalOverlay,
    identities: StaticIdentityProvider,
) -> RunningProxy {
    ProxyCore::new(config, Arc::new(overlay), Arc::new(identities))
        .unwrap()
        .start()
        .await
        .unwrap()
}

/// A self-signed certificate for `localhost`, written out as PEM files.
pub struct TestCert {
    pub config: TlsConfig,
    pub der: Vec<u8>,
    dir: PathBuf,
}

impl TestCert {
    pub fn generate(name: &str) -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = std::env::temp_dir().join(format!("ts-proxy-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

        Self {
            config: TlsConfig {
                cert_path,
                key_path,
            },
            der: certified.cert.der().to_vec(),
            dir,
        }
    }
}

impl Drop for TestCert {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Send a raw HTTP/1.1 request over TLS, trusting only `cert`.
pub async fn tls_request(addr: SocketAddr, cert: &TestCert, request: &str) -> String {
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(cert.der.clone())).unwrap();
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector.connect(server_name, tcp).await.unwrap();
    tls.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    // A peer that closes without close_notify still leaves the bytes read.
    let _ = tls.read_to_end(&mut response).await;
    String::from_utf8_lossy(&response).into_owned()
}

/// A loopback listener whose first `failures` accepts fail with EMFILE.
pub struct FlakyListener {
    inner: TcpListener,
    failures: AtomicUsize,
}

impl FlakyListener {
    pub async fn bind(failures: usize) -> Self {
        Self {
            inner: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl OverlayListener for FlakyListener {
    async fn accept(&self) -> io::Result<(BoxStream, SocketAddr)> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(io::Error::from_raw_os_error(24));
        }
        let (stream, peer) = self.inner.accept().await?;
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn is_encrypted(&self) -> bool {
        false
    }
}

/// Send a raw HTTP/1.1 request and return the full response text.
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    socket.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
