//! Orchestration tests for `ProxyCore`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use ts_proxy::config::{ConfigError, ProxyConfig, ValidationError};
use ts_proxy::net::{ListenError, ListenerMode};
use ts_proxy::overlay::{LocalOverlay, StaticIdentityProvider};
use ts_proxy::{ProxyCore, ProxyError};

mod common;

fn core_with(config: ProxyConfig, overlay: LocalOverlay) -> Result<ProxyCore, ProxyError> {
    ProxyCore::new(config, Arc::new(overlay), Arc::new(StaticIdentityProvider::new()))
}

#[tokio::test]
async fn missing_upstream_is_fatal_before_listening() {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = Some("127.0.0.1:0".into());

    let err = core_with(config, LocalOverlay::new("tsproxy", None)).err().unwrap();
    match err {
        ProxyError::Config(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| matches!(e, ValidationError::MissingUpstream)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn public_exposure_without_grant_fails_and_shuts_down() {
    let upstream = common::start_echo_backend().await;
    let mut config = common::proxy_config(upstream, false);
    config.listener.public_exposure = true;

    let core = core_with(config, LocalOverlay::new("tsproxy", None)).unwrap();
    let shutdown = core.shutdown_handle();
    let err = core.run().await.unwrap_err();

    assert!(matches!(
        err,
        ProxyError::Listen(ListenError::NotPermitted(ListenerMode::PubliclyExposed))
    ));
    assert!(shutdown.is_triggered());
}

#[tokio::test]
async fn encryption_without_certificate_is_a_listen_error() {
    let upstream = common::start_echo_backend().await;
    let mut config = common::proxy_config(upstream, true);
    config.listener.encryption = true;

    let core = core_with(config, LocalOverlay::new("tsproxy", None)).unwrap();
    let err = core.start().await.err().unwrap();
    assert!(matches!(err, ProxyError::Listen(ListenError::Tls(_))));
}

#[tokio::test]
async fn tcp_mode_runs_until_shutdown() {
    let upstream = common::start_echo_backend().await;
    let core = core_with(
        common::proxy_config(upstream, false),
        LocalOverlay::new("tsproxy", None),
    )
    .unwrap();
    let running = core.start().await.unwrap();
    assert_eq!(running.mode(), ListenerMode::Plain);
    let addr = running.local_addr();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    let shutdown = running.shutdown_handle();
    let waiter = tokio::spawn(running.wait());
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}
