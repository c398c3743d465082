//! End-to-end tests for the TLS-terminating listener modes.

use std::time::Duration;

use ts_proxy::net::ListenerMode;
use ts_proxy::overlay::{LocalOverlay, StaticIdentityProvider};
use ts_proxy::ProxyConfig;

mod common;

fn known_alice() -> StaticIdentityProvider {
    StaticIdentityProvider::new().with(common::LOCALHOST, common::alice())
}

fn tls_config(upstream: std::net::SocketAddr, cert: &common::TestCert) -> ProxyConfig {
    let mut config = common::proxy_config(upstream, true);
    config.node.hostname = "localhost".into();
    config.listener.encryption = true;
    config.listener.tls = Some(cert.config.clone());
    config
}

#[tokio::test]
async fn encrypted_listener_reports_https_upstream() {
    let cert = common::TestCert::generate("encrypted-forward");
    let (upstream, mut heads) = common::start_recording_backend().await;
    let config = tls_config(upstream, &cert);
    let overlay = LocalOverlay::from_config(&config);
    let proxy = common::start_proxy_on(config, overlay, known_alice()).await;
    assert_eq!(proxy.mode(), ListenerMode::Encrypted);

    let response = common::tls_request(
        proxy.local_addr(),
        &cert,
        "GET /secure HTTP/1.1\r\n\
         Host: localhost\r\n\
         X-Forwarded-Proto: http\r\n\
         Connection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("ok"));

    let head = tokio::time::timeout(Duration::from_secs(5), heads.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(head.starts_with("GET /secure HTTP/1.1\r\n"), "{head}");
    assert!(head.contains("X-Forwarded-Proto: https\r\n"));
    assert!(head.contains("X-Forwarded-Host: localhost\r\n"));
    assert!(head.contains("Tailscale-User-Login: alice@example.com\r\n"));
    assert_eq!(head.to_ascii_lowercase().matches("x-forwarded-proto:").count(), 1);

    proxy.shutdown_handle().trigger();
    proxy.wait().await.unwrap();
}

#[tokio::test]
async fn encrypted_listener_redirects_to_https() {
    let cert = common::TestCert::generate("encrypted-redirect");
    let (upstream, mut heads) = common::start_recording_backend().await;
    let config = tls_config(upstream, &cert);
    let overlay = LocalOverlay::from_config(&config);
    let proxy = common::start_proxy_on(config, overlay, known_alice()).await;

    let response = common::tls_request(
        proxy.local_addr(),
        &cert,
        "GET /a/b?c=d HTTP/1.1\r\nHost: other.example\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 301 Moved Permanently\r\n"), "{response}");
    assert!(response
        .to_ascii_lowercase()
        .contains("location: https://localhost/a/b?c=d\r\n"));
    assert!(heads.try_recv().is_err());
}

#[tokio::test]
async fn public_exposure_terminates_tls() {
    let cert = common::TestCert::generate("public");
    let (upstream, mut heads) = common::start_recording_backend().await;
    let mut config = tls_config(upstream, &cert);
    config.listener.encryption = false;
    config.listener.public_exposure = true;
    config.listener.allow_public_exposure = true;
    let overlay = LocalOverlay::from_config(&config);
    let proxy = common::start_proxy_on(config, overlay, known_alice()).await;
    assert_eq!(proxy.mode(), ListenerMode::PubliclyExposed);

    let response = common::tls_request(
        proxy.local_addr(),
        &cert,
        "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");

    let head = tokio::time::timeout(Duration::from_secs(5), heads.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(head.contains("X-Forwarded-Proto: https\r\n"), "{head}");
}
