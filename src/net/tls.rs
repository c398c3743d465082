//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::net::listener::ListenError;

/// Load a TLS acceptor from PEM certificate chain and private key files.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ListenError> {
    if !cert_path.exists() {
        return Err(ListenError::Tls(format!(
            "certificate file not found: {}",
            cert_path.display()
        )));
    }
    if !key_path.exists() {
        return Err(ListenError::Tls(format!(
            "private key file not found: {}",
            key_path.display()
        )));
    }

    let mut cert_reader = BufReader::new(
        File::open(cert_path)
            .map_err(|e| ListenError::Tls(format!("{}: {}", cert_path.display(), e)))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ListenError::Tls(format!("invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(ListenError::Tls(format!(
            "no certificates in {}",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(
        File::open(key_path)
            .map_err(|e| ListenError::Tls(format!("{}: {}", key_path.display(), e)))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ListenError::Tls(format!("invalid key PEM: {}", e)))?
        .ok_or_else(|| ListenError::Tls(format!("no private key in {}", key_path.display())))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ListenError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
