//! HTTPS for the admin server.
//!
//! Either the operator's PEM certificate and key, or an ephemeral
//! self-signed certificate generated with `rcgen` at startup.

use crate::config::TlsConfig;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Build the rustls configuration for `tls`, serving on `listen_addr`.
pub async fn build_rustls_config(
    tls: &TlsConfig,
    listen_addr: SocketAddr,
) -> Result<RustlsConfig, Box<dyn std::error::Error>> {
    match (&tls.cert_path, &tls.key_path) {
        (Some(cert), Some(key)) => {
            info!(cert = %cert, "loading TLS certificate");
            Ok(RustlsConfig::from_pem_file(cert, key).await?)
        }
        (cert, key) => {
            if cert.is_some() != key.is_some() {
                warn!("tls.cert_path and tls.key_path must be set together; using a self-signed certificate");
            }
            let (cert_pem, key_pem) = self_signed_pem(listen_addr)?;
            Ok(RustlsConfig::from_pem(cert_pem.into_bytes(), key_pem.into_bytes()).await?)
        }
    }
}

/// PEM certificate and key valid for localhost and the listen IP.
pub fn self_signed_pem(listen_addr: SocketAddr) -> Result<(String, String), rcgen::Error> {
    let mut names = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    let ip = listen_addr.ip();
    if !ip.is_unspecified() && !ip.is_loopback() {
        names.push(ip.to_string());
    }

    let params = rcgen::CertificateParams::new(names)?;
    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    warn!("serving HTTPS with a self-signed certificate");
    Ok((cert.pem(), key_pair.serialize_pem()))
}
