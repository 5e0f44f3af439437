//! TLS termination for the proxy listener.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

/// Load the listener's certificate chain and private key (PEM).
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<RustlsConfig> {
    for (what, path) in [("certificate", cert_path), ("private key", key_path)] {
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("TLS {} not found: {}", what, path.display()),
            ));
        }
    }

    let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    tracing::info!(cert = %cert_path.display(), "TLS certificate loaded");
    Ok(config)
}
