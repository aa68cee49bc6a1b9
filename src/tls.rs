use std::path::Path;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use tracing::debug;

/// Both `ring` and `aws-lc-rs` end up compiled in through `reqwest` and
/// `axum-server`, so rustls cannot pick a provider on its own.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("A rustls crypto provider is already installed");
    }
}

pub async fn load_rustls_config(cert: &Path, key: &Path) -> Result<RustlsConfig> {
    install_crypto_provider();
    RustlsConfig::from_pem_file(cert, key).await.with_context(|| {
        format!(
            "Failed to load TLS certificate {} and key {}",
            cert.display(),
            key.display()
        )
    })
}
