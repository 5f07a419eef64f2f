//! TLS client configuration.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::warn;

use crate::error::NetError;

/// Builds a TLS connector with native roots and an optional PEM client
/// certificate. When `client_key` is absent, the key is read from the
/// certificate file.
pub fn connector(
    client_cert: Option<&Path>,
    client_key: Option<&Path>,
) -> Result<TlsConnector, NetError> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!(error = %e, "Failed to add root cert");
        }
    }
    for e in &native.errors {
        warn!(error = %e, "Error loading native certs");
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let config = match client_cert {
        Some(cert_path) => {
            let chain = load_certs(cert_path)?;
            let key_path = client_key.unwrap_or(cert_path);
            let key = load_key(key_path)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(NetError::Tls)?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, NetError> {
    let data = std::fs::read(path)
        .map_err(|e| NetError::path(path, format!("can't load client certificate: {e}")))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut data.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| NetError::path(path, format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(NetError::path(path, "no certificates in file"));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, NetError> {
    let data = std::fs::read(path)
        .map_err(|e| NetError::path(path, format!("can't load private key: {e}")))?;
    rustls_pemfile::private_key(&mut data.as_slice())
        .map_err(|e| NetError::path(path, format!("invalid key PEM: {e}")))?
        .ok_or_else(|| NetError::path(path, "no private key in file"))
}
