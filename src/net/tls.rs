//! TLS acceptor construction from PEM certificate and key files.

use std::path::Path;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::ServeError;

/// Build a TLS acceptor from PEM files on disk.
///
/// TLS termination happens once per physical connection, before protocol
/// classification, so both virtual listeners only ever see decrypted
/// bytes.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ServeError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| ServeError::Tls(format!("reading {}: {e}", cert_path.display())))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| ServeError::Tls(format!("reading {}: {e}", key_path.display())))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| ServeError::Tls(format!("parsing certificate: {e}")))?;
    if certs.is_empty() {
        return Err(ServeError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| ServeError::Tls(format!("parsing private key: {e}")))?
        .ok_or_else(|| ServeError::Tls(format!("no private key found in {}", key_path.display())))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServeError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
