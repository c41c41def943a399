//! # TLS Configuration
//!
//! Mutual-identity TLS: the server presents its certificate and verifies
//! every inbound client against the configured CA; clients do the inverse.
//! Key material is loaded from PEM files at well-known relative paths.

use crate::codec::RpcError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Locations of the PEM files making up one side's identity.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    /// Own certificate chain.
    pub cert: PathBuf,
    /// Own private key.
    pub key: PathBuf,
    /// CA bundle the peer's certificate must chain to.
    pub ca: PathBuf,
}

impl Default for TlsFiles {
    fn default() -> Self {
        Self {
            cert: PathBuf::from("certs/server.crt"),
            key: PathBuf::from("certs/server.key"),
            ca: PathBuf::from("certs/ca.crt"),
        }
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RpcError> {
    let file = File::open(path)
        .map_err(|e| RpcError::Tls(format!("open {}: {e}", path.display())))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RpcError::Tls(format!("parse {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, RpcError> {
    let file = File::open(path)
        .map_err(|e| RpcError::Tls(format!("open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| RpcError::Tls(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| RpcError::Tls(format!("no private key in {}", path.display())))
}

fn load_roots(path: &Path) -> Result<RootCertStore, RpcError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| RpcError::Tls(format!("ca {}: {e}", path.display())))?;
    }
    Ok(roots)
}

/// Server-side config: own cert/key, inbound clients verified against the CA.
pub fn server_tls_config(files: &TlsFiles) -> Result<Arc<ServerConfig>, RpcError> {
    let roots = load_roots(&files.ca)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| RpcError::Tls(format!("client verifier: {e}")))?;
    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(&files.cert)?, load_key(&files.key)?)
        .map_err(|e| RpcError::Tls(format!("server identity: {e}")))?;
    Ok(Arc::new(config))
}

/// Client-side config: server verified against the CA, own cert presented.
pub fn client_tls_config(files: &TlsFiles) -> Result<Arc<ClientConfig>, RpcError> {
    let roots = load_roots(&files.ca)?;
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(load_certs(&files.cert)?, load_key(&files.key)?)
        .map_err(|e| RpcError::Tls(format!("client identity: {e}")))?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let files = TlsFiles::default();
        assert_eq!(files.cert, PathBuf::from("certs/server.crt"));
        assert_eq!(files.key, PathBuf::from("certs/server.key"));
        assert_eq!(files.ca, PathBuf::from("certs/ca.crt"));
    }

    #[test]
    fn test_missing_files_error() {
        let files = TlsFiles {
            cert: PathBuf::from("/nonexistent/server.crt"),
            key: PathBuf::from("/nonexistent/server.key"),
            ca: PathBuf::from("/nonexistent/ca.crt"),
        };
        assert!(matches!(server_tls_config(&files), Err(RpcError::Tls(_))));
    }
}
