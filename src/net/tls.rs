//! TLS material loading.
//!
//! # Design Decisions
//! - rustls only, no OpenSSL dependency
//! - PEM files are read once at startup; no reloading
//! - The hub does not demand client certificates itself; requiring them is
//!   a deployment policy applied at this layer

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

/// Error type for TLS material handling.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be read.
    #[error("failed to read {path}: {source}")]
    Material {
        path: String,
        source: std::io::Error,
    },

    /// A PEM file held no usable certificates or key.
    #[error("no usable PEM material in {0}")]
    Empty(String),

    /// rustls rejected the assembled configuration.
    #[error("TLS configuration rejected: {0}")]
    Rejected(#[from] rustls::Error),
}

/// Server-side TLS configuration for the hub listeners.
pub fn server_config(
    cert_path: &str,
    key_path: &str,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Client-side TLS configuration for the plug dialer: a custom root store
/// when a CA bundle is given, webpki roots otherwise, plus an optional
/// client certificate.
pub fn client_config(
    ca_path: Option<&str>,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<Arc<rustls::ClientConfig>, TlsError> {
    let mut roots = rustls::RootCertStore::empty();
    match ca_path {
        Some(path) => {
            for cert in load_certs(path)? {
                roots.add(cert)?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let config = match (cert_path, key_path) {
        (Some(cert), Some(key)) => {
            builder.with_client_auth_cert(load_certs(cert)?, load_key(key)?)?
        }
        _ => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Material {
        path: path.to_string(),
        source,
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::Material {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::Empty(path.to_string()));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Material {
        path: path.to_string(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Material {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::Empty(path.to_string()))
}
