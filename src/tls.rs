//! TLS termination: load a server certificate/key (and optionally a client
//! CA for mutual TLS) into a `rustls::ServerConfig`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::rustls::{self, pki_types::CertificateDer, RootCertStore};
use tokio_rustls::TlsAcceptor;

use crate::config::Config;

/// Build a `TlsAcceptor` from the configured certificate/key files, and, if
/// `enable_tls_client_auth` is set, require and verify client certificates
/// against `tls_ca_crt_file`.
pub fn load_tls_config(config: &Config) -> Result<TlsAcceptor, TlsError> {
    let crt_path = config
        .tls_crt_file
        .as_deref()
        .ok_or(TlsError::MissingCert)?;
    let key_path = config
        .tls_key_file
        .as_deref()
        .ok_or(TlsError::MissingKey)?;

    let cert_chain = load_certs(crt_path)?;
    let key = load_private_key(key_path)?;

    let builder = rustls::ServerConfig::builder();

    let mut server_config = if config.enable_tls_client_auth {
        let ca_path = config
            .tls_ca_crt_file
            .as_deref()
            .ok_or(TlsError::MissingClientCa)?;
        let expanded = crate::net::expand_home(ca_path);
        let ca_certs = load_certs(&expanded)?;
        let mut roots = RootCertStore::empty();
        for cert in ca_certs {
            roots
                .add(cert)
                .map_err(|e| TlsError::InvalidCa(e.to_string()))?;
        }
        let verifier = tokio_rustls::rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TlsError::InvalidCa(e.to_string()))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(cert_chain, key)
            .map_err(|e| TlsError::InvalidKeyPair(e.to_string()))?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| TlsError::InvalidKeyPair(e.to_string()))?
    };

    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::FileRead(path.to_path_buf(), e.to_string()))?;
    let mut reader = BufReader::new(file);
    certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Parse(path.to_path_buf(), e.to_string()))
}

fn load_private_key(
    path: &Path,
) -> Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::FileRead(path.to_path_buf(), e.to_string()))?;
    let mut reader = BufReader::new(file);
    let mut keys = pkcs8_private_keys(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Parse(path.to_path_buf(), e.to_string()))?;
    let key = keys.pop().ok_or(TlsError::MissingKey)?;
    Ok(tokio_rustls::rustls::pki_types::PrivateKeyDer::Pkcs8(key))
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("enable_tls requires tls_crt_file")]
    MissingCert,
    #[error("enable_tls requires tls_key_file")]
    MissingKey,
    #[error("enable_tls_client_auth requires tls_ca_crt_file")]
    MissingClientCa,
    #[error("failed to read {0}: {1}")]
    FileRead(std::path::PathBuf, String),
    #[error("failed to parse PEM file {0}: {1}")]
    Parse(std::path::PathBuf, String),
    #[error("invalid client CA: {0}")]
    InvalidCa(String),
    #[error("invalid certificate/key pair: {0}")]
    InvalidKeyPair(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_file_is_rejected() {
        let mut config = Config::default();
        config.enable_tls = true;
        config.tls_key_file = Some("/tmp/key.pem".into());
        assert!(matches!(load_tls_config(&config), Err(TlsError::MissingCert)));
    }

    #[test]
    fn missing_key_file_is_rejected() {
        let mut config = Config::default();
        config.enable_tls = true;
        config.tls_crt_file = Some("/tmp/crt.pem".into());
        assert!(matches!(load_tls_config(&config), Err(TlsError::MissingKey)));
    }

    #[test]
    fn nonexistent_cert_file_is_a_file_read_error() {
        let mut config = Config::default();
        config.enable_tls = true;
        config.tls_crt_file = Some("/nonexistent/crt.pem".into());
        config.tls_key_file = Some("/nonexistent/key.pem".into());
        assert!(matches!(load_tls_config(&config), Err(TlsError::FileRead(_, _))));
    }
}
