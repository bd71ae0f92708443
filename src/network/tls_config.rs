use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::info;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::configuration::types::TlsFiles;
use crate::error_handling::types::ConfigError;

/// Builds the acceptor used by the TLS listener from a PEM certificate chain
/// and a PEM private key (PKCS#1, PKCS#8 or SEC1).
pub fn load_tls_acceptor(files: &TlsFiles) -> Result<TlsAcceptor, ConfigError> {
    let certs = load_certs(&files.cert)?;
    let key = load_private_key(&files.key)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::TlsCredentials(format!("TLS config error: {}", e)))?;

    info!(
        "Loaded TLS certificate {} and key {}",
        files.cert.display(),
        files.key.display()
    );
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::TlsCredentials(format!(
            "Failed to open cert file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ConfigError::TlsCredentials(format!(
                "Failed to parse certificates in {}: {}",
                path.display(),
                e
            ))
        })?;

    if certs.is_empty() {
        return Err(ConfigError::TlsCredentials(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::TlsCredentials(format!(
            "Failed to open key file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);

    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Err(ConfigError::TlsCredentials(format!(
            "No private key found in {}",
            path.display()
        ))),
        Err(e) => Err(ConfigError::TlsCredentials(format!(
            "Failed to parse key in {}: {}",
            path.display(),
            e
        ))),
    }
}
