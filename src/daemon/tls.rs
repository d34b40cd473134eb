//! TLS setup for the daemon listener.
//!
//! A certificate/key pair enables TLS on the listening socket. When a client
//! CA bundle is also configured, connecting daemons must present a
//! certificate that verifies against it (mutual TLS).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use super::error::DaemonError;

/// Optional TLS material for the daemon listener.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM server certificate chain. Empty disables TLS.
    pub cert_file: Option<PathBuf>,
    /// PEM private key for the certificate.
    pub key_file: Option<PathBuf>,
    /// PEM CA bundle for verifying client certificates. Empty disables
    /// client-certificate verification.
    pub client_ca_file: Option<PathBuf>,
}

impl TlsOptions {
    /// Whether a certificate/key pair is configured.
    pub fn enabled(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }

    /// Builds a TLS acceptor from the configured material, or `None` when
    /// TLS is not configured. Load failures are fatal to server startup.
    pub fn acceptor(&self) -> Result<Option<TlsAcceptor>, DaemonError> {
        let (Some(cert_file), Some(key_file)) = (&self.cert_file, &self.key_file) else {
            return Ok(None);
        };

        let certs = load_certs(cert_file)?;
        let key = load_key(key_file)?;

        let builder = ServerConfig::builder();
        let config = match &self.client_ca_file {
            Some(ca_file) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(ca_file)? {
                    roots
                        .add(cert)
                        .map_err(|e| DaemonError::Tls(format!("client ca: {e}")))?;
                }
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| DaemonError::Tls(format!("client verifier: {e}")))?;
                info!("client certificate verification enabled");
                builder
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)
            }
            None => builder.with_no_client_auth().with_single_cert(certs, key),
        }
        .map_err(|e| DaemonError::Tls(format!("server config: {e}")))?;

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, DaemonError> {
    let file = File::open(path)
        .map_err(|e| DaemonError::Tls(format!("open {}: {e}", path.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| DaemonError::Tls(format!("parse {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(DaemonError::Tls(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, DaemonError> {
    let file = File::open(path)
        .map_err(|e| DaemonError::Tls(format!("open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| DaemonError::Tls(format!("parse {}: {e}", path.display())))?
        .ok_or_else(|| DaemonError::Tls(format!("no private key in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_material() {
        let options = TlsOptions::default();
        assert!(!options.enabled());
        assert!(options.acceptor().unwrap().is_none());
    }

    #[test]
    fn missing_files_fail_loudly() {
        let options = TlsOptions {
            cert_file: Some(PathBuf::from("/nonexistent/cert.pem")),
            key_file: Some(PathBuf::from("/nonexistent/key.pem")),
            client_ca_file: None,
        };
        assert!(options.enabled());
        assert!(matches!(options.acceptor(), Err(DaemonError::Tls(_))));
    }
}
