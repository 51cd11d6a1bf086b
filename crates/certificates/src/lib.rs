//! Machine certificate for the TLS listener.
//!
//! The listener presents either an operator-supplied certificate/key pair read from PEM files
//! or, when none is configured, a self-signed certificate generated at startup for the
//! machine's host name. Resolution happens once; the result is read-only afterwards.

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while resolving the machine certificate.
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Failed to generate certificate: {0}")]
    GenerationError(String),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),
    #[error("TLS configuration rejected certificate: {0}")]
    Tls(String),
}

/// A certificate chain and private key, both PEM encoded.
#[derive(Clone)]
pub struct MachineCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for MachineCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineCertificate")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

impl MachineCertificate {
    /// Loads the configured pair, or generates a self-signed certificate when either path is
    /// missing.
    ///
    /// # Arguments
    ///
    /// * `cert_pem` - Path to the PEM certificate chain.
    /// * `key_pem` - Path to the PEM private key.
    /// * `host_name` - DNS name used when a certificate has to be generated.
    ///
    /// # Errors
    ///
    /// Returns `CertificateError::Read` if a configured file cannot be read, and
    /// `CertificateError::GenerationError` if self-signing fails.
    pub fn resolve(
        cert_pem: Option<&Path>,
        key_pem: Option<&Path>,
        host_name: &str,
    ) -> Result<Self, CertificateError> {
        match (cert_pem, key_pem) {
            (Some(cert), Some(key)) => {
                let machine = Self {
                    cert_pem: read(cert)?,
                    key_pem: read(key)?,
                };
                tracing::info!(cert = %cert.display(), "loaded machine certificate");
                Ok(machine)
            }
            (cert, key) => {
                if cert.is_some() || key.is_some() {
                    tracing::warn!("certificate and key must both be configured; generating self-signed");
                }
                Self::self_signed(host_name)
            }
        }
    }

    /// Creates a self-signed server certificate for `host_name`, valid for one year.
    ///
    /// An IP address literal becomes an IP subject alternative name instead of a DNS one.
    ///
    /// # Errors
    ///
    /// Returns `CertificateError::GenerationError` if certificate generation fails.
    pub fn self_signed(host_name: &str) -> Result<Self, CertificateError> {
        let mut params = CertificateParams::new(vec![host_name.to_string()])
            .map_err(|e| CertificateError::GenerationError(e.to_string()))?;

        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, host_name);
        subject.push(DnType::OrganizationName, "rxbridge");
        params.distinguished_name = subject;
        params.is_ca = IsCa::NoCa;

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::minutes(5);
        params.not_after = now + time::Duration::days(365);

        let key_pair =
            KeyPair::generate().map_err(|e| CertificateError::GenerationError(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertificateError::GenerationError(e.to_string()))?;

        tracing::info!(host = host_name, "generated self-signed machine certificate");
        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Builds a rustls server configuration presenting this certificate.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, CertificateError> {
        let chain = CertificateDer::pem_slice_iter(self.cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
        if chain.is_empty() {
            return Err(CertificateError::InvalidPem("no certificate found".into()));
        }
        let key = PrivateKeyDer::from_pem_slice(self.key_pem.as_bytes())
            .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| CertificateError::Tls(e.to_string()))?;
        Ok(Arc::new(config))
    }
}

fn read(path: &Path) -> Result<String, CertificateError> {
    std::fs::read_to_string(path).map_err(|source| CertificateError::Read {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn dns_names(cert_pem: &str) -> Vec<String> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()).expect("pem");
        let (_, cert) = X509Certificate::from_der(&pem.contents).expect("der");
        let san = cert
            .subject_alternative_name()
            .expect("extension parses")
            .expect("SAN present");
        san.value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn self_signed_certificate_names_the_host() {
        let machine = MachineCertificate::self_signed("pharmacy.local").expect("generate");

        assert!(machine.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(machine.key_pem.contains("BEGIN PRIVATE KEY"));
        assert_eq!(dns_names(&machine.cert_pem), vec!["pharmacy.local"]);
    }

    #[test]
    fn self_signed_certificate_builds_server_config() {
        let machine = MachineCertificate::self_signed("localhost").expect("generate");
        machine.server_config().expect("rustls accepts generated pair");
    }

    #[test]
    fn resolve_reads_configured_files() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let generated = MachineCertificate::self_signed("files.local").expect("generate");
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, &generated.cert_pem).expect("write cert");
        std::fs::write(&key_path, &generated.key_pem).expect("write key");

        let resolved =
            MachineCertificate::resolve(Some(&cert_path), Some(&key_path), "ignored.local")
                .expect("resolve");
        assert_eq!(resolved.cert_pem, generated.cert_pem);
        assert_eq!(dns_names(&resolved.cert_pem), vec!["files.local"]);
    }

    #[test]
    fn resolve_falls_back_to_self_signed() {
        let resolved = MachineCertificate::resolve(None, None, "fallback.local").expect("resolve");
        assert_eq!(dns_names(&resolved.cert_pem), vec!["fallback.local"]);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = MachineCertificate::resolve(
            Some(Path::new("/nonexistent/cert.pem")),
            Some(Path::new("/nonexistent/key.pem")),
            "host",
        )
        .expect_err("missing");
        assert!(matches!(err, CertificateError::Read { path, .. } if path.contains("cert.pem")));
    }

    #[test]
    fn garbage_pem_is_rejected() {
        let machine = MachineCertificate {
            cert_pem: "not a certificate".into(),
            key_pem: "not a key".into(),
        };
        assert!(matches!(
            machine.server_config(),
            Err(CertificateError::InvalidPem(_))
        ));
    }
}
