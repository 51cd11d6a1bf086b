//! TLS configuration helpers.

use crate::{TransportError, TransportResult};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use std::path::Path;
use std::sync::Arc;

pub use rustls::{ClientConfig, ServerConfig};

/// Client configuration trusting the public web PKI roots plus, optionally, the
/// certificates in `extra_ca_pem` (for gateways using a private CA).
///
/// Host-name validation is always on.
pub fn client_config(extra_ca_pem: Option<&Path>) -> TransportResult<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = extra_ca_pem {
        let certs = CertificateDer::pem_file_iter(path).map_err(|e| {
            TransportError::Tls(format!("failed to read CA file {}: {e}", path.display()))
        })?;
        for cert in certs {
            let cert = cert.map_err(|e| TransportError::Tls(format!("invalid CA PEM: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| TransportError::Tls(format!("rejected CA certificate: {e}")))?;
        }
        tracing::info!(path = %path.display(), "loaded additional gateway trust anchors");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_client_config() {
        assert!(client_config(None).is_ok());
    }

    #[test]
    fn missing_ca_file_is_a_tls_error() {
        let err = client_config(Some(Path::new("/nonexistent/ca.pem"))).expect_err("missing file");
        assert!(matches!(err, TransportError::Tls(msg) if msg.contains("ca.pem")));
    }
}
