//! rustls client configurations for the encryption stage.
//!
//! Both builders pin the `ring` provider so the process-wide default does
//! not have to be installed, and both verify the peer certificate chain.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};

use crate::error::ConnectError;

// ============================================================================
// Builders
// ============================================================================

/// Client configuration trusting the bundled webpki roots.
///
/// # Errors
///
/// [`ConnectError::EncryptionFailed`] if the provider rejects the default
/// protocol versions.
pub fn webpki_config() -> Result<Arc<ClientConfig>, ConnectError> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    build(roots)
}

/// Client configuration trusting only `certificates`.
///
/// For exchanges reached through a private CA, and for test servers with
/// self-signed certificates.
///
/// # Errors
///
/// [`ConnectError::EncryptionFailed`] if a certificate cannot be parsed as a
/// trust anchor.
pub fn config_with_roots(
    certificates: impl IntoIterator<Item = CertificateDer<'static>>,
) -> Result<Arc<ClientConfig>, ConnectError> {
    let mut roots = RootCertStore::empty();
    for certificate in certificates {
        roots
            .add(certificate)
            .map_err(|e| ConnectError::EncryptionFailed {
                message: format!("invalid root certificate: {e}"),
            })?;
    }
    build(roots)
}

fn build(roots: RootCertStore) -> Result<Arc<ClientConfig>, ConnectError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::EncryptionFailed {
            message: e.to_string(),
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

// ============================================================================
// Tests
// ============================================================================
