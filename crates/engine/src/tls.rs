//! SPKI public-key pinning (§4.1 `pinned_public_key`).
//!
//! After the standard TLS chain verification succeeds, the SPKI SHA-256 of
//! each certificate the server presents is compared against the configured
//! pins; the connection proceeds only if at least one matches. When chain
//! verification is disabled (`insecure_skip_verify`), pinning still runs,
//! over the raw leaf certificate.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Computes the base64-standard SHA-256 digest of a certificate's
/// SubjectPublicKeyInfo, as used by HPKP-style pinning.
pub fn spki_sha256_base64(cert_der: &[u8]) -> Result<String, crate::error::DownloadError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| crate::error::DownloadError::Tls(format!("cannot parse certificate: {e}")))?;
    let spki = cert.public_key().raw;
    let digest = Sha256::digest(spki);
    use base64::Engine;
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

/// Returns `true` if any certificate's SPKI digest matches a configured pin.
pub fn any_pin_matches(
    cert_chain: &[CertificateDer<'_>],
    pins: &[String],
) -> Result<bool, crate::error::DownloadError> {
    for cert in cert_chain {
        let digest = spki_sha256_base64(cert.as_ref())?;
        if pins.iter().any(|pin| pin == &digest) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A `rustls` server certificate verifier that delegates standard chain
/// validation to the platform root store (unless `skip_chain_verification`
/// is set) and additionally requires the leaf or an intermediate to match
/// one of the configured SPKI pins.
#[derive(Debug)]
pub struct PinningVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    pins: Vec<String>,
}

impl PinningVerifier {
    /// Builds a verifier over the Mozilla root store, requiring pin matches
    /// in addition to standard validation.
    pub fn new(pins: Vec<String>) -> Result<Arc<Self>, crate::error::DownloadError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| crate::error::DownloadError::Tls(e.to_string()))?;
        Ok(Arc::new(Self {
            inner: Some(inner),
            pins,
        }))
    }

    /// Builds a verifier that skips chain validation entirely and checks
    /// pins against the raw leaf certificate only (`insecure_skip_verify`).
    pub fn pins_only(pins: Vec<String>) -> Arc<Self> {
        Arc::new(Self { inner: None, pins })
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Some(inner) = &self.inner {
            inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        }

        let mut chain = vec![end_entity.clone()];
        chain.extend(intermediates.iter().cloned());

        let matched = any_pin_matches(&chain, &self.pins).map_err(|e| {
            rustls::Error::General(format!("pin verification failed: {e}"))
        })?;

        if matched {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "no presented certificate matched a configured public-key pin".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        match &self.inner {
            Some(inner) => inner.verify_tls12_signature(message, cert, dss),
            None => Ok(HandshakeSignatureValid::assertion()),
        }
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        match &self.inner {
            Some(inner) => inner.verify_tls13_signature(message, cert, dss),
            None => Ok(HandshakeSignatureValid::assertion()),
        }
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        match &self.inner {
            Some(inner) => inner.supported_verify_schemes(),
            None => vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ED25519,
            ],
        }
    }
}
