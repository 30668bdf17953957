//! Instance identity verification.
//!
//! The attestation is a PKCS#7 signed-data envelope whose content is the
//! platform's JSON identity document. Trust is pinned to the configured
//! anchor certificates: certificates carried inside the envelope are ignored
//! and no CA hierarchy is consulted.

use std::fmt;
use std::path::Path;

use authz_gateway_sdk::{AttestationClaims, GatewayError};
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::X509;
use openssl::x509::store::X509StoreBuilder;
use tracing::debug;

use super::error::DomainError;

/// base64url codec for the attestation header: accepts padded and unpadded
/// input, emits unpadded.
pub const ATTESTATION_ENCODING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode envelope bytes for an attestation header.
#[must_use]
pub fn encode_attestation(envelope: &[u8]) -> String {
    ATTESTATION_ENCODING.encode(envelope)
}

/// Decode an attestation header value into envelope bytes.
///
/// # Errors
///
/// Returns [`GatewayError::Authn`] when the value is empty or not base64url.
pub fn decode_attestation(header_value: &str) -> Result<Vec<u8>, GatewayError> {
    let trimmed = header_value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Authn("attestation header is empty".to_owned()));
    }
    ATTESTATION_ENCODING
        .decode(trimmed)
        .map_err(|e| GatewayError::Authn(format!("attestation header is not base64url: {e}")))
}

/// Certificates that attestation signers must match exactly.
#[derive(Clone)]
pub struct TrustAnchor {
    certs: Vec<X509>,
}

impl fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subjects: Vec<String> = self
            .certs
            .iter()
            .map(|c| format!("{:?}", c.subject_name()))
            .collect();
        f.debug_struct("TrustAnchor")
            .field("subjects", &subjects)
            .finish()
    }
}

impl TrustAnchor {
    /// Parse a PEM bundle holding one or more certificates.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidTrustAnchor`] if the bundle is unparsable or empty.
    pub fn from_pem(pem: &[u8]) -> Result<Self, DomainError> {
        let certs = X509::stack_from_pem(pem)
            .map_err(|e| DomainError::InvalidTrustAnchor(format!("unparsable PEM: {e}")))?;
        if certs.is_empty() {
            return Err(DomainError::InvalidTrustAnchor(
                "bundle contains no certificates".to_owned(),
            ));
        }
        Ok(Self { certs })
    }

    /// Read and parse a PEM bundle from disk.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Io`] if the file cannot be read, otherwise as [`Self::from_pem`].
    pub fn load(path: &Path) -> Result<Self, DomainError> {
        let pem = std::fs::read(path).map_err(|source| DomainError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&pem)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    fn verify_envelope(&self, envelope: &[u8]) -> Result<Vec<u8>, String> {
        let pkcs7 = Pkcs7::from_der(envelope).map_err(|e| format!("malformed envelope: {e}"))?;

        let mut signers = Stack::new().map_err(|e| e.to_string())?;
        for cert in &self.certs {
            signers.push(cert.clone()).map_err(|e| e.to_string())?;
        }
        // Chain building is disabled, the store only satisfies the API.
        let store = X509StoreBuilder::new().map_err(|e| e.to_string())?.build();

        let mut content = Vec::new();
        pkcs7
            .verify(
                &signers,
                &store,
                None,
                Some(&mut content),
                Pkcs7Flags::NOINTERN | Pkcs7Flags::NOVERIFY | Pkcs7Flags::BINARY,
            )
            .map_err(|e| format!("signature verification failed: {e}"))?;
        Ok(content)
    }
}

/// Verifies signed attestations against a fixed [`TrustAnchor`].
///
/// CPU-bound and stateless beyond the anchor, so one instance is shared by
/// all request tasks.
#[derive(Debug, Clone)]
pub struct InstanceTrustVerifier {
    anchor: TrustAnchor,
}

impl InstanceTrustVerifier {
    #[must_use]
    pub fn new(anchor: TrustAnchor) -> Self {
        Self { anchor }
    }

    /// Verify a DER envelope and return its claims unmodified.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Authn`] on a malformed envelope, a signer that is
    /// not an anchor, a bad signature, or claims that do not parse.
    pub fn verify(&self, envelope: &[u8]) -> Result<AttestationClaims, GatewayError> {
        let content = self
            .anchor
            .verify_envelope(envelope)
            .map_err(GatewayError::Authn)?;

        let claims: AttestationClaims = serde_json::from_slice(&content)
            .map_err(|e| GatewayError::Authn(format!("unparsable attestation claims: {e}")))?;
        debug!(
            instance_id = %claims.instance_id,
            region = %claims.region,
            "Verified instance attestation"
        );
        Ok(claims)
    }

    /// Decode a base64url header value and verify it.
    ///
    /// # Errors
    ///
    /// As [`decode_attestation`] and [`Self::verify`].
    pub fn verify_header(&self, header_value: &str) -> Result<AttestationClaims, GatewayError> {
        let envelope = decode_attestation(header_value)?;
        self.verify(&envelope)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::test_support::{IDENTITY_DOCUMENT, mint_identity, sign};
    use base64::Engine as _;
    use std::io::Write;

    fn verifier_for(cert: &X509) -> InstanceTrustVerifier {
        InstanceTrustVerifier::new(TrustAnchor::from_pem(&cert.to_pem().unwrap()).unwrap())
    }

    #[test]
    fn anchor_signed_document_verifies_to_original_claims() {
        let (cert, key) = mint_identity("platform-signer", 1);
        let envelope = sign(&cert, &key, IDENTITY_DOCUMENT.as_bytes());

        let claims = verifier_for(&cert).verify(&envelope).unwrap();

        let expected: AttestationClaims = serde_json::from_str(IDENTITY_DOCUMENT).unwrap();
        assert_eq!(claims, expected);
        assert_eq!(claims.instance_id, "i-0abc1234def567890");
        assert_eq!(claims.region, "us-east-1");
        assert_eq!(
            claims.extra.get("billingProducts"),
            Some(&serde_json::Value::Null)
        );
    }

    #[test]
    fn flipped_signature_bit_is_rejected() {
        let (cert, key) = mint_identity("platform-signer", 1);
        let mut envelope = sign(&cert, &key, IDENTITY_DOCUMENT.as_bytes());
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;

        let err = verifier_for(&cert).verify(&envelope).unwrap_err();
        assert!(matches!(err, GatewayError::Authn(_)), "got {err:?}");
    }

    #[test]
    fn unrelated_signer_is_rejected_even_if_embedded() {
        let (anchor_cert, _) = mint_identity("platform-signer", 1);
        let (rogue_cert, rogue_key) = mint_identity("rogue-signer", 77);
        let envelope = sign(&rogue_cert, &rogue_key, IDENTITY_DOCUMENT.as_bytes());

        let err = verifier_for(&anchor_cert).verify(&envelope).unwrap_err();
        assert!(matches!(err, GatewayError::Authn(_)));
    }

    #[test]
    fn any_certificate_in_the_bundle_can_sign() {
        let (other_cert, _) = mint_identity("retired-signer", 5);
        let (cert, key) = mint_identity("platform-signer", 1);
        let mut bundle = other_cert.to_pem().unwrap();
        bundle.extend(cert.to_pem().unwrap());
        let anchor = TrustAnchor::from_pem(&bundle).unwrap();
        assert_eq!(anchor.len(), 2);

        let envelope = sign(&cert, &key, IDENTITY_DOCUMENT.as_bytes());
        assert!(InstanceTrustVerifier::new(anchor).verify(&envelope).is_ok());
    }

    #[test]
    fn garbage_and_non_claims_payloads_are_rejected() {
        let (cert, key) = mint_identity("platform-signer", 1);
        let verifier = verifier_for(&cert);

        assert!(matches!(
            verifier.verify(b"definitely not der"),
            Err(GatewayError::Authn(_))
        ));

        let envelope = sign(&cert, &key, br#"{"hello": "world"}"#);
        assert!(matches!(
            verifier.verify(&envelope),
            Err(GatewayError::Authn(_))
        ));
    }

    #[test]
    fn header_round_trips_padded_and_unpadded() {
        let (cert, key) = mint_identity("platform-signer", 1);
        let envelope = sign(&cert, &key, IDENTITY_DOCUMENT.as_bytes());
        let verifier = verifier_for(&cert);

        let unpadded = encode_attestation(&envelope);
        assert!(!unpadded.ends_with('='));
        assert!(verifier.verify_header(&unpadded).is_ok());

        let padded = base64::engine::general_purpose::URL_SAFE.encode(&envelope);
        assert!(verifier.verify_header(&format!(" {padded}\n")).is_ok());
    }

    #[test]
    fn empty_or_undecodable_header_is_authn() {
        assert!(matches!(decode_attestation(""), Err(GatewayError::Authn(_))));
        assert!(matches!(decode_attestation("   "), Err(GatewayError::Authn(_))));
        assert!(matches!(
            decode_attestation("not*base64!"),
            Err(GatewayError::Authn(_))
        ));
    }

    #[test]
    fn anchor_loading_rejects_empty_bundles_and_missing_files() {
        assert!(matches!(
            TrustAnchor::from_pem(b""),
            Err(DomainError::InvalidTrustAnchor(_))
        ));
        assert!(matches!(
            TrustAnchor::load(Path::new("/nonexistent/anchor.pem")),
            Err(DomainError::Io { .. })
        ));

        let (cert, _) = mint_identity("platform-signer", 1);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&cert.to_pem().unwrap()).unwrap();
        let anchor = TrustAnchor::load(file.path()).unwrap();
        assert_eq!(anchor.len(), 1);
    }
}
