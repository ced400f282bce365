//! Proves that a private key belongs to a certificate.

use std::path::Path;

use super::{CandidateKey, CredentialBundle, pbe};
use crate::cert::Certificate;
use crate::context::CryptoContext;
use crate::error::{CaKitError, Result};
use crate::pem_utils;
use crate::pki::{self, SignatureAlgorithm};

/// Checks that `candidate` is the private key of `certificate` and returns a
/// bundle holding both.
///
/// When the key material exposes a public key it must equal the certificate's
/// public key bit for bit. A random challenge is then always signed with the
/// candidate key and verified with the certificate key, so detached key files
/// are accepted only once possession has been proven.
pub fn validate_pair(
    ctx: &CryptoContext,
    certificate: Certificate,
    candidate: CandidateKey,
) -> Result<CredentialBundle> {
    validate_chain(ctx, vec![certificate], candidate)
}

/// Like [`validate_pair`] for a whole chain; the key must belong to the first
/// certificate.
pub fn validate_chain(
    ctx: &CryptoContext,
    chain: Vec<Certificate>,
    candidate: CandidateKey,
) -> Result<CredentialBundle> {
    let bundle = CredentialBundle::from_chain(chain)?;
    prove_possession(ctx, bundle.certificate(), &candidate)?;
    tracing::debug!(subject = %bundle.certificate().subject(), "credential pair validated");
    Ok(bundle.with_key(candidate.into_key()))
}

fn prove_possession(
    ctx: &CryptoContext,
    certificate: &Certificate,
    candidate: &CandidateKey,
) -> Result<()> {
    let mismatch = |e: CaKitError| CaKitError::CredentialMismatch(e.to_string());

    if let Some(exposed) = candidate.exposed_public_key() {
        if exposed != certificate.public_key_bits() {
            tracing::warn!(subject = %certificate.subject(), "public key differs from certificate");
            return Err(CaKitError::CredentialMismatch(
                "the key's public half differs from the certificate's public key".to_string(),
            ));
        }
    }

    let certificate_key = certificate.public_key().map_err(mismatch)?;
    let algorithm = SignatureAlgorithm::default_for(&certificate_key);
    let challenge = ctx.random_bytes(ctx.challenge_len);
    let signature = pki::sign_data(&challenge, candidate.key(), algorithm).map_err(mismatch)?;
    pki::verify_data(&challenge, &signature, &certificate_key, algorithm).map_err(|e| {
        tracing::warn!(subject = %certificate.subject(), "challenge signature rejected");
        mismatch(e)
    })
}

/// Loads a certificate chain and a private key from disk and validates them.
///
/// The certificate file holds one or more `CERTIFICATE` PEM blocks (leaf
/// first) or a single DER certificate. The key file is PKCS#8, PEM or DER;
/// `unlock_secret` is needed when it is encrypted.
pub fn load(
    ctx: &CryptoContext,
    cert_path: &Path,
    key_path: &Path,
    unlock_secret: Option<&str>,
) -> Result<CredentialBundle> {
    let cert_bytes = std::fs::read(cert_path)
        .map_err(|e| CaKitError::io(format!("reading {}", cert_path.display()), e))?;
    let chain = read_certificates(&cert_bytes)?;

    let key_bytes = std::fs::read(key_path)
        .map_err(|e| CaKitError::io(format!("reading {}", key_path.display()), e))?;
    let key_der = pbe::private_key_der(&key_bytes, unlock_secret)?;
    let candidate = CandidateKey::from_pkcs8_der(key_der.as_bytes())?;

    let bundle = validate_chain(ctx, chain, candidate)?;
    tracing::info!(
        certificate = %cert_path.display(),
        key = %key_path.display(),
        chain = bundle.certificate_chain().len(),
        "credentials loaded"
    );
    Ok(bundle.with_provenance(cert_path, key_path, unlock_secret))
}

/// Reads every certificate of a PEM file, or the single certificate of a DER file.
pub fn read_certificates(data: &[u8]) -> Result<Vec<Certificate>> {
    if !pem_utils::looks_like_pem(data) {
        return Ok(vec![Certificate::from_der(data)?]);
    }
    let text = std::str::from_utf8(data)
        .map_err(|e| CaKitError::DecodingError(format!("PEM is not UTF-8: {e}")))?;
    let chain = pem_utils::pem_blocks(text, "CERTIFICATE")?
        .iter()
        .map(|der| Certificate::from_der(der))
        .collect::<Result<Vec<_>>>()?;
    if chain.is_empty() {
        return Err(CaKitError::DecodingError(
            "no CERTIFICATE block found".to_string(),
        ));
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::params::{DistinguishedName, Validity};
    use crate::key::{KeyAlgorithm, KeyPair};
    use crate::request::InMemoryRequest;

    fn self_signed(key: &KeyPair, cn: &str) -> Certificate {
        let request = InMemoryRequest::builder()
            .subject(DistinguishedName {
                common_name: cn.to_string(),
                ..Default::default()
            })
            .key_algorithm(key.algorithm())
            .build();
        Certificate::new_self_signed(&request, key, Validity::for_days(5)).unwrap()
    }

    fn detached(key: &KeyPair) -> CandidateKey {
        CandidateKey::from_pkcs8_der(key.to_pkcs8_der().unwrap().as_bytes()).unwrap()
    }

    #[test]
    fn test_matching_detached_key_is_accepted() {
        let key = KeyPair::generate_ecdsa_p384();
        let cert = self_signed(&key, "A");
        let bundle = validate_pair(&CryptoContext::default(), cert.clone(), detached(&key)).unwrap();
        assert_eq!(bundle.certificate(), &cert);
        assert_eq!(bundle.key_pair().unwrap().public_key(), key.public_key());
    }

    #[test]
    fn test_detached_key_of_other_certificate_fails_challenge() {
        let cert = self_signed(&KeyPair::generate_ecdsa_p256(), "A");
        let other = KeyPair::generate_ecdsa_p256();
        let err = validate_pair(&CryptoContext::default(), cert, detached(&other)).unwrap_err();
        assert!(matches!(err, CaKitError::CredentialMismatch(_)));
    }

    #[test]
    fn test_key_type_mismatch_is_a_credential_mismatch() {
        let cert = self_signed(&KeyPair::generate_ed25519(), "A");
        let other = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let err = validate_pair(&CryptoContext::default(), cert, detached(&other)).unwrap_err();
        assert!(matches!(err, CaKitError::CredentialMismatch(_)));
    }

    #[test]
    fn test_read_certificates_keeps_pem_order() {
        let first = self_signed(&KeyPair::generate_ed25519(), "first");
        let second = self_signed(&KeyPair::generate_ed25519(), "second");
        let pem = format!("{}{}", first.to_pem().unwrap(), second.to_pem().unwrap());
        let chain = read_certificates(pem.as_bytes()).unwrap();
        assert_eq!(chain, vec![first.clone(), second]);
        assert_eq!(read_certificates(&first.to_der().unwrap()).unwrap(), vec![first]);
    }
}
