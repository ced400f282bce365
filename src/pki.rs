//! Content hashing and algorithm-specific signing.

use const_oid::ObjectIdentifier;
use const_oid::db::{rfc5912, rfc8410};
use ecdsa::signature::{SignatureEncoding, Signer, Verifier};
use sha2::{Digest, Sha256, Sha512};
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{CaKitError, Result};
use crate::key::{KeyPair, PublicKey};

/// Represents the supported signature algorithms.
///
/// This enum provides a mapping to the corresponding OIDs for each algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// SHA-256 with RSA encryption (PKCS#1 v1.5).
    Sha256WithRSA,
    /// SHA-256 with ECDSA.
    Sha256WithECDSA,
    /// SHA-384 with ECDSA.
    Sha384WithECDSA,
    /// Pure EdDSA over Ed25519.
    Ed25519,
}

impl SignatureAlgorithm {
    /// The declared default signature algorithm for a public-key type.
    pub fn default_for(key: &PublicKey) -> Self {
        match key {
            PublicKey::Rsa(_) => SignatureAlgorithm::Sha256WithRSA,
            PublicKey::EcdsaP256(_) => SignatureAlgorithm::Sha256WithECDSA,
            PublicKey::EcdsaP384(_) => SignatureAlgorithm::Sha384WithECDSA,
            PublicKey::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            SignatureAlgorithm::Sha256WithRSA => rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::Sha256WithECDSA => rfc5912::ECDSA_WITH_SHA_256,
            SignatureAlgorithm::Sha384WithECDSA => rfc5912::ECDSA_WITH_SHA_384,
            SignatureAlgorithm::Ed25519 => rfc8410::ID_ED_25519,
        }
    }

    pub fn from_oid(oid: ObjectIdentifier) -> Result<Self> {
        match oid {
            rfc5912::SHA_256_WITH_RSA_ENCRYPTION => Ok(SignatureAlgorithm::Sha256WithRSA),
            rfc5912::ECDSA_WITH_SHA_256 => Ok(SignatureAlgorithm::Sha256WithECDSA),
            rfc5912::ECDSA_WITH_SHA_384 => Ok(SignatureAlgorithm::Sha384WithECDSA),
            rfc8410::ID_ED_25519 => Ok(SignatureAlgorithm::Ed25519),
            other => Err(CaKitError::DecodingError(format!(
                "Unsupported signature algorithm {other}"
            ))),
        }
    }
}

impl From<SignatureAlgorithm> for AlgorithmIdentifierOwned {
    fn from(value: SignatureAlgorithm) -> Self {
        AlgorithmIdentifierOwned {
            oid: value.oid(),
            parameters: None,
        }
    }
}

/// SHA-512 digest of `data`, lowercase hex encoded.
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

/// Compares a hex digest against the digest of `data`, ignoring hex case.
pub fn sha512_matches(data: &[u8], expected_hex: &str) -> bool {
    sha512_hex(data).eq_ignore_ascii_case(expected_hex.trim())
}

/// Signs `data` with `key` using `algorithm`.
///
/// Fails with `InvalidInput` when the algorithm does not belong to the key type.
pub fn sign_data(data: &[u8], key: &KeyPair, algorithm: SignatureAlgorithm) -> Result<Vec<u8>> {
    match (key, algorithm) {
        (KeyPair::Rsa { private, .. }, SignatureAlgorithm::Sha256WithRSA) => {
            let signing_key =
                rsa::pkcs1v15::SigningKey::<Sha256>::new(private.as_ref().clone());
            let signature = signing_key
                .try_sign(data)
                .map_err(|e| CaKitError::crypto("signing with RSA", e))?;
            Ok(signature.to_vec())
        }
        (KeyPair::EcdsaP256 { signing_key, .. }, SignatureAlgorithm::Sha256WithECDSA) => {
            let signature: p256::ecdsa::Signature = signing_key
                .try_sign(data)
                .map_err(|e| CaKitError::crypto("signing with ECDSA P-256", e))?;
            Ok(signature.to_der().as_bytes().to_vec())
        }
        (KeyPair::EcdsaP384 { signing_key, .. }, SignatureAlgorithm::Sha384WithECDSA) => {
            let signature: p384::ecdsa::Signature = signing_key
                .try_sign(data)
                .map_err(|e| CaKitError::crypto("signing with ECDSA P-384", e))?;
            Ok(signature.to_der().as_bytes().to_vec())
        }
        (KeyPair::Ed25519 { signing_key }, SignatureAlgorithm::Ed25519) => {
            Ok(signing_key.sign(data).to_bytes().to_vec())
        }
        (key, algorithm) => Err(CaKitError::InvalidInput(format!(
            "{algorithm:?} cannot be used with a {} key",
            key.algorithm()
        ))),
    }
}

/// Verifies `signature` over `data` with `key` using `algorithm`.
pub fn verify_data(
    data: &[u8],
    signature: &[u8],
    key: &PublicKey,
    algorithm: SignatureAlgorithm,
) -> Result<()> {
    let invalid = |e: ecdsa::signature::Error| CaKitError::InvalidSignature(e.to_string());
    match (key, algorithm) {
        (PublicKey::Rsa(public), SignatureAlgorithm::Sha256WithRSA) => {
            let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public.clone());
            let signature = rsa::pkcs1v15::Signature::try_from(signature).map_err(invalid)?;
            verifying_key.verify(data, &signature).map_err(invalid)
        }
        (PublicKey::EcdsaP256(verifying_key), SignatureAlgorithm::Sha256WithECDSA) => {
            let signature = p256::ecdsa::Signature::from_der(signature).map_err(invalid)?;
            verifying_key.verify(data, &signature).map_err(invalid)
        }
        (PublicKey::EcdsaP384(verifying_key), SignatureAlgorithm::Sha384WithECDSA) => {
            let signature = p384::ecdsa::Signature::from_der(signature).map_err(invalid)?;
            verifying_key.verify(data, &signature).map_err(invalid)
        }
        (PublicKey::Ed25519(verifying_key), SignatureAlgorithm::Ed25519) => {
            let signature = ed25519_dalek::Signature::from_slice(signature).map_err(invalid)?;
            verifying_key.verify(data, &signature).map_err(invalid)
        }
        (key, algorithm) => Err(CaKitError::InvalidInput(format!(
            "{algorithm:?} cannot be used with a {} key",
            key.algorithm()
        ))),
    }
}
