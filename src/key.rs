use const_oid::db::{rfc5912, rfc8410};
use der::Encode;
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use p256::ecdsa::{SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{SigningKey as P384SigningKey, VerifyingKey as P384VerifyingKey};
use pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
    PrivateKeyInfo, SecretDocument,
};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::error::{CaKitError, Result};

/// Key algorithm and size requested for a new key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    Rsa { bits: usize },
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl KeyAlgorithm {
    /// Key size in bits.
    pub fn bits(&self) -> usize {
        match self {
            KeyAlgorithm::Rsa { bits } => *bits,
            KeyAlgorithm::EcdsaP256 => 256,
            KeyAlgorithm::EcdsaP384 => 384,
            KeyAlgorithm::Ed25519 => 255,
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyAlgorithm::Rsa { bits } => write!(f, "RSA-{bits}"),
            KeyAlgorithm::EcdsaP256 => f.write_str("ECDSA-P256"),
            KeyAlgorithm::EcdsaP384 => f.write_str("ECDSA-P384"),
            KeyAlgorithm::Ed25519 => f.write_str("Ed25519"),
        }
    }
}

/// Supported key types for certificate operations. Every variant holds the
/// private half, so a `KeyPair` is always usable for signing.
#[derive(Clone, Debug)]
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    EcdsaP256 {
        signing_key: P256SigningKey,
        verifying_key: P256VerifyingKey,
    },
    EcdsaP384 {
        signing_key: P384SigningKey,
        verifying_key: P384VerifyingKey,
    },
    Ed25519 {
        signing_key: Ed25519SigningKey,
    },
}

impl KeyPair {
    /// Generate a key pair for the requested algorithm.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::Rsa { bits } => Self::generate_rsa(bits),
            KeyAlgorithm::EcdsaP256 => Ok(Self::generate_ecdsa_p256()),
            KeyAlgorithm::EcdsaP384 => Ok(Self::generate_ecdsa_p384()),
            KeyAlgorithm::Ed25519 => Ok(Self::generate_ed25519()),
        }
    }

    /// Generate an RSA key pair with the specified number of bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let mut rng = rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CaKitError::KeyGenerationError(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Generate an ECDSA P-256 key pair.
    pub fn generate_ecdsa_p256() -> Self {
        let signing_key = P256SigningKey::random(&mut rand_core::OsRng);
        let verifying_key = *signing_key.verifying_key();
        KeyPair::EcdsaP256 {
            signing_key,
            verifying_key,
        }
    }

    /// Generate an ECDSA P-384 key pair.
    pub fn generate_ecdsa_p384() -> Self {
        let signing_key = P384SigningKey::random(&mut rand_core::OsRng);
        let verifying_key = *signing_key.verifying_key();
        KeyPair::EcdsaP384 {
            signing_key,
            verifying_key,
        }
    }

    /// Generate an Ed25519 key pair.
    pub fn generate_ed25519() -> Self {
        let signing_key = Ed25519SigningKey::generate(&mut rand_core::OsRng);
        KeyPair::Ed25519 { signing_key }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyPair::Rsa { public, .. } => KeyAlgorithm::Rsa {
                bits: public.size() * 8,
            },
            KeyPair::EcdsaP256 { .. } => KeyAlgorithm::EcdsaP256,
            KeyPair::EcdsaP384 { .. } => KeyAlgorithm::EcdsaP384,
            KeyPair::Ed25519 { .. } => KeyAlgorithm::Ed25519,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_key_pair(self)
    }

    /// Encodes the private key as an unencrypted PKCS#8 document.
    pub fn to_pkcs8_der(&self) -> Result<SecretDocument> {
        let doc = match self {
            KeyPair::Rsa { private, .. } => private.to_pkcs8_der(),
            KeyPair::EcdsaP256 { signing_key, .. } => signing_key.to_pkcs8_der(),
            KeyPair::EcdsaP384 { signing_key, .. } => signing_key.to_pkcs8_der(),
            KeyPair::Ed25519 { signing_key } => signing_key.to_pkcs8_der(),
        };
        doc.map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    /// Decodes an unencrypted PKCS#8 private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = PrivateKeyInfo::try_from(der)?;
        match info.algorithm.oid {
            rfc5912::RSA_ENCRYPTION => {
                let private = RsaPrivateKey::from_pkcs8_der(der)?;
                let public = RsaPublicKey::from(&private);
                Ok(KeyPair::Rsa {
                    private: Box::new(private),
                    public,
                })
            }
            rfc5912::ID_EC_PUBLIC_KEY => match info.algorithm.parameters_oid()? {
                rfc5912::SECP_256_R_1 => {
                    let signing_key = P256SigningKey::from_pkcs8_der(der)?;
                    let verifying_key = *signing_key.verifying_key();
                    Ok(KeyPair::EcdsaP256 {
                        signing_key,
                        verifying_key,
                    })
                }
                rfc5912::SECP_384_R_1 => {
                    let signing_key = P384SigningKey::from_pkcs8_der(der)?;
                    let verifying_key = *signing_key.verifying_key();
                    Ok(KeyPair::EcdsaP384 {
                        signing_key,
                        verifying_key,
                    })
                }
                curve => Err(CaKitError::InvalidInput(format!(
                    "Unsupported elliptic curve {curve}"
                ))),
            },
            rfc8410::ID_ED_25519 => Ok(KeyPair::Ed25519 {
                signing_key: Ed25519SigningKey::from_pkcs8_der(der)?,
            }),
            oid => Err(CaKitError::InvalidInput(format!(
                "Unsupported private key algorithm {oid}"
            ))),
        }
    }

    /// Decodes an unencrypted `PRIVATE KEY` PEM block.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let der = crate::pem_utils::pem_to_der_labeled(pem, "PRIVATE KEY")?;
        Self::from_pkcs8_der(&der)
    }
}

/// A public key of one of the supported algorithms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(P256VerifyingKey),
    EcdsaP384(P384VerifyingKey),
    Ed25519(Ed25519VerifyingKey),
}

impl PublicKey {
    pub fn from_key_pair(key_pair: &KeyPair) -> Self {
        match key_pair {
            KeyPair::Rsa { public, .. } => PublicKey::Rsa(public.clone()),
            KeyPair::EcdsaP256 { verifying_key, .. } => PublicKey::EcdsaP256(*verifying_key),
            KeyPair::EcdsaP384 { verifying_key, .. } => PublicKey::EcdsaP384(*verifying_key),
            KeyPair::Ed25519 { signing_key } => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }

    /// Decodes a public key from an X.509 subject public key info.
    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let der = spki.to_der()?;
        match spki.algorithm.oid {
            rfc5912::RSA_ENCRYPTION => Ok(PublicKey::Rsa(RsaPublicKey::from_public_key_der(&der)?)),
            rfc5912::ID_EC_PUBLIC_KEY => match curve_oid(spki)? {
                rfc5912::SECP_256_R_1 => Ok(PublicKey::EcdsaP256(
                    P256VerifyingKey::from_public_key_der(&der)?,
                )),
                rfc5912::SECP_384_R_1 => Ok(PublicKey::EcdsaP384(
                    P384VerifyingKey::from_public_key_der(&der)?,
                )),
                curve => Err(CaKitError::InvalidInput(format!(
                    "Unsupported elliptic curve {curve}"
                ))),
            },
            rfc8410::ID_ED_25519 => Ok(PublicKey::Ed25519(
                Ed25519VerifyingKey::from_public_key_der(&der)?,
            )),
            oid => Err(CaKitError::InvalidInput(format!(
                "Unsupported public key algorithm {oid}"
            ))),
        }
    }

    pub fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let spki = match self {
            PublicKey::Rsa(key) => SubjectPublicKeyInfoOwned::from_key(key.clone()),
            PublicKey::EcdsaP256(key) => SubjectPublicKeyInfoOwned::from_key(*key),
            PublicKey::EcdsaP384(key) => SubjectPublicKeyInfoOwned::from_key(*key),
            PublicKey::Ed25519(key) => SubjectPublicKeyInfoOwned::from_key(*key),
        };
        spki.map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    /// Raw bits of the subject public key, as they appear inside a certificate.
    pub fn raw_bits(&self) -> Result<Vec<u8>> {
        Ok(self.to_spki()?.subject_public_key.raw_bytes().to_vec())
    }

    /// Encodes the key as a DER `SubjectPublicKeyInfo`.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_spki()?.to_der()?)
    }

    /// Encodes the key as a `PUBLIC KEY` PEM block.
    pub fn to_pem(&self) -> Result<String> {
        let pem = match self {
            PublicKey::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::EcdsaP256(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::EcdsaP384(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::Ed25519(key) => key.to_public_key_pem(LineEnding::LF),
        };
        pem.map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        use der::Decode;
        let spki = SubjectPublicKeyInfoOwned::from_der(der)?;
        Self::from_x509spki(&spki)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PublicKey::Rsa(key) => KeyAlgorithm::Rsa {
                bits: key.size() * 8,
            },
            PublicKey::EcdsaP256(_) => KeyAlgorithm::EcdsaP256,
            PublicKey::EcdsaP384(_) => KeyAlgorithm::EcdsaP384,
            PublicKey::Ed25519(_) => KeyAlgorithm::Ed25519,
        }
    }
}

fn curve_oid(spki: &SubjectPublicKeyInfoOwned) -> Result<const_oid::ObjectIdentifier> {
    spki.algorithm
        .parameters
        .as_ref()
        .and_then(|params| params.decode_as::<const_oid::ObjectIdentifier>().ok())
        .ok_or_else(|| CaKitError::DecodingError("EC public key without named curve".to_string()))
}
