//! CA credential material: a certificate chain with the key it was issued for.

pub mod export;
pub mod pbe;
pub mod pkcs12;
pub mod validator;

use std::path::{Path, PathBuf};

use pkcs8::PrivateKeyInfo;

use crate::cert::Certificate;
use crate::error::{CaKitError, Result};
use crate::key::{KeyPair, PublicKey};

/// A certificate chain (leaf first) plus the optional private key of the leaf.
///
/// Bundles are immutable; the unlock secret is kept only for the lifetime of
/// the value and never written anywhere.
#[derive(Clone)]
pub struct CredentialBundle {
    certificate_chain: Vec<Certificate>,
    key_pair: Option<KeyPair>,
    source_cert_path: Option<PathBuf>,
    source_key_path: Option<PathBuf>,
    unlock_secret: Option<String>,
}

impl CredentialBundle {
    /// Creates a bundle without a private key. Fails on an empty chain.
    pub fn from_chain(certificate_chain: Vec<Certificate>) -> Result<Self> {
        if certificate_chain.is_empty() {
            return Err(CaKitError::InvalidInput(
                "a credential bundle needs at least one certificate".to_string(),
            ));
        }
        Ok(Self {
            certificate_chain,
            key_pair: None,
            source_cert_path: None,
            source_key_path: None,
            unlock_secret: None,
        })
    }

    pub(crate) fn with_key(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    pub(crate) fn with_provenance(
        mut self,
        cert_path: &Path,
        key_path: &Path,
        unlock_secret: Option<&str>,
    ) -> Self {
        self.source_cert_path = Some(cert_path.to_path_buf());
        self.source_key_path = Some(key_path.to_path_buf());
        self.unlock_secret = unlock_secret.map(str::to_string);
        self
    }

    /// The chain in stored order, leaf first.
    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.certificate_chain
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate_chain[0]
    }

    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.key_pair.as_ref()
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        self.certificate().public_key()
    }

    pub fn source_cert_path(&self) -> Option<&Path> {
        self.source_cert_path.as_deref()
    }

    pub fn source_key_path(&self) -> Option<&Path> {
        self.source_key_path.as_deref()
    }

    pub fn unlock_secret(&self) -> Option<&str> {
        self.unlock_secret.as_deref()
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("subject", &self.certificate().subject().to_string())
            .field("chain_len", &self.certificate_chain.len())
            .field("has_key", &self.key_pair.is_some())
            .field("source_cert_path", &self.source_cert_path)
            .field("source_key_path", &self.source_key_path)
            .field("unlock_secret", &self.unlock_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A private key offered as the partner of a certificate.
///
/// `exposed_public_key` holds the public key bits the key material itself
/// carries: the PKCS#8 v2 embedded public key, or the public half of RSA
/// private material. A detached EC key without an embedded public key
/// exposes nothing.
#[derive(Debug, Clone)]
pub struct CandidateKey {
    key: KeyPair,
    exposed_public_key: Option<Vec<u8>>,
}

impl CandidateKey {
    /// Wraps an in-memory key pair; its public half is always known.
    pub fn from_key_pair(key: KeyPair) -> Result<Self> {
        let exposed_public_key = Some(key.public_key().raw_bits()?);
        Ok(Self {
            key,
            exposed_public_key,
        })
    }

    /// Decodes an unencrypted PKCS#8 document.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = PrivateKeyInfo::try_from(der)?;
        let key = KeyPair::from_pkcs8_der(der)?;
        let exposed_public_key = match (info.public_key, &key) {
            (Some(embedded), _) => Some(embedded.to_vec()),
            (None, KeyPair::Rsa { .. }) => Some(key.public_key().raw_bits()?),
            (None, _) => None,
        };
        Ok(Self {
            key,
            exposed_public_key,
        })
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    pub fn exposed_public_key(&self) -> Option<&[u8]> {
        self.exposed_public_key.as_deref()
    }

    pub fn into_key(self) -> KeyPair {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_chain_is_rejected() {
        assert!(matches!(
            CredentialBundle::from_chain(Vec::new()),
            Err(CaKitError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_detached_ec_key_exposes_nothing() {
        let key = KeyPair::generate_ecdsa_p256();
        let candidate = CandidateKey::from_pkcs8_der(key.to_pkcs8_der().unwrap().as_bytes()).unwrap();
        assert_eq!(candidate.key().public_key(), key.public_key());
        assert!(candidate.exposed_public_key().is_none());
    }

    #[test]
    fn test_rsa_key_exposes_public_half() {
        let key = KeyPair::generate_rsa(2048).unwrap();
        let candidate = CandidateKey::from_pkcs8_der(key.to_pkcs8_der().unwrap().as_bytes()).unwrap();
        assert_eq!(
            candidate.exposed_public_key().unwrap(),
            key.public_key().raw_bits().unwrap().as_slice()
        );
    }
}
