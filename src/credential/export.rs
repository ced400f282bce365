//! Serializes a [`CredentialBundle`] into interchange containers.

use std::path::Path;

use bon::Builder;
use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos};
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNED_DATA};
use der::Encode;
use der::asn1::{Any, SetOfVec};
use serde::{Deserialize, Serialize};

use super::CredentialBundle;
use super::pbe::{self, Pkcs8Cipher};
use super::pkcs12::{self, Pkcs12Cipher};
use crate::context::CryptoContext;
use crate::error::{CaKitError, Result};
use crate::key::KeyPair;
use crate::pem_utils;

/// Binary or textual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Der,
    Pem,
}

/// What to export and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExportFormat {
    /// The leaf certificate.
    Certificate { encoding: Encoding },
    /// Every certificate of the chain. DER output is a PKCS#7 certs-only
    /// `SignedData`.
    Chain { encoding: Encoding },
    /// A password-protected keystore with the chain and the private key.
    Pkcs12 { cipher: Pkcs12Cipher },
    /// The private key, encrypted when a cipher is given.
    PrivateKey {
        encoding: Encoding,
        cipher: Option<Pkcs8Cipher>,
    },
    /// The leaf's SubjectPublicKeyInfo.
    PublicKey { encoding: Encoding },
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Certificate { encoding } => write!(f, "certificate ({encoding:?})"),
            ExportFormat::Chain { encoding } => write!(f, "certificate chain ({encoding:?})"),
            ExportFormat::Pkcs12 { cipher } => write!(f, "PKCS#12 ({cipher:?})"),
            ExportFormat::PrivateKey {
                encoding,
                cipher: Some(cipher),
            } => write!(f, "PKCS#8 private key ({encoding:?}, {cipher})"),
            ExportFormat::PrivateKey { encoding, .. } => {
                write!(f, "PKCS#8 private key ({encoding:?})")
            }
            ExportFormat::PublicKey { encoding } => write!(f, "public key ({encoding:?})"),
        }
    }
}

#[derive(Debug, Clone, Builder)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Needed for PKCS#12 and for encrypted private keys.
    #[builder(into)]
    pub password: Option<String>,
}

impl ExportOptions {
    fn password(&self) -> Result<&str> {
        self.password.as_deref().ok_or_else(|| {
            CaKitError::InvalidInput(format!("{} export needs a password", self.format))
        })
    }
}

/// Exports `bundle` as described by `options`.
///
/// Formats that carry the private key fail with `MissingPrivateKey` when the
/// bundle has none. Failures of the underlying encoders are wrapped in
/// `Crypto` with the original error attached.
pub fn export(
    ctx: &CryptoContext,
    bundle: &CredentialBundle,
    options: &ExportOptions,
) -> Result<Vec<u8>> {
    match render(ctx, bundle, options) {
        Ok(bytes) => {
            tracing::debug!(format = %options.format, bytes = bytes.len(), "credential exported");
            Ok(bytes)
        }
        Err(e @ (CaKitError::MissingPrivateKey(_) | CaKitError::InvalidInput(_))) => Err(e),
        Err(e) => Err(CaKitError::crypto(format!("exporting {}", options.format), e)),
    }
}

fn render(ctx: &CryptoContext, bundle: &CredentialBundle, options: &ExportOptions) -> Result<Vec<u8>> {
    match options.format {
        ExportFormat::Certificate { encoding } => encode(
            bundle.certificate().to_der()?,
            encoding,
            "CERTIFICATE",
        ),
        ExportFormat::Chain {
            encoding: Encoding::Pem,
        } => {
            let mut pem = String::new();
            for cert in bundle.certificate_chain() {
                pem.push_str(&cert.to_pem()?);
            }
            Ok(pem.into_bytes())
        }
        ExportFormat::Chain {
            encoding: Encoding::Der,
        } => pkcs7_certs_only(bundle),
        ExportFormat::Pkcs12 { cipher } => {
            let key = private_key(bundle, "PKCS#12 export")?;
            pkcs12::build_pkcs12(
                ctx,
                bundle.certificate_chain(),
                key,
                cipher,
                options.password()?,
            )
        }
        ExportFormat::PrivateKey { encoding, cipher } => {
            let key = private_key(bundle, "private key export")?;
            let plain = key.to_pkcs8_der()?;
            match cipher {
                None => encode(plain.as_bytes().to_vec(), encoding, pbe::PLAIN_PEM_LABEL),
                Some(cipher) => {
                    let encrypted =
                        pbe::encrypt_private_key(ctx, plain.as_bytes(), cipher, options.password()?)?;
                    encode(encrypted, encoding, pbe::ENCRYPTED_PEM_LABEL)
                }
            }
        }
        ExportFormat::PublicKey { encoding } => {
            let public_key = bundle.public_key()?;
            match encoding {
                Encoding::Der => public_key.to_der(),
                Encoding::Pem => public_key.to_pem().map(String::into_bytes),
            }
        }
    }
}

/// Exports to `path`. Nothing is written when the export itself fails.
pub fn export_to_file(
    ctx: &CryptoContext,
    bundle: &CredentialBundle,
    options: &ExportOptions,
    path: &Path,
) -> Result<()> {
    let bytes = export(ctx, bundle, options)?;
    std::fs::write(path, bytes)
        .map_err(|e| CaKitError::io(format!("writing {}", path.display()), e))?;
    tracing::info!(path = %path.display(), format = %options.format, "credential written");
    Ok(())
}

fn private_key<'a>(bundle: &'a CredentialBundle, purpose: &'static str) -> Result<&'a KeyPair> {
    bundle
        .key_pair()
        .ok_or(CaKitError::MissingPrivateKey(purpose))
}

fn encode(der: Vec<u8>, encoding: Encoding, label: &str) -> Result<Vec<u8>> {
    Ok(match encoding {
        Encoding::Der => der,
        Encoding::Pem => pem_utils::der_to_pem(&der, label).into_bytes(),
    })
}

/// A degenerate `SignedData` that only carries certificates.
fn pkcs7_certs_only(bundle: &CredentialBundle) -> Result<Vec<u8>> {
    let certificates = bundle
        .certificate_chain()
        .iter()
        .map(|cert| CertificateChoices::Certificate(cert.inner.clone()))
        .collect::<Vec<_>>();
    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };
    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };
    Ok(content_info.to_der()?)
}
