pub mod extensions;
pub mod params;

use der::{Decode, DecodePem, Encode, EncodePem};
use extensions::{BasicConstraints, SubjectKeyIdentifier, ToAndFromX509Extension};
use params::{DistinguishedName, ExtensionParam, Validity};
use rand_core::RngCore;
use x509_cert::certificate::CertificateInner;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::error::{CaKitError, Result};
use crate::key::{KeyPair, PublicKey};
use crate::pki::{self, SignatureAlgorithm};
use crate::request::InMemoryRequest;
use crate::tbs_certificate::TbsCertificate;

/// Represents an X.509 certificate.
///
/// This struct provides methods to encode the certificate into DER or PEM formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_der(der)?,
        })
    }

    /// Decodes a single `CERTIFICATE` PEM block.
    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_pem(pem)?,
        })
    }

    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    /// Encodes the certificate into PEM format.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| CaKitError::EncodingError(e.to_string()))
    }

    pub fn spki(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.tbs_certificate.subject_public_key_info
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_x509spki(self.spki())
    }

    /// Raw bits of the certificate's subject public key.
    pub fn public_key_bits(&self) -> &[u8] {
        self.spki().subject_public_key.raw_bytes()
    }

    pub fn subject(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.inner.tbs_certificate.subject)
    }

    pub fn issuer(&self) -> DistinguishedName {
        DistinguishedName::from_x509_name(&self.inner.tbs_certificate.issuer)
    }

    pub fn extensions(&self) -> Vec<ExtensionParam> {
        self.inner
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(ExtensionParam::from_x509)
            .collect()
    }

    /// Decodes the extension of type `E`, if the certificate carries one.
    pub fn extension<E: ToAndFromX509Extension>(&self) -> Result<Option<E>> {
        self.extensions()
            .iter()
            .find(|ext| ext.oid == E::OID)
            .map(ExtensionParam::to_extension)
            .transpose()
    }

    pub fn is_ca(&self) -> bool {
        matches!(
            self.extension::<BasicConstraints>(),
            Ok(Some(BasicConstraints { is_ca: true, .. }))
        )
    }

    /// Checks the certificate signature against `issuer_key`.
    pub fn verify_signature(&self, issuer_key: &PublicKey) -> Result<()> {
        let algorithm = SignatureAlgorithm::from_oid(self.inner.signature_algorithm.oid)?;
        let tbs = self.inner.tbs_certificate.to_der()?;
        let signature = self.inner.signature.as_bytes().ok_or_else(|| {
            CaKitError::CertificateError("signature has unused bits".to_string())
        })?;
        pki::verify_data(&tbs, signature, issuer_key, algorithm)
    }

    /// Creates a self-signed certificate for a request, e.g. a new CA identity.
    ///
    /// The request's extensions are copied as-is and a subject key identifier is added.
    pub fn new_self_signed(
        request: &InMemoryRequest,
        key: &KeyPair,
        validity: Validity,
    ) -> Result<Self> {
        let public_key = key.public_key();
        let signature_algorithm = SignatureAlgorithm::default_for(&public_key);

        let mut extensions = request.extensions()?;
        extensions.push(ExtensionParam::from_extension(
            &SubjectKeyIdentifier::from_public_key(&public_key)?,
            false,
        )?);

        let tbs_cert = TbsCertificate {
            serial_number: random_serial(),
            signature_algorithm,
            issuer: request.subject.clone(),
            not_before: validity.not_before,
            not_after: validity.not_after,
            subject: request.subject.clone(),
            subject_public_key: public_key,
            extensions,
        };

        let tbs_cert_inner = tbs_cert.to_tbs_certificate_inner()?;
        let signature = pki::sign_data(&tbs_cert_inner.to_der()?, key, signature_algorithm)?;

        Ok(Certificate {
            inner: CertificateInner {
                tbs_certificate: tbs_cert_inner,
                signature_algorithm: signature_algorithm.into(),
                signature: der::asn1::BitString::from_bytes(&signature)?,
            },
        })
    }

    /// Extracts the certificate's request facet: subject, key algorithm and extensions.
    pub fn to_request(&self) -> Result<InMemoryRequest> {
        let tbs = TbsCertificate::from_tbs_certificate_inner(&self.inner.tbs_certificate)?;
        InMemoryRequest::from_parts(
            tbs.subject,
            tbs.subject_public_key.algorithm(),
            &tbs.extensions,
        )
    }
}

/// Positive 128-bit serial number.
fn random_serial() -> Vec<u8> {
    let mut serial = vec![0u8; 16];
    rand_core::OsRng.fill_bytes(&mut serial);
    serial[0] &= 0x7f;
    serial[0] |= 0x01;
    serial
}
