use const_oid::ObjectIdentifier;
use der::asn1::{Any, BitString, SetOfVec};
use der::{Decode, Encode};
use time::OffsetDateTime;
use x509_cert::attr::Attribute;
use x509_cert::ext::Extension;
use x509_cert::request::{CertReq, CertReqInfo, Version};

use super::{CrlDistribution, InMemoryRequest, RequestCapability};
use crate::cert::extensions::{AltName, ExtendedKeyUsageOption, KeyUsage};
use crate::cert::params::{DistinguishedName, ExtensionParam};
use crate::error::{CaKitError, Result};
use crate::key::{KeyAlgorithm, KeyPair, PublicKey};
use crate::pem_utils;
use crate::pki::{self, SignatureAlgorithm};

/// PKCS#9 extensionRequest attribute.
const EXTENSION_REQUEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

const PEM_LABEL: &str = "CERTIFICATE REQUEST";

/// A PKCS#10 request received from outside the CA. The embedded signature has
/// been checked against the embedded public key when this value exists.
#[derive(Debug, Clone)]
pub struct SubmittedRequest {
    csr: CertReq,
    public_key: PublicKey,
    request: InMemoryRequest,
}

impl SubmittedRequest {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let csr = CertReq::from_der(der)?;
        Self::from_cert_req(csr, OffsetDateTime::now_utc())
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_der(&pem_utils::pem_to_der_labeled(pem, PEM_LABEL)?)
    }

    fn from_cert_req(csr: CertReq, received_at: OffsetDateTime) -> Result<Self> {
        let public_key = PublicKey::from_x509spki(&csr.info.public_key)?;
        let algorithm = SignatureAlgorithm::from_oid(csr.algorithm.oid)?;
        let signature = csr.signature.as_bytes().ok_or_else(|| {
            CaKitError::DecodingError("request signature has unused bits".to_string())
        })?;
        pki::verify_data(&csr.info.to_der()?, signature, &public_key, algorithm)?;

        let extensions = requested_extensions(&csr.info)?;
        let mut request = InMemoryRequest::from_parts(
            DistinguishedName::from_x509_name(&csr.info.subject),
            public_key.algorithm(),
            &extensions,
        )?;
        request.created_at = received_at;

        Ok(Self {
            csr,
            public_key,
            request,
        })
    }

    /// Builds and signs a PKCS#10 request for `request` with `key`.
    pub fn create(request: &InMemoryRequest, key: &KeyPair) -> Result<Self> {
        if key.algorithm() != request.key_algorithm {
            return Err(CaKitError::InvalidInput(format!(
                "request asks for {} but the key is {}",
                request.key_algorithm,
                key.algorithm()
            )));
        }
        let public_key = key.public_key();
        let extensions = request
            .extensions()?
            .iter()
            .map(ExtensionParam::to_x509)
            .collect::<Result<Vec<Extension>>>()?;

        let mut attributes = Vec::new();
        if !extensions.is_empty() {
            attributes.push(Attribute {
                oid: EXTENSION_REQUEST,
                values: SetOfVec::try_from(vec![Any::encode_from(&extensions)?])?,
            });
        }

        let info = CertReqInfo {
            version: Version::V1,
            subject: request.subject.as_x509_name()?,
            public_key: public_key.to_spki()?,
            attributes: SetOfVec::try_from(attributes)?,
        };
        let algorithm = SignatureAlgorithm::default_for(&public_key);
        let signature = pki::sign_data(&info.to_der()?, key, algorithm)?;
        let csr = CertReq {
            info,
            algorithm: algorithm.into(),
            signature: BitString::from_bytes(&signature)?,
        };

        let mut request = request.clone();
        request.created_at = OffsetDateTime::now_utc();
        Ok(Self {
            csr,
            public_key,
            request,
        })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.csr.to_der()?)
    }

    pub fn to_pem(&self) -> Result<String> {
        Ok(pem_utils::der_to_pem(&self.to_der()?, PEM_LABEL))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The decoded request facet.
    pub fn request(&self) -> &InMemoryRequest {
        &self.request
    }

    /// An editable copy of the request, e.g. to adjust it before signing.
    pub fn to_request(&self) -> InMemoryRequest {
        self.request.clone()
    }
}

fn requested_extensions(info: &CertReqInfo) -> Result<Vec<ExtensionParam>> {
    let mut extensions = Vec::new();
    for attribute in info.attributes.iter().filter(|a| a.oid == EXTENSION_REQUEST) {
        for value in attribute.values.iter() {
            let decoded: Vec<Extension> = value.decode_as()?;
            extensions.extend(decoded.iter().map(ExtensionParam::from_x509));
        }
    }
    Ok(extensions)
}

impl RequestCapability for SubmittedRequest {
    fn subject(&self) -> DistinguishedName {
        self.request.subject.clone()
    }

    fn key_algorithm(&self) -> KeyAlgorithm {
        self.public_key.algorithm()
    }

    fn key_usage(&self) -> KeyUsage {
        self.request.key_usage
    }

    fn extended_key_usage(&self) -> Vec<ExtendedKeyUsageOption> {
        self.request.extended_key_usage.clone()
    }

    fn subject_alt_names(&self) -> Vec<AltName> {
        self.request.subject_alt_names.clone()
    }

    fn is_ca(&self) -> bool {
        self.request.ca
    }

    fn crl_distribution_point(&self) -> CrlDistribution {
        self.request.crl_distribution_point()
    }

    fn description(&self) -> Option<String> {
        self.request.description.clone()
    }

    fn created_at(&self) -> OffsetDateTime {
        self.request.created_at
    }
}
