use std::time::Duration;

use der::DateTime;
use der::asn1::{GeneralizedTime, UtcTime};
use time::OffsetDateTime;
use x509_cert::Version;
use x509_cert::certificate::TbsCertificateInner;
use x509_cert::serial_number::SerialNumber;

use crate::cert::params::{DistinguishedName, ExtensionParam};
use crate::error::{CaKitError, Result};
use crate::key::PublicKey;
use crate::pki::SignatureAlgorithm;

/// Represents the "To Be Signed" (TBS) portion of an X.509 certificate.
///
/// # Fields
/// * `serial_number` - The unique identifier for the certificate.
/// * `signature_algorithm` - The algorithm used to sign the certificate.
/// * `issuer` - The distinguished name of the certificate issuer.
/// * `not_before` - The start of the certificate's validity period.
/// * `not_after` - The end of the certificate's validity period.
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `extensions` - Additional X.509 extensions for the certificate.
pub struct TbsCertificate {
    pub serial_number: Vec<u8>,
    pub signature_algorithm: SignatureAlgorithm,
    pub issuer: DistinguishedName,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub subject: DistinguishedName,
    pub subject_public_key: PublicKey,
    pub extensions: Vec<ExtensionParam>,
}

impl TbsCertificate {
    /// Converts the `TbsCertificate` into a `TbsCertificateInner` for DER encoding.
    pub fn to_tbs_certificate_inner(&self) -> Result<TbsCertificateInner> {
        let extensions = self
            .extensions
            .iter()
            .map(ExtensionParam::to_x509)
            .collect::<Result<Vec<_>>>()?;

        let validity = x509_cert::time::Validity {
            not_before: to_x509_time(self.not_before)?,
            not_after: to_x509_time(self.not_after)?,
        };

        Ok(TbsCertificateInner {
            version: Version::V3,
            serial_number: SerialNumber::new(self.serial_number.as_slice())?,
            signature: self.signature_algorithm.into(),
            issuer: self.issuer.as_x509_name()?,
            validity,
            subject: self.subject.as_x509_name()?,
            subject_public_key_info: self.subject_public_key.to_spki()?,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: if extensions.is_empty() {
                None
            } else {
                Some(extensions)
            },
        })
    }

    /// Creates a `TbsCertificate` from a `TbsCertificateInner`.
    pub fn from_tbs_certificate_inner(inner: &TbsCertificateInner) -> Result<Self> {
        Ok(Self {
            serial_number: inner.serial_number.as_bytes().to_vec(),
            signature_algorithm: SignatureAlgorithm::from_oid(inner.signature.oid)?,
            issuer: DistinguishedName::from_x509_name(&inner.issuer),
            not_before: from_x509_time(&inner.validity.not_before)?,
            not_after: from_x509_time(&inner.validity.not_after)?,
            subject: DistinguishedName::from_x509_name(&inner.subject),
            subject_public_key: PublicKey::from_x509spki(&inner.subject_public_key_info)?,
            extensions: inner
                .extensions
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(ExtensionParam::from_x509)
                .collect(),
        })
    }
}

/// RFC 5280: UTCTime through 2049, GeneralizedTime afterwards.
fn to_x509_time(at: OffsetDateTime) -> Result<x509_cert::time::Time> {
    let secs = u64::try_from(at.unix_timestamp())
        .map_err(|_| CaKitError::InvalidInput(format!("validity date {at} predates 1970")))?;
    let date_time = DateTime::from_unix_duration(Duration::from_secs(secs))?;
    if date_time.year() < 2050 {
        Ok(x509_cert::time::Time::UtcTime(UtcTime::from_date_time(
            date_time,
        )?))
    } else {
        Ok(x509_cert::time::Time::GeneralTime(
            GeneralizedTime::from_date_time(date_time),
        ))
    }
}

fn from_x509_time(time: &x509_cert::time::Time) -> Result<OffsetDateTime> {
    let secs = time.to_unix_duration().as_secs() as i64;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| CaKitError::DecodingError(e.to_string()))
}
